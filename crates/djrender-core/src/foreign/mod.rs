//! Collaborators for documents the engine does not decode.
//!
//! A session only classifies a foreign document and reports
//! `RenderOutcome::Delegate`; whoever holds the session is expected to hand
//! the document to a `ForeignRenderer`.

mod pdf;

pub use pdf::PdfProbe;

use crate::error::ForeignError;
use crate::models::page::PageSize;

/// Result type for foreign-format operations.
pub type Result<T> = std::result::Result<T, ForeignError>;

/// Trait for renderers of foreign formats.
pub trait ForeignRenderer {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Number of pages in the document.
    fn page_count(&self) -> usize;

    /// Size of page `index` (zero-based) in the renderer's native units.
    fn page_size(&self, index: usize) -> Result<PageSize>;

    /// Render page `index` into `out` as RGBA at `width` x `height`.
    fn render_page(&self, index: usize, width: u32, height: u32, out: &mut [u8]) -> Result<()>;
}
