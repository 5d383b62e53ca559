//! Decoding engine implementations.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "djvulibre")]
pub mod ddjvu;

use std::path::Path;
use std::sync::Arc;

use crate::types::{
    DocumentId, FormatId, JobStatus, Message, PageId, PageInfoQuery, PixelFormat, RenderRect,
};
use crate::Result;

/// Factory for engine contexts.
pub trait DecodeEngine: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Allocate a fresh context. Dropping the last reference releases it.
    fn create_context(&self) -> Result<Arc<dyn EngineContext>>;
}

/// A decoding context: owns a message queue and every handle created in it.
///
/// Document and page decoding happens on the engine's own threads. Progress
/// is reported only through the context queue and through job status, so
/// callers poll. Every `create_*`/`open_*` must be paired with the matching
/// `release_*`.
pub trait EngineContext: Send + Sync {
    /// Start opening a document. Returns as soon as a handle exists; the
    /// structure is parsed in the background and announced by a
    /// `MessageTag::DocInfo` message.
    fn open_document(&self, path: &Path) -> Result<DocumentId>;

    fn release_document(&self, document: DocumentId);

    fn document_status(&self, document: DocumentId) -> JobStatus;

    /// Raw page count as reported by the engine. Only meaningful once the
    /// document status is `Ok`; may be zero or negative for broken files.
    fn page_count(&self, document: DocumentId) -> i32;

    /// Stored page geometry, possibly still being decoded.
    fn page_info(&self, document: DocumentId, index: usize) -> PageInfoQuery;

    /// Start decoding a page.
    fn create_page(&self, document: DocumentId, index: usize) -> Result<PageId>;

    fn page_status(&self, page: PageId) -> JobStatus;

    fn release_page(&self, page: PageId);

    fn create_format(&self, format: PixelFormat) -> Result<FormatId>;

    fn release_format(&self, format: FormatId);

    /// Rasterize `render_rect` of the page scaled to `page_rect` into
    /// `buffer`, one row every `row_stride` bytes.
    fn render_page(
        &self,
        page: PageId,
        format: FormatId,
        page_rect: RenderRect,
        render_rect: RenderRect,
        row_stride: usize,
        buffer: &mut [u8],
    ) -> Result<()>;

    /// Look at the oldest queued message without removing it.
    fn peek_message(&self) -> Option<Message>;

    /// Remove the oldest queued message.
    fn pop_message(&self);
}
