//! Error types for the engine layer.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{DocumentId, FormatId, PageId};

/// Errors reported by a decoding engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine could not allocate a context.
    #[error("failed to create context: {0}")]
    ContextCreate(String),

    /// The engine refused to open a document.
    #[error("failed to open {}: {reason}", path.display())]
    Open { path: PathBuf, reason: String },

    /// The engine could not create a page object.
    #[error("failed to create page {index}: {reason}")]
    PageCreate { index: usize, reason: String },

    /// The engine could not build a pixel format.
    #[error("failed to create pixel format: {0}")]
    Format(String),

    /// The rasterizer failed.
    #[error("render failed: {0}")]
    Render(String),

    /// A handle that this context never issued or already released.
    #[error("unknown document handle {0:?}")]
    UnknownDocument(DocumentId),

    #[error("unknown page handle {0:?}")]
    UnknownPage(PageId),

    #[error("unknown format handle {0:?}")]
    UnknownFormat(FormatId),
}
