//! Error types for the djrender-core library.

use std::fmt;
use std::path::PathBuf;

use djrender_engine::{EngineError, JobStatus};
use thiserror::Error;

/// The wait that ran out of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStage {
    /// Waiting for the document structure after opening.
    DocumentInfo,
    /// Waiting for a page's stored geometry.
    PageInfo,
    /// Waiting for a page to finish decoding before rasterizing.
    PageDecode,
}

impl fmt::Display for WaitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            Self::DocumentInfo => "document info",
            Self::PageInfo => "page info",
            Self::PageDecode => "page decode",
        };
        f.write_str(stage)
    }
}

/// Main error type for decode sessions.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Empty path, zero-sized output or a caller buffer that is too small.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The file exists but cannot be read, or is too small to be a document.
    #[error("cannot read {}: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },

    /// The engine rejected the file.
    #[error("engine could not open {}: {reason}", path.display())]
    OpenFailed { path: PathBuf, reason: String },

    #[error("timed out waiting for {stage} after {attempts} attempts")]
    Timeout { stage: WaitStage, attempts: u32 },

    /// The engine posted an error message.
    #[error("decode error: {0}")]
    DecodeError(String),

    #[error("engine reported {0} pages")]
    InvalidPageCount(i32),

    #[error("no document loaded")]
    NoDocument,

    #[error("page {index} out of range (document has {count} pages)")]
    PageOutOfRange { index: usize, count: usize },

    #[error("{width}x{height} exceeds the per-side limit of {max}")]
    DimensionTooLarge { width: u32, height: u32, max: u32 },

    #[error("{pixels} pixels exceed the budget of {max}")]
    PixelBudgetExceeded { pixels: u64, max: u64 },

    #[error("could not create page {page}: {reason}")]
    PageCreateFailed { page: usize, reason: String },

    /// The page job ended in `Failed` or `Stopped`.
    #[error("page {page} failed to decode ({status:?})")]
    DecodeFailed { page: usize, status: JobStatus },

    #[error("could not allocate {0} bytes of scratch memory")]
    AllocFailed(usize),

    #[error("rasterizing page {page} failed: {reason}")]
    RasterFailed { page: usize, reason: String },

    /// The engine could not create a context.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Used after `teardown`.
    #[error("session has been torn down")]
    TornDown,
}

impl SessionError {
    /// Whether retrying the same page render can succeed without reloading.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout {
                stage: WaitStage::PageDecode | WaitStage::PageInfo,
                ..
            } | Self::DecodeError(_)
                | Self::PageCreateFailed { .. }
                | Self::DecodeFailed { .. }
                | Self::AllocFailed(_)
                | Self::RasterFailed { .. }
        )
    }

    /// Whether the request itself was wrong; retrying it unchanged cannot work.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_)
                | Self::PageOutOfRange { .. }
                | Self::DimensionTooLarge { .. }
                | Self::PixelBudgetExceeded { .. }
        )
    }
}

/// Errors from a foreign-format collaborator.
#[derive(Error, Debug)]
pub enum ForeignError {
    /// Failed to parse the document.
    #[error("failed to parse document: {0}")]
    Parse(String),

    #[error("invalid page number: {0}")]
    InvalidPage(usize),

    /// The page exists but has no usable geometry.
    #[error("page {0} has no media box")]
    MissingGeometry(usize),

    #[error("{0} is not supported by this renderer")]
    Unsupported(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
