//! Decoding engine abstraction layer for djrender.
//!
//! This crate provides a unified interface over page-image decoding engines
//! that work asynchronously and report progress through a message queue:
//! - `memory`: an in-process engine backed by registered bitmaps
//! - `djvulibre`: bindings to `libdjvulibre`'s `ddjvuapi`

mod backend;
mod error;
mod types;

pub use backend::{DecodeEngine, EngineContext};
pub use error::EngineError;
pub use types::{
    DocumentId, FormatId, HandleRef, JobStatus, Message, MessageTag, PageId, PageInfo,
    PageInfoQuery, PixelFormat, PixelStyle, RenderRect,
};

#[cfg(feature = "memory")]
pub use backend::memory::{EngineStats, MemoryDocument, MemoryEngine};

#[cfg(feature = "djvulibre")]
pub use backend::ddjvu::DdjvuEngine;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
