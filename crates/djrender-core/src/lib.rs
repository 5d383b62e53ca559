//! Core library for djrender: DjVu decode sessions.
//!
//! This crate provides:
//! - Sessions owning one engine context and at most one open document
//! - Document loading with native/foreign classification
//! - Bounded waits over the engine's asynchronous message queue
//! - Page rendering into caller-owned RGBA buffers with size ceilings
//! - Integer status codes for callers outside Rust's type system

pub mod error;
pub mod foreign;
pub mod format;
pub mod models;
pub mod pixels;
pub mod session;
pub mod status;

pub use error::{ForeignError, Result, SessionError, WaitStage};
pub use foreign::{ForeignRenderer, PdfProbe};
pub use format::DocumentFormat;
pub use models::config::{PageWaitStrategy, RenderLimits, SessionConfig, WaitBudget};
pub use models::page::{
    FOREIGN_PLACEHOLDER_PAGE_COUNT, FOREIGN_PLACEHOLDER_SIZE, PageRequest, PageSize, RenderOutcome,
};
pub use session::{LoadState, Session};

/// Re-export engine types.
pub use djrender_engine::{DecodeEngine, EngineContext, EngineError, PageInfo};

#[cfg(feature = "memory")]
pub use djrender_engine::{MemoryDocument, MemoryEngine};

#[cfg(feature = "djvulibre")]
pub use djrender_engine::DdjvuEngine;
