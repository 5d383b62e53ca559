//! Data models for djrender.

pub mod config;
pub mod page;

pub use config::{PageWaitStrategy, RenderLimits, SessionConfig, WaitBudget};
pub use page::{PageRequest, PageSize, RenderOutcome};
