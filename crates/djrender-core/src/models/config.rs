//! Configuration structures for decode sessions.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Default longest side of a rendered page, in pixels.
pub const DEFAULT_MAX_DIMENSION: u32 = 10_000;

/// Default pixel budget of one render (about 100 MB of RGBA).
pub const DEFAULT_MAX_TOTAL_PIXELS: u64 = 25_000_000;

/// Smallest file the loader hands to the engine.
pub const DEFAULT_MIN_FILE_SIZE: u64 = 16;

/// Main configuration for a decode session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Output size ceilings.
    pub limits: RenderLimits,

    /// Budget for the document-ready wait after opening.
    pub document_wait: WaitBudget,

    /// Budget for page decode and page info waits.
    pub page_wait: WaitBudget,

    /// How page readiness is detected.
    pub page_wait_strategy: PageWaitStrategy,

    /// Files smaller than this are rejected as unreadable.
    pub min_file_size: u64,

    /// Extensions (without dot, case-insensitive) delegated to the foreign renderer.
    pub foreign_extensions: Vec<String>,

    /// Also classify by file header, not only by extension.
    pub sniff_signatures: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            limits: RenderLimits::default(),
            document_wait: WaitBudget::document_default(),
            page_wait: WaitBudget::page_default(),
            page_wait_strategy: PageWaitStrategy::default(),
            min_file_size: DEFAULT_MIN_FILE_SIZE,
            foreign_extensions: vec!["pdf".to_string()],
            sniff_signatures: true,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> std::result::Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> std::result::Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)
    }
}

/// Hard ceilings on requested output size, checked before any allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderLimits {
    /// Maximum width and maximum height.
    pub max_dimension: u32,

    /// Maximum `width * height`.
    pub max_total_pixels: u64,
}

impl Default for RenderLimits {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            max_total_pixels: DEFAULT_MAX_TOTAL_PIXELS,
        }
    }
}

impl RenderLimits {
    /// Validate an output size.
    pub fn check(&self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(SessionError::InvalidArgument(format!(
                "output size {}x{} is empty",
                width, height
            )));
        }
        if width > self.max_dimension || height > self.max_dimension {
            return Err(SessionError::DimensionTooLarge {
                width,
                height,
                max: self.max_dimension,
            });
        }

        let pixels = u64::from(width) * u64::from(height);
        if pixels > self.max_total_pixels {
            return Err(SessionError::PixelBudgetExceeded {
                pixels,
                max: self.max_total_pixels,
            });
        }
        Ok(())
    }
}

/// Bounded polling budget: at most `max_attempts` polls, sleeping
/// `poll_interval_ms` whenever the queue is empty.
///
/// Fields missing from a config file take the page default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitBudget {
    pub max_attempts: u32,
    pub poll_interval_ms: u64,
}

impl Default for WaitBudget {
    fn default() -> Self {
        Self::page_default()
    }
}

impl WaitBudget {
    pub const fn new(max_attempts: u32, poll_interval_ms: u64) -> Self {
        Self {
            max_attempts,
            poll_interval_ms,
        }
    }

    /// 50 x 100ms.
    pub const fn document_default() -> Self {
        Self::new(50, 100)
    }

    /// 100 x 100ms.
    pub const fn page_default() -> Self {
        Self::new(100, 100)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Upper bound on time spent sleeping.
    pub fn ceiling(&self) -> Duration {
        self.poll_interval() * self.max_attempts
    }
}

/// Signal used to decide that a page finished decoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageWaitStrategy {
    /// Poll the page job status. Safe with concurrent renders.
    #[default]
    Status,

    /// Wait for the page's `PageInfo` message. Renders on a session are
    /// serialized so that waiters cannot consume each other's messages.
    Message,
}
