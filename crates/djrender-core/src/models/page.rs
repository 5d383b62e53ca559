//! Page geometry and render request types.

use serde::{Deserialize, Serialize};

use super::config::RenderLimits;
use crate::error::{Result, SessionError};

/// Size reported for every page of a foreign document (US Letter in points).
pub const FOREIGN_PLACEHOLDER_SIZE: PageSize = PageSize {
    width: 612,
    height: 792,
};

/// Page count reported for a foreign document; the real count belongs to the
/// foreign renderer.
pub const FOREIGN_PLACEHOLDER_PAGE_COUNT: usize = 1;

/// Width and height of a page in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: u32,
    pub height: u32,
}

impl PageSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Scale both sides by `factor`, keeping at least one pixel per side.
    pub fn scaled(&self, factor: f32) -> Self {
        let scale = |side: u32| ((side as f32 * factor).round() as u32).max(1);
        Self {
            width: scale(self.width),
            height: scale(self.height),
        }
    }
}

/// One page render request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub index: usize,
    pub width: u32,
    pub height: u32,
}

impl PageRequest {
    pub fn new(index: usize, width: u32, height: u32) -> Self {
        Self {
            index,
            width,
            height,
        }
    }

    /// Bytes of an RGBA buffer for this request.
    pub fn rgba_len(&self) -> usize {
        self.pixel_count() as usize * 4
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Check the request against a page count and the size ceilings.
    pub fn validate(&self, page_count: usize, limits: &RenderLimits) -> Result<()> {
        if self.index >= page_count {
            return Err(SessionError::PageOutOfRange {
                index: self.index,
                count: page_count,
            });
        }
        limits.check(self.width, self.height)
    }
}

/// Successful result of a page render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// The caller's buffer holds the page.
    Rendered,
    /// Foreign document: the caller must use the foreign renderer.
    Delegate,
}
