//! PDF structure probe using lopdf.
//!
//! Reads page count and page geometry. Rasterization is left to a real PDF
//! renderer.

use std::path::Path;

use lopdf::{Document, Object, ObjectId};
use tracing::debug;

use super::{ForeignRenderer, Result};
use crate::error::ForeignError;
use crate::models::page::PageSize;

/// Page trees deeper than this are treated as malformed.
const MAX_TREE_DEPTH: usize = 32;

/// Page count and geometry of a PDF document.
pub struct PdfProbe {
    document: Document,
    pages: Vec<ObjectId>,
}

impl PdfProbe {
    pub fn open(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let document = Document::load_mem(data).map_err(|e| ForeignError::Parse(e.to_string()))?;
        Ok(Self::from_document(document))
    }

    pub fn from_document(document: Document) -> Self {
        let pages: Vec<ObjectId> = document.get_pages().into_values().collect();
        debug!("PDF has {} pages", pages.len());
        Self { document, pages }
    }

    fn page_id(&self, index: usize) -> Result<ObjectId> {
        self.pages
            .get(index)
            .copied()
            .ok_or(ForeignError::InvalidPage(index))
    }

    /// Look up `key` on a page node or its nearest ancestor.
    fn inherited(&self, node: ObjectId, key: &[u8]) -> Option<&Object> {
        let mut current = Some(node);
        for _ in 0..MAX_TREE_DEPTH {
            let dict = self.document.get_dictionary(current?).ok()?;
            if let Ok(value) = dict.get(key) {
                return self.document.dereference(value).ok().map(|(_, object)| object);
            }
            current = dict.get(b"Parent").and_then(Object::as_reference).ok();
        }
        None
    }

    fn rotation(&self, page: ObjectId) -> i64 {
        match self.inherited(page, b"Rotate") {
            Some(Object::Integer(degrees)) => degrees.rem_euclid(360),
            _ => 0,
        }
    }
}

fn number(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(value) => Some(*value as f64),
        Object::Real(value) => Some(f64::from(*value)),
        _ => None,
    }
}

impl ForeignRenderer for PdfProbe {
    fn name(&self) -> &str {
        "pdf-probe"
    }

    fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// MediaBox size in points, with `/Rotate` 90 and 270 swapping the sides.
    fn page_size(&self, index: usize) -> Result<PageSize> {
        let page = self.page_id(index)?;
        let corners: Vec<f64> = self
            .inherited(page, b"MediaBox")
            .and_then(|object| object.as_array().ok())
            .map(|array| array.iter().filter_map(number).collect())
            .unwrap_or_default();

        let &[x0, y0, x1, y1] = corners.as_slice() else {
            return Err(ForeignError::MissingGeometry(index));
        };
        let width = (x1 - x0).abs().round() as u32;
        let height = (y1 - y0).abs().round() as u32;
        if width == 0 || height == 0 {
            return Err(ForeignError::MissingGeometry(index));
        }

        match self.rotation(page) {
            90 | 270 => Ok(PageSize::new(height, width)),
            _ => Ok(PageSize::new(width, height)),
        }
    }

    fn render_page(&self, index: usize, _width: u32, _height: u32, _out: &mut [u8]) -> Result<()> {
        self.page_id(index)?;
        Err(ForeignError::Unsupported("PDF rasterization"))
    }
}
