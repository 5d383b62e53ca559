//! Value types exchanged with a decoding engine.

/// Opaque handle to a document opened in an engine context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentId(pub u64);

/// Opaque handle to a page decode job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId(pub u64);

impl DocumentId {
    /// Stands in for a document released before its messages were read.
    /// Engines never hand out this id.
    pub const RETIRED: DocumentId = DocumentId(0);
}

impl PageId {
    /// Stands in for a page released before its messages were read.
    /// Engines never hand out this id.
    pub const RETIRED: PageId = PageId(0);
}

/// Opaque handle to a pixel format descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FormatId(pub u64);

/// Any handle a message can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleRef {
    Document(DocumentId),
    Page(PageId),
}

/// Kind of notification posted to a context queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTag {
    /// Document structure is known (page count, page directory).
    DocInfo,
    /// A page has been decoded far enough to be rendered.
    PageInfo,
    /// The engine hit an error.
    Error,
    /// Progress, chunk, redisplay and similar notifications.
    Other,
}

/// A notification copied out of an engine queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub tag: MessageTag,
    pub document: Option<DocumentId>,
    pub page: Option<PageId>,
    /// Error text, present for `MessageTag::Error`.
    pub text: Option<String>,
}

impl Message {
    pub fn doc_info(document: DocumentId) -> Self {
        Self {
            tag: MessageTag::DocInfo,
            document: Some(document),
            page: None,
            text: None,
        }
    }

    pub fn page_info(document: DocumentId, page: PageId) -> Self {
        Self {
            tag: MessageTag::PageInfo,
            document: Some(document),
            page: Some(page),
            text: None,
        }
    }

    pub fn error(
        text: impl Into<String>,
        document: Option<DocumentId>,
        page: Option<PageId>,
    ) -> Self {
        Self {
            tag: MessageTag::Error,
            document,
            page,
            text: Some(text.into()),
        }
    }

    pub fn other(document: Option<DocumentId>, page: Option<PageId>) -> Self {
        Self {
            tag: MessageTag::Other,
            document,
            page,
            text: None,
        }
    }

    /// Whether this message concerns `handle`.
    ///
    /// Page messages also carry their document; a page-scoped message only
    /// matches a document handle when it has no page attached.
    pub fn refers_to(&self, handle: HandleRef) -> bool {
        match handle {
            HandleRef::Document(doc) => self.page.is_none() && self.document == Some(doc),
            HandleRef::Page(page) => self.page == Some(page),
        }
    }

    /// The most specific handle this message carries.
    pub fn target(&self) -> Option<HandleRef> {
        self.page
            .map(HandleRef::Page)
            .or(self.document.map(HandleRef::Document))
    }

    /// Whether the most specific handle this message names is already released.
    pub fn is_stale(&self) -> bool {
        matches!(
            self.target(),
            Some(HandleRef::Page(PageId::RETIRED) | HandleRef::Document(DocumentId::RETIRED))
        )
    }

    /// Error text, or a generic description for errors without one.
    pub fn error_text(&self) -> String {
        self.text
            .clone()
            .unwrap_or_else(|| "unspecified decoding error".to_string())
    }
}

/// Status of an engine job (document or page decode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    NotStarted,
    Started,
    Ok,
    Failed,
    Stopped,
}

impl JobStatus {
    /// The job will not change status anymore.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ok | Self::Failed | Self::Stopped)
    }

    pub fn is_error(self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }
}

/// Stored geometry of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    /// Width in pixels at `dpi`.
    pub width: u32,
    /// Height in pixels at `dpi`.
    pub height: u32,
    pub dpi: u32,
    /// Rotation in degrees, one of 0, 90, 180, 270.
    pub rotation: u16,
}

/// Answer to a page-info query, which may still be in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageInfoQuery {
    Pending,
    Ready(PageInfo),
    Failed,
}

/// Pixel layout requested from the rasterizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelStyle {
    /// Three bytes per pixel, red first.
    Rgb24,
}

impl PixelStyle {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb24 => 3,
        }
    }
}

/// Pixel format descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    pub style: PixelStyle,
    /// Rows are stored from the top of the page down.
    pub rows_top_to_bottom: bool,
    /// Rectangle `y` coordinates grow downwards.
    pub y_top_to_bottom: bool,
}

impl PixelFormat {
    /// 24-bit RGB, top row first, `y` measured from the top.
    pub const fn rgb24() -> Self {
        Self {
            style: PixelStyle::Rgb24,
            rows_top_to_bottom: true,
            y_top_to_bottom: true,
        }
    }

    pub fn row_stride(&self, width: u32) -> usize {
        width as usize * self.style.bytes_per_pixel()
    }
}

/// Rectangle in output pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl RenderRect {
    /// Rectangle anchored at the origin.
    pub const fn sized(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}
