//! `libdjvulibre` backend through the `ddjvuapi` C interface.
//!
//! Raw pointers never leave this module: every document, page and format the
//! library hands out is registered under an opaque id, and messages are
//! translated back to those ids when they are peeked.

use std::collections::HashMap;
use std::ffi::{CStr, CString, c_char, c_int, c_uint, c_ulong};
use std::path::Path;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use super::{DecodeEngine, EngineContext};
use crate::error::EngineError;
use crate::types::{
    DocumentId, FormatId, JobStatus, Message, MessageTag, PageId, PageInfo, PageInfoQuery,
    PixelFormat, PixelStyle, RenderRect,
};
use crate::Result;

#[allow(non_camel_case_types)]
mod sys {
    use std::ffi::{c_char, c_int, c_uint, c_ulong};

    #[repr(C)]
    pub struct ddjvu_context_t {
        _private: [u8; 0],
    }

    #[repr(C)]
    pub struct ddjvu_document_t {
        _private: [u8; 0],
    }

    #[repr(C)]
    pub struct ddjvu_page_t {
        _private: [u8; 0],
    }

    #[repr(C)]
    pub struct ddjvu_job_t {
        _private: [u8; 0],
    }

    #[repr(C)]
    pub struct ddjvu_format_t {
        _private: [u8; 0],
    }

    /// Common prefix of every member of the `ddjvu_message_t` union.
    #[repr(C)]
    pub struct ddjvu_message_any_t {
        pub tag: c_int,
        pub context: *mut ddjvu_context_t,
        pub document: *mut ddjvu_document_t,
        pub page: *mut ddjvu_page_t,
        pub job: *mut ddjvu_job_t,
    }

    #[repr(C)]
    pub struct ddjvu_message_error_t {
        pub any: ddjvu_message_any_t,
        pub message: *const c_char,
        pub function: *const c_char,
        pub filename: *const c_char,
        pub lineno: c_int,
    }

    #[repr(C)]
    pub struct ddjvu_rect_t {
        pub x: c_int,
        pub y: c_int,
        pub w: c_uint,
        pub h: c_uint,
    }

    #[repr(C)]
    #[derive(Default)]
    pub struct ddjvu_pageinfo_t {
        pub width: c_int,
        pub height: c_int,
        pub dpi: c_int,
        pub rotation: c_int,
        pub version: c_int,
    }

    pub const DDJVU_ERROR: c_int = 0;
    pub const DDJVU_DOCINFO: c_int = 3;
    pub const DDJVU_PAGEINFO: c_int = 4;

    pub const DDJVU_JOB_NOTSTARTED: c_int = 0;
    pub const DDJVU_JOB_STARTED: c_int = 1;
    pub const DDJVU_JOB_OK: c_int = 2;
    pub const DDJVU_JOB_FAILED: c_int = 3;

    pub const DDJVU_RENDER_COLOR: c_int = 0;
    pub const DDJVU_FORMAT_RGB24: c_int = 1;

    #[link(name = "djvulibre")]
    unsafe extern "C" {
        pub fn ddjvu_context_create(programname: *const c_char) -> *mut ddjvu_context_t;
        pub fn ddjvu_context_release(context: *mut ddjvu_context_t);

        pub fn ddjvu_message_peek(context: *mut ddjvu_context_t) -> *mut ddjvu_message_any_t;
        pub fn ddjvu_message_pop(context: *mut ddjvu_context_t);

        pub fn ddjvu_job_status(job: *mut ddjvu_job_t) -> c_int;
        pub fn ddjvu_job_release(job: *mut ddjvu_job_t);

        pub fn ddjvu_document_create_by_filename_utf8(
            context: *mut ddjvu_context_t,
            filename: *const c_char,
            cache: c_int,
        ) -> *mut ddjvu_document_t;
        pub fn ddjvu_document_job(document: *mut ddjvu_document_t) -> *mut ddjvu_job_t;
        pub fn ddjvu_document_get_pagenum(document: *mut ddjvu_document_t) -> c_int;
        pub fn ddjvu_document_get_pageinfo_imp(
            document: *mut ddjvu_document_t,
            pageno: c_int,
            info: *mut ddjvu_pageinfo_t,
            infosz: c_uint,
        ) -> c_int;

        pub fn ddjvu_page_create_by_pageno(
            document: *mut ddjvu_document_t,
            pageno: c_int,
        ) -> *mut ddjvu_page_t;
        pub fn ddjvu_page_job(page: *mut ddjvu_page_t) -> *mut ddjvu_job_t;
        pub fn ddjvu_page_render(
            page: *mut ddjvu_page_t,
            mode: c_int,
            pagerect: *const ddjvu_rect_t,
            renderrect: *const ddjvu_rect_t,
            pixelformat: *const ddjvu_format_t,
            rowsize: c_ulong,
            imagebuffer: *mut c_char,
        ) -> c_int;

        pub fn ddjvu_format_create(
            style: c_int,
            nargs: c_int,
            args: *mut c_uint,
        ) -> *mut ddjvu_format_t;
        pub fn ddjvu_format_set_row_order(format: *mut ddjvu_format_t, top_to_bottom: c_int);
        pub fn ddjvu_format_set_y_direction(format: *mut ddjvu_format_t, top_to_bottom: c_int);
        pub fn ddjvu_format_release(format: *mut ddjvu_format_t);
    }
}

const PROGRAM_NAME: &CStr = c"djrender";

fn job_status(raw: c_int) -> JobStatus {
    match raw {
        sys::DDJVU_JOB_NOTSTARTED => JobStatus::NotStarted,
        sys::DDJVU_JOB_STARTED => JobStatus::Started,
        sys::DDJVU_JOB_OK => JobStatus::Ok,
        sys::DDJVU_JOB_FAILED => JobStatus::Failed,
        _ => JobStatus::Stopped,
    }
}

/// Map a message pointer back to an id. A pointer that is no longer registered
/// belongs to a released handle and keeps its scope as `retired`; djvulibre
/// holds a reference on the object while a message names it, so the pointer
/// cannot have been reused.
fn resolve<T: Copy>(ids: &HashMap<usize, T>, raw: usize, retired: T) -> Option<T> {
    if raw == 0 {
        return None;
    }
    Some(ids.get(&raw).copied().unwrap_or(retired))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Engine backed by the system `libdjvulibre`.
#[derive(Debug, Default)]
pub struct DdjvuEngine;

impl DdjvuEngine {
    pub fn new() -> Self {
        Self
    }
}

impl DecodeEngine for DdjvuEngine {
    fn name(&self) -> &str {
        "djvulibre"
    }

    fn create_context(&self) -> Result<Arc<dyn EngineContext>> {
        // SAFETY: PROGRAM_NAME is a valid NUL-terminated string.
        let raw = unsafe { sys::ddjvu_context_create(PROGRAM_NAME.as_ptr()) };
        let context = NonNull::new(raw).ok_or_else(|| {
            EngineError::ContextCreate("ddjvu_context_create returned null".to_string())
        })?;
        debug!("Created ddjvu context");

        Ok(Arc::new(DdjvuContext {
            context,
            handles: Mutex::default(),
            next_id: AtomicU64::new(1),
        }))
    }
}

/// Pointer registry. Reverse maps translate message pointers back to ids.
#[derive(Default)]
struct Handles {
    documents: HashMap<DocumentId, *mut sys::ddjvu_document_t>,
    pages: HashMap<PageId, (*mut sys::ddjvu_page_t, DocumentId)>,
    formats: HashMap<FormatId, *mut sys::ddjvu_format_t>,
    document_ids: HashMap<usize, DocumentId>,
    page_ids: HashMap<usize, PageId>,
}

/// A `ddjvu_context_t` and everything created in it.
pub struct DdjvuContext {
    context: NonNull<sys::ddjvu_context_t>,
    handles: Mutex<Handles>,
    next_id: AtomicU64,
}

// SAFETY: ddjvuapi serializes access to a context and its message queue
// internally; the registry of raw pointers is guarded by `handles`.
unsafe impl Send for DdjvuContext {}
unsafe impl Sync for DdjvuContext {}

impl DdjvuContext {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn document_ptr(&self, document: DocumentId) -> Option<*mut sys::ddjvu_document_t> {
        lock(&self.handles).documents.get(&document).copied()
    }

    fn page_ptr(&self, page: PageId) -> Option<*mut sys::ddjvu_page_t> {
        lock(&self.handles).pages.get(&page).map(|(ptr, _)| *ptr)
    }
}

impl Drop for DdjvuContext {
    fn drop(&mut self) {
        let handles = std::mem::take(&mut *lock(&self.handles));
        if !handles.pages.is_empty() || !handles.documents.is_empty() {
            warn!(
                "Releasing context with {} pages and {} documents still open",
                handles.pages.len(),
                handles.documents.len()
            );
        }

        // SAFETY: every pointer was returned by the matching create call and
        // removed from the registry on release, so each is released once.
        // Pages and formats go before their documents, documents before the
        // context.
        unsafe {
            for (page, _) in handles.pages.into_values() {
                sys::ddjvu_job_release(sys::ddjvu_page_job(page));
            }
            for format in handles.formats.into_values() {
                sys::ddjvu_format_release(format);
            }
            for document in handles.documents.into_values() {
                sys::ddjvu_job_release(sys::ddjvu_document_job(document));
            }
            sys::ddjvu_context_release(self.context.as_ptr());
        }
        debug!("Released ddjvu context");
    }
}

impl EngineContext for DdjvuContext {
    fn open_document(&self, path: &Path) -> Result<DocumentId> {
        let open_error = |reason: &str| EngineError::Open {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };
        let utf8 = path
            .to_str()
            .ok_or_else(|| open_error("path is not valid UTF-8"))?;
        let filename =
            CString::new(utf8).map_err(|_| open_error("path contains a NUL byte"))?;

        // SAFETY: the context is live and `filename` outlives the call.
        let raw = unsafe {
            sys::ddjvu_document_create_by_filename_utf8(
                self.context.as_ptr(),
                filename.as_ptr(),
                1,
            )
        };
        if raw.is_null() {
            return Err(open_error("ddjvu_document_create_by_filename_utf8 returned null"));
        }

        let id = DocumentId(self.next_id());
        let mut handles = lock(&self.handles);
        handles.documents.insert(id, raw);
        handles.document_ids.insert(raw as usize, id);
        Ok(id)
    }

    fn release_document(&self, document: DocumentId) {
        let raw = {
            let mut handles = lock(&self.handles);
            let raw = handles.documents.remove(&document);
            if let Some(raw) = raw {
                handles.document_ids.remove(&(raw as usize));
            }
            raw
        };
        if let Some(raw) = raw {
            // SAFETY: removed from the registry above, released exactly once.
            unsafe { sys::ddjvu_job_release(sys::ddjvu_document_job(raw)) };
        }
    }

    fn document_status(&self, document: DocumentId) -> JobStatus {
        match self.document_ptr(document) {
            // SAFETY: the pointer stays registered until released.
            Some(raw) => job_status(unsafe { sys::ddjvu_job_status(sys::ddjvu_document_job(raw)) }),
            None => JobStatus::Failed,
        }
    }

    fn page_count(&self, document: DocumentId) -> i32 {
        match self.document_ptr(document) {
            // SAFETY: the pointer stays registered until released.
            Some(raw) => unsafe { sys::ddjvu_document_get_pagenum(raw) },
            None => 0,
        }
    }

    fn page_info(&self, document: DocumentId, index: usize) -> PageInfoQuery {
        let (Some(raw), Ok(pageno)) = (self.document_ptr(document), c_int::try_from(index)) else {
            return PageInfoQuery::Failed;
        };

        let mut info = sys::ddjvu_pageinfo_t::default();
        // SAFETY: `info` is a properly sized out-parameter.
        let status = unsafe {
            sys::ddjvu_document_get_pageinfo_imp(
                raw,
                pageno,
                &mut info,
                std::mem::size_of::<sys::ddjvu_pageinfo_t>() as c_uint,
            )
        };

        match job_status(status) {
            JobStatus::Ok => PageInfoQuery::Ready(PageInfo {
                width: info.width.max(0) as u32,
                height: info.height.max(0) as u32,
                dpi: info.dpi.max(0) as u32,
                rotation: (info.rotation.rem_euclid(4) * 90) as u16,
            }),
            status if status.is_error() => PageInfoQuery::Failed,
            _ => PageInfoQuery::Pending,
        }
    }

    fn create_page(&self, document: DocumentId, index: usize) -> Result<PageId> {
        let raw_document = self
            .document_ptr(document)
            .ok_or(EngineError::UnknownDocument(document))?;
        let pageno = c_int::try_from(index).map_err(|_| EngineError::PageCreate {
            index,
            reason: "page number does not fit a C int".to_string(),
        })?;

        // SAFETY: the document pointer is registered and live.
        let raw = unsafe { sys::ddjvu_page_create_by_pageno(raw_document, pageno) };
        if raw.is_null() {
            return Err(EngineError::PageCreate {
                index,
                reason: "ddjvu_page_create_by_pageno returned null".to_string(),
            });
        }

        let id = PageId(self.next_id());
        let mut handles = lock(&self.handles);
        handles.pages.insert(id, (raw, document));
        handles.page_ids.insert(raw as usize, id);
        Ok(id)
    }

    fn page_status(&self, page: PageId) -> JobStatus {
        match self.page_ptr(page) {
            // SAFETY: the pointer stays registered until released.
            Some(raw) => job_status(unsafe { sys::ddjvu_job_status(sys::ddjvu_page_job(raw)) }),
            None => JobStatus::Failed,
        }
    }

    fn release_page(&self, page: PageId) {
        let raw = {
            let mut handles = lock(&self.handles);
            let raw = handles.pages.remove(&page).map(|(raw, _)| raw);
            if let Some(raw) = raw {
                handles.page_ids.remove(&(raw as usize));
            }
            raw
        };
        if let Some(raw) = raw {
            // SAFETY: removed from the registry above, released exactly once.
            unsafe { sys::ddjvu_job_release(sys::ddjvu_page_job(raw)) };
        }
    }

    fn create_format(&self, format: PixelFormat) -> Result<FormatId> {
        let style = match format.style {
            PixelStyle::Rgb24 => sys::DDJVU_FORMAT_RGB24,
        };

        // SAFETY: RGB24 takes no extra arguments.
        let raw = unsafe { sys::ddjvu_format_create(style, 0, ptr::null_mut()) };
        if raw.is_null() {
            return Err(EngineError::Format(
                "ddjvu_format_create returned null".to_string(),
            ));
        }
        // SAFETY: `raw` was just created and is not shared yet.
        unsafe {
            sys::ddjvu_format_set_row_order(raw, c_int::from(format.rows_top_to_bottom));
            sys::ddjvu_format_set_y_direction(raw, c_int::from(format.y_top_to_bottom));
        }

        let id = FormatId(self.next_id());
        lock(&self.handles).formats.insert(id, raw);
        Ok(id)
    }

    fn release_format(&self, format: FormatId) {
        if let Some(raw) = lock(&self.handles).formats.remove(&format) {
            // SAFETY: removed from the registry, released exactly once.
            unsafe { sys::ddjvu_format_release(raw) };
        }
    }

    fn render_page(
        &self,
        page: PageId,
        format: FormatId,
        page_rect: RenderRect,
        render_rect: RenderRect,
        row_stride: usize,
        buffer: &mut [u8],
    ) -> Result<()> {
        let raw_page = self.page_ptr(page).ok_or(EngineError::UnknownPage(page))?;
        let raw_format = lock(&self.handles)
            .formats
            .get(&format)
            .copied()
            .ok_or(EngineError::UnknownFormat(format))?;

        let needed = row_stride * render_rect.height as usize;
        if buffer.len() < needed {
            return Err(EngineError::Render(format!(
                "buffer holds {} bytes, {} needed",
                buffer.len(),
                needed
            )));
        }

        let to_ddjvu = |rect: RenderRect| sys::ddjvu_rect_t {
            x: rect.x,
            y: rect.y,
            w: rect.width as c_uint,
            h: rect.height as c_uint,
        };
        let page_rect = to_ddjvu(page_rect);
        let render_rect = to_ddjvu(render_rect);

        // SAFETY: all handles are registered and live; the buffer holds
        // `row_stride * height` bytes as checked above.
        let drawn = unsafe {
            sys::ddjvu_page_render(
                raw_page,
                sys::DDJVU_RENDER_COLOR,
                &page_rect,
                &render_rect,
                raw_format,
                row_stride as c_ulong,
                buffer.as_mut_ptr().cast::<c_char>(),
            )
        };
        if drawn == 0 {
            return Err(EngineError::Render(
                "ddjvu_page_render drew nothing".to_string(),
            ));
        }
        Ok(())
    }

    fn peek_message(&self) -> Option<Message> {
        // SAFETY: the context is live; the message stays valid until popped
        // and is copied out before returning.
        unsafe {
            let raw = sys::ddjvu_message_peek(self.context.as_ptr());
            if raw.is_null() {
                return None;
            }
            let any = &*raw;
            let handles = lock(&self.handles);
            let document = resolve(
                &handles.document_ids,
                any.document as usize,
                DocumentId::RETIRED,
            );
            let page = resolve(&handles.page_ids, any.page as usize, PageId::RETIRED);

            let (tag, text) = match any.tag {
                sys::DDJVU_ERROR => {
                    let error = &*raw.cast::<sys::ddjvu_message_error_t>();
                    let text = (!error.message.is_null())
                        .then(|| CStr::from_ptr(error.message).to_string_lossy().into_owned());
                    (MessageTag::Error, text)
                }
                sys::DDJVU_DOCINFO => (MessageTag::DocInfo, None),
                sys::DDJVU_PAGEINFO => (MessageTag::PageInfo, None),
                _ => (MessageTag::Other, None),
            };

            Some(Message {
                tag,
                document,
                page,
                text,
            })
        }
    }

    fn pop_message(&self) {
        // SAFETY: the context is live.
        unsafe { sys::ddjvu_message_pop(self.context.as_ptr()) }
    }
}
