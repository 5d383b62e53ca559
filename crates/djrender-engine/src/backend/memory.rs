//! In-process engine backed by registered bitmaps.
//!
//! Behaves like the native engine as far as callers can observe: opening a
//! document or creating a page returns a handle immediately, the work runs on
//! a background thread, and completion is posted to the context queue. Each
//! document can be scripted to be slow, never become ready, fail to load,
//! fail individual pages or fail rasterization, which makes this backend the
//! test double for session code. `EngineStats` counts every handle created
//! and released.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread;
use std::time::Duration;

use image::RgbImage;
use image::imageops::{self, FilterType};
use tracing::{debug, trace};

use super::{DecodeEngine, EngineContext};
use crate::error::EngineError;
use crate::types::{
    DocumentId, FormatId, JobStatus, Message, PageId, PageInfo, PageInfoQuery, PixelFormat,
    RenderRect,
};
use crate::Result;

const DEFAULT_DPI: u32 = 300;

/// A document the memory engine can open.
#[derive(Debug, Clone)]
pub struct MemoryDocument {
    pages: Vec<RgbImage>,
    dpi: u32,
    decode_delay: Duration,
    never_ready: bool,
    load_error: Option<String>,
    failing_pages: HashSet<usize>,
    raster_failure: bool,
    reported_page_count: Option<i32>,
}

impl MemoryDocument {
    /// A document whose pages are the given bitmaps at their native size.
    pub fn new(pages: Vec<RgbImage>) -> Self {
        Self {
            pages,
            dpi: DEFAULT_DPI,
            decode_delay: Duration::ZERO,
            never_ready: false,
            load_error: None,
            failing_pages: HashSet::new(),
            raster_failure: false,
            reported_page_count: None,
        }
    }

    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.dpi = dpi;
        self
    }

    /// Delay applied to the document decode and to every page decode.
    pub fn with_decode_delay(mut self, delay: Duration) -> Self {
        self.decode_delay = delay;
        self
    }

    /// Never announce the document; only a progress message is posted.
    pub fn never_ready(mut self) -> Self {
        self.never_ready = true;
        self
    }

    /// Post an error instead of `DocInfo`.
    pub fn with_load_error(mut self, text: impl Into<String>) -> Self {
        self.load_error = Some(text.into());
        self
    }

    /// Decoding page `index` ends in `JobStatus::Failed` and an error message.
    pub fn with_failing_page(mut self, index: usize) -> Self {
        self.failing_pages.insert(index);
        self
    }

    /// Every render call is rejected.
    pub fn with_raster_failure(mut self) -> Self {
        self.raster_failure = true;
        self
    }

    /// Page count reported once decoded, regardless of the bitmaps.
    pub fn with_reported_page_count(mut self, count: i32) -> Self {
        self.reported_page_count = Some(count);
        self
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Handle accounting shared by an engine and all of its contexts.
#[derive(Debug, Default)]
pub struct EngineStats {
    contexts_created: AtomicUsize,
    contexts_released: AtomicUsize,
    documents_opened: AtomicUsize,
    documents_released: AtomicUsize,
    pages_created: AtomicUsize,
    pages_released: AtomicUsize,
    formats_created: AtomicUsize,
    formats_released: AtomicUsize,
    render_calls: AtomicUsize,
}

impl EngineStats {
    pub fn contexts_created(&self) -> usize {
        self.contexts_created.load(Ordering::SeqCst)
    }

    pub fn live_contexts(&self) -> usize {
        live(&self.contexts_created, &self.contexts_released)
    }

    pub fn documents_opened(&self) -> usize {
        self.documents_opened.load(Ordering::SeqCst)
    }

    pub fn live_documents(&self) -> usize {
        live(&self.documents_opened, &self.documents_released)
    }

    pub fn pages_created(&self) -> usize {
        self.pages_created.load(Ordering::SeqCst)
    }

    pub fn live_pages(&self) -> usize {
        live(&self.pages_created, &self.pages_released)
    }

    pub fn live_formats(&self) -> usize {
        live(&self.formats_created, &self.formats_released)
    }

    pub fn render_calls(&self) -> usize {
        self.render_calls.load(Ordering::SeqCst)
    }
}

fn live(created: &AtomicUsize, released: &AtomicUsize) -> usize {
    created
        .load(Ordering::SeqCst)
        .saturating_sub(released.load(Ordering::SeqCst))
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Engine serving documents registered by path.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    library: Arc<RwLock<HashMap<PathBuf, Arc<MemoryDocument>>>>,
    stats: Arc<EngineStats>,
    refuse_contexts: AtomicBool,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `document` so that opening `path` finds it.
    pub fn insert(&self, path: impl Into<PathBuf>, document: MemoryDocument) {
        let path = path.into();
        debug!(
            "Registering {} page document at {}",
            document.page_count(),
            path.display()
        );
        self.library
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path, Arc::new(document));
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Make `create_context` fail, as if the engine were out of memory.
    pub fn refuse_contexts(&self, refuse: bool) {
        self.refuse_contexts.store(refuse, Ordering::SeqCst);
    }
}

impl DecodeEngine for MemoryEngine {
    fn name(&self) -> &str {
        "memory"
    }

    fn create_context(&self) -> Result<Arc<dyn EngineContext>> {
        if self.refuse_contexts.load(Ordering::SeqCst) {
            return Err(EngineError::ContextCreate(
                "context allocation refused".to_string(),
            ));
        }

        bump(&self.stats.contexts_created);
        Ok(Arc::new(MemoryContext {
            inner: Arc::new(ContextInner {
                library: Arc::clone(&self.library),
                stats: Arc::clone(&self.stats),
                queue: Mutex::default(),
                documents: Mutex::default(),
                pages: Mutex::default(),
                formats: Mutex::default(),
                next_id: AtomicU64::new(1),
            }),
        }))
    }
}

struct DocumentJob {
    source: Arc<MemoryDocument>,
    status: JobStatus,
}

struct PageJob {
    document: DocumentId,
    index: usize,
    source: Arc<MemoryDocument>,
    status: JobStatus,
}

/// State shared between a context and its decode threads.
struct ContextInner {
    library: Arc<RwLock<HashMap<PathBuf, Arc<MemoryDocument>>>>,
    stats: Arc<EngineStats>,
    queue: Mutex<VecDeque<Message>>,
    documents: Mutex<HashMap<DocumentId, DocumentJob>>,
    pages: Mutex<HashMap<PageId, PageJob>>,
    formats: Mutex<HashMap<FormatId, PixelFormat>>,
    next_id: AtomicU64,
}

impl ContextInner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn post(&self, message: Message) {
        trace!("Posting {:?}", message);
        lock(&self.queue).push_back(message);
    }

    /// The job lock is held across the post, so a poller that sees the final
    /// status also finds the message already queued.
    fn finish_document(&self, id: DocumentId) {
        let mut documents = lock(&self.documents);
        // Released before decoding finished.
        let Some(job) = documents.get_mut(&id) else {
            return;
        };

        let message = if job.source.never_ready {
            Message::other(Some(id), None)
        } else if let Some(text) = &job.source.load_error {
            job.status = JobStatus::Failed;
            Message::error(text.clone(), Some(id), None)
        } else {
            job.status = JobStatus::Ok;
            Message::doc_info(id)
        };
        self.post(message);
    }

    fn finish_page(&self, id: PageId) {
        let mut pages = lock(&self.pages);
        let Some(job) = pages.get_mut(&id) else {
            return;
        };

        let message = if job.source.failing_pages.contains(&job.index) {
            job.status = JobStatus::Failed;
            Message::error(
                format!("page {} is corrupt", job.index + 1),
                Some(job.document),
                Some(id),
            )
        } else {
            job.status = JobStatus::Ok;
            Message::page_info(job.document, id)
        };
        self.post(message);
    }
}

fn spawn_decode(
    inner: Arc<ContextInner>,
    delay: Duration,
    job: impl FnOnce(&ContextInner) + Send + 'static,
) {
    thread::spawn(move || {
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        job(&inner);
    });
}

/// Context handed out by `MemoryEngine`.
pub struct MemoryContext {
    inner: Arc<ContextInner>,
}

impl Drop for MemoryContext {
    fn drop(&mut self) {
        debug!("Releasing memory context");
        bump(&self.inner.stats.contexts_released);
    }
}

impl EngineContext for MemoryContext {
    fn open_document(&self, path: &Path) -> Result<DocumentId> {
        let source = self
            .inner
            .library
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| EngineError::Open {
                path: path.to_path_buf(),
                reason: "no document registered at this path".to_string(),
            })?;

        let id = DocumentId(self.inner.next_id());
        let delay = source.decode_delay;
        lock(&self.inner.documents).insert(
            id,
            DocumentJob {
                source,
                status: JobStatus::Started,
            },
        );
        bump(&self.inner.stats.documents_opened);
        debug!("Opened {} as {:?}", path.display(), id);

        spawn_decode(Arc::clone(&self.inner), delay, move |inner| {
            inner.finish_document(id)
        });
        Ok(id)
    }

    fn release_document(&self, document: DocumentId) {
        if lock(&self.inner.documents).remove(&document).is_some() {
            bump(&self.inner.stats.documents_released);
        }
    }

    fn document_status(&self, document: DocumentId) -> JobStatus {
        lock(&self.inner.documents)
            .get(&document)
            .map(|job| job.status)
            .unwrap_or(JobStatus::Failed)
    }

    fn page_count(&self, document: DocumentId) -> i32 {
        let documents = lock(&self.inner.documents);
        match documents.get(&document) {
            Some(job) if job.status == JobStatus::Ok => job
                .source
                .reported_page_count
                .unwrap_or(job.source.pages.len() as i32),
            _ => 0,
        }
    }

    fn page_info(&self, document: DocumentId, index: usize) -> PageInfoQuery {
        let documents = lock(&self.inner.documents);
        let Some(job) = documents.get(&document) else {
            return PageInfoQuery::Failed;
        };

        match job.status {
            JobStatus::Ok => job
                .source
                .pages
                .get(index)
                .map(|page| {
                    PageInfoQuery::Ready(PageInfo {
                        width: page.width(),
                        height: page.height(),
                        dpi: job.source.dpi,
                        rotation: 0,
                    })
                })
                .unwrap_or(PageInfoQuery::Failed),
            status if status.is_error() => PageInfoQuery::Failed,
            _ => PageInfoQuery::Pending,
        }
    }

    fn create_page(&self, document: DocumentId, index: usize) -> Result<PageId> {
        let source = {
            let documents = lock(&self.inner.documents);
            let job = documents
                .get(&document)
                .ok_or(EngineError::UnknownDocument(document))?;

            if job.status != JobStatus::Ok {
                return Err(EngineError::PageCreate {
                    index,
                    reason: format!("document is not decoded ({:?})", job.status),
                });
            }
            if index >= job.source.pages.len() {
                return Err(EngineError::PageCreate {
                    index,
                    reason: format!("document has {} pages", job.source.pages.len()),
                });
            }
            Arc::clone(&job.source)
        };

        let id = PageId(self.inner.next_id());
        let delay = source.decode_delay;
        lock(&self.inner.pages).insert(
            id,
            PageJob {
                document,
                index,
                source,
                status: JobStatus::Started,
            },
        );
        bump(&self.inner.stats.pages_created);
        trace!("Decoding page {} of {:?} as {:?}", index, document, id);

        spawn_decode(Arc::clone(&self.inner), delay, move |inner| {
            inner.finish_page(id)
        });
        Ok(id)
    }

    fn page_status(&self, page: PageId) -> JobStatus {
        lock(&self.inner.pages)
            .get(&page)
            .map(|job| job.status)
            .unwrap_or(JobStatus::Failed)
    }

    fn release_page(&self, page: PageId) {
        if lock(&self.inner.pages).remove(&page).is_some() {
            bump(&self.inner.stats.pages_released);
        }
    }

    fn create_format(&self, format: PixelFormat) -> Result<FormatId> {
        let id = FormatId(self.inner.next_id());
        lock(&self.inner.formats).insert(id, format);
        bump(&self.inner.stats.formats_created);
        Ok(id)
    }

    fn release_format(&self, format: FormatId) {
        if lock(&self.inner.formats).remove(&format).is_some() {
            bump(&self.inner.stats.formats_released);
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
        bump(&self.inner.stats.render_calls);

        let format = lock(&self.inner.formats)
            .get(&format)
            .copied()
            .ok_or(EngineError::UnknownFormat(format))?;
        let (source, index, status) = {
            let pages = lock(&self.inner.pages);
            let job = pages.get(&page).ok_or(EngineError::UnknownPage(page))?;
            (Arc::clone(&job.source), job.index, job.status)
        };

        if status != JobStatus::Ok {
            return Err(EngineError::Render(format!(
                "page is not decoded ({:?})",
                status
            )));
        }
        if source.raster_failure {
            return Err(EngineError::Render(
                "rasterizer rejected the page".to_string(),
            ));
        }
        if page_rect.width == 0 || page_rect.height == 0 {
            return Err(EngineError::Render("empty page rectangle".to_string()));
        }

        let row_len = render_rect.width as usize * format.style.bytes_per_pixel();
        if row_stride < row_len {
            return Err(EngineError::Render(format!(
                "row stride {} is shorter than a row ({} bytes)",
                row_stride, row_len
            )));
        }
        let needed = row_stride * render_rect.height as usize;
        if buffer.len() < needed {
            return Err(EngineError::Render(format!(
                "buffer holds {} bytes, {} needed",
                buffer.len(),
                needed
            )));
        }

        let left = i64::from(render_rect.x) - i64::from(page_rect.x);
        let top = if format.y_top_to_bottom {
            i64::from(render_rect.y) - i64::from(page_rect.y)
        } else {
            (i64::from(page_rect.y) + i64::from(page_rect.height))
                - (i64::from(render_rect.y) + i64::from(render_rect.height))
        };
        if left < 0
            || top < 0
            || left + i64::from(render_rect.width) > i64::from(page_rect.width)
            || top + i64::from(render_rect.height) > i64::from(page_rect.height)
        {
            return Err(EngineError::Render(
                "render rectangle lies outside the page".to_string(),
            ));
        }

        let scaled = imageops::resize(
            &source.pages[index],
            page_rect.width,
            page_rect.height,
            FilterType::Nearest,
        );
        let pixels = scaled.as_raw();
        let page_width = page_rect.width as usize;
        let (left, top) = (left as usize, top as usize);

        for row in 0..render_rect.height as usize {
            let src_start = ((top + row) * page_width + left) * 3;
            let dst_row = if format.rows_top_to_bottom {
                row
            } else {
                render_rect.height as usize - 1 - row
            };
            let dst_start = dst_row * row_stride;
            buffer[dst_start..dst_start + row_len]
                .copy_from_slice(&pixels[src_start..src_start + row_len]);
        }

        trace!(
            "Rendered page {} at {}x{}",
            index, page_rect.width, page_rect.height
        );
        Ok(())
    }

    fn peek_message(&self) -> Option<Message> {
        lock(&self.inner.queue).front().cloned()
    }

    fn pop_message(&self) {
        lock(&self.inner.queue).pop_front();
    }
}
