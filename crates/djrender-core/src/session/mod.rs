//! Decode sessions: one engine context, at most one open document.

mod handles;
mod loader;
mod render;
pub mod waiter;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use djrender_engine::{DecodeEngine, EngineContext};
use tracing::{debug, info};

use crate::error::{Result, SessionError};
use crate::format::DocumentFormat;
use crate::models::config::{PageWaitStrategy, SessionConfig};
use crate::models::page::{
    FOREIGN_PLACEHOLDER_PAGE_COUNT, FOREIGN_PLACEHOLDER_SIZE, PageRequest, PageSize, RenderOutcome,
};
use handles::DocumentHandle;
use loader::Loaded;

/// Where a session stands with respect to its document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Empty,
    Ready {
        format: DocumentFormat,
        page_count: usize,
    },
    /// The last load failed; a new `load` is needed.
    Failed(String),
}

/// A stateful decode session.
///
/// `load` takes `&mut self` and is the only writer of the session's state;
/// `render_page` and `page_dimensions` take `&self` and may run concurrently
/// from several threads. `teardown` also needs exclusive access, so it can
/// never overlap a render.
pub struct Session {
    // Declared before `context`: fields drop in order, document first.
    document: Option<DocumentHandle>,
    context: Option<Arc<dyn EngineContext>>,
    state: LoadState,
    path: Option<PathBuf>,
    config: SessionConfig,
    render_lock: Mutex<()>,
}

impl Session {
    /// Create a session with the default configuration.
    pub fn init(engine: &dyn DecodeEngine) -> Result<Self> {
        Self::with_config(engine, SessionConfig::default())
    }

    /// Create a session; fails only if the engine cannot allocate a context.
    pub fn with_config(engine: &dyn DecodeEngine, config: SessionConfig) -> Result<Self> {
        let context = engine.create_context()?;
        debug!("Created session on the {} engine", engine.name());

        Ok(Self {
            document: None,
            context: Some(context),
            state: LoadState::Empty,
            path: None,
            config,
            render_lock: Mutex::new(()),
        })
    }

    /// Load a document, replacing any previously loaded one.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<DocumentFormat> {
        let path = path.as_ref();
        let context = self.context.clone().ok_or(SessionError::TornDown)?;

        // Never hold two documents at once.
        if self.document.take().is_some() {
            debug!("Released previous document before reload");
        }
        self.state = LoadState::Empty;
        self.path = Some(path.to_path_buf());

        match loader::load_document(&context, path, &self.config) {
            Ok(Loaded::Native {
                document,
                page_count,
            }) => {
                self.document = Some(document);
                self.state = LoadState::Ready {
                    format: DocumentFormat::Native,
                    page_count,
                };
                Ok(DocumentFormat::Native)
            }
            Ok(Loaded::Foreign) => {
                info!("{} will be rendered by the foreign renderer", path.display());
                self.state = LoadState::Ready {
                    format: DocumentFormat::Foreign,
                    page_count: FOREIGN_PLACEHOLDER_PAGE_COUNT,
                };
                Ok(DocumentFormat::Foreign)
            }
            Err(e) => {
                self.state = LoadState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Page count, or `-1` when no document is loaded.
    pub fn page_count(&self) -> i32 {
        match self.state {
            LoadState::Ready { page_count, .. } => i32::try_from(page_count).unwrap_or(i32::MAX),
            _ => -1,
        }
    }

    pub fn is_foreign_format(&self) -> bool {
        matches!(
            self.state,
            LoadState::Ready {
                format: DocumentFormat::Foreign,
                ..
            }
        )
    }

    /// Stored size of a page. Foreign documents report
    /// `FOREIGN_PLACEHOLDER_SIZE`.
    pub fn page_dimensions(&self, index: usize) -> Result<PageSize> {
        let (context, format, page_count) = self.ready()?;
        if index >= page_count {
            return Err(SessionError::PageOutOfRange {
                index,
                count: page_count,
            });
        }

        match (format, &self.document) {
            (DocumentFormat::Foreign, _) => Ok(FOREIGN_PLACEHOLDER_SIZE),
            (DocumentFormat::Native, Some(document)) => {
                render::native_page_size(context, document.id(), index, &self.config)
            }
            (DocumentFormat::Native, None) => Err(SessionError::NoDocument),
        }
    }

    /// Render page `index` at `width` x `height` into `out`, which must hold
    /// at least `width * height * 4` bytes.
    ///
    /// Returns `RenderOutcome::Delegate` for foreign documents without
    /// touching `out`.
    pub fn render_page(
        &self,
        index: usize,
        width: u32,
        height: u32,
        out: &mut [u8],
    ) -> Result<RenderOutcome> {
        let (context, format, page_count) = self.ready()?;
        let request = PageRequest::new(index, width, height);
        if index >= page_count {
            return Err(SessionError::PageOutOfRange {
                index,
                count: page_count,
            });
        }
        if format == DocumentFormat::Foreign {
            return Ok(RenderOutcome::Delegate);
        }

        request.validate(page_count, &self.config.limits)?;
        if out.len() < request.rgba_len() {
            return Err(SessionError::InvalidArgument(format!(
                "output buffer holds {} bytes, {} needed",
                out.len(),
                request.rgba_len()
            )));
        }

        let document = self.document.as_ref().ok_or(SessionError::NoDocument)?;
        let _serialized = match self.config.page_wait_strategy {
            PageWaitStrategy::Message => {
                Some(self.render_lock.lock().unwrap_or_else(PoisonError::into_inner))
            }
            PageWaitStrategy::Status => None,
        };
        render::render_native(context, document.id(), request, out, &self.config)?;
        Ok(RenderOutcome::Rendered)
    }

    /// Release the document, then the context. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        if self.document.take().is_some() {
            debug!("Released document");
        }
        if self.context.take().is_some() {
            debug!("Released engine context");
        }
        self.state = LoadState::Empty;
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    /// Path given to the last `load`.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn ready(&self) -> Result<(&dyn EngineContext, DocumentFormat, usize)> {
        let context = self.context.as_deref().ok_or(SessionError::TornDown)?;
        match self.state {
            LoadState::Ready { format, page_count } => Ok((context, format, page_count)),
            _ => Err(SessionError::NoDocument),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use djrender_engine::{MemoryDocument, MemoryEngine};
    use image::{Rgb, RgbImage};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use crate::models::config::WaitBudget;

    const DJVU_HEADER: &[u8] = b"AT&TFORM\x00\x00\x00\x20DJVMDIRM";

    fn fast_config() -> SessionConfig {
        SessionConfig {
            document_wait: WaitBudget::new(200, 2),
            page_wait: WaitBudget::new(200, 2),
            ..SessionConfig::default()
        }
    }

    /// Page with four solid quadrants, top-left coloured `tl`.
    fn quadrants(width: u32, height: u32, tl: [u8; 3]) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| match (x < width / 2, y < height / 2) {
            (true, true) => Rgb(tl),
            (false, true) => Rgb([0, 255, 0]),
            (true, false) => Rgb([0, 0, 255]),
            (false, false) => Rgb([255, 255, 255]),
        })
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        engine: Arc<MemoryEngine>,
        path: PathBuf,
    }

    fn fixture(document: MemoryDocument) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.djvu");
        std::fs::write(&path, DJVU_HEADER).unwrap();
        let engine = Arc::new(MemoryEngine::new());
        engine.insert(&path, document);
        Fixture {
            _dir: dir,
            engine,
            path,
        }
    }

    fn three_pages() -> MemoryDocument {
        MemoryDocument::new(vec![
            quadrants(1700, 2200, [200, 10, 10]),
            quadrants(1200, 1600, [10, 200, 10]),
            quadrants(800, 800, [10, 10, 200]),
        ])
        .with_decode_delay(Duration::from_millis(3))
    }

    fn loaded(fixture: &Fixture) -> Session {
        let mut session = Session::with_config(fixture.engine.as_ref(), fast_config()).unwrap();
        assert_eq!(session.load(&fixture.path).unwrap(), DocumentFormat::Native);
        session
    }

    #[test]
    fn test_page_count_before_load() {
        let engine = MemoryEngine::new();
        let session = Session::init(&engine).unwrap();
        assert_eq!(session.page_count(), -1);
        assert_eq!(session.state(), &LoadState::Empty);
        assert!(!session.is_foreign_format());
        assert!(matches!(
            session.render_page(0, 10, 10, &mut [0u8; 400]),
            Err(SessionError::NoDocument)
        ));
    }

    #[test]
    fn test_init_fails_without_context() {
        let engine = MemoryEngine::new();
        engine.refuse_contexts(true);
        assert!(matches!(
            Session::init(&engine),
            Err(SessionError::Engine(_))
        ));
    }

    #[test]
    fn test_three_page_document() {
        let fixture = fixture(three_pages());
        let session = loaded(&fixture);

        assert_eq!(session.page_count(), 3);
        assert_eq!(session.page_dimensions(0).unwrap(), PageSize::new(1700, 2200));
        assert_eq!(session.page_dimensions(2).unwrap(), PageSize::new(800, 800));

        let mut buf = vec![0u8; 400 * 600 * 4];
        assert_eq!(
            session.render_page(0, 400, 600, &mut buf).unwrap(),
            RenderOutcome::Rendered
        );
        assert_eq!(&buf[0..4], &[200, 10, 10, 255]);
        // Bottom-right pixel falls in the white quadrant.
        assert_eq!(&buf[buf.len() - 4..], &[255, 255, 255, 255]);
    }

    #[test]
    fn test_every_page_renders_opaque() {
        let fixture = fixture(three_pages());
        let session = loaded(&fixture);

        for index in 0..3 {
            let mut buf = vec![0u8; 64 * 48 * 4];
            session.render_page(index, 64, 48, &mut buf).unwrap();
            assert!(buf.chunks_exact(4).all(|px| px[3] == 255), "page {index}");
        }

        let stats = fixture.engine.stats();
        assert_eq!(stats.live_pages(), 0);
        assert_eq!(stats.live_formats(), 0);
    }

    #[test]
    fn test_render_is_deterministic() {
        let fixture = fixture(three_pages());
        let session = loaded(&fixture);

        let mut first = vec![0u8; 123 * 77 * 4];
        let mut second = vec![0u8; 123 * 77 * 4];
        session.render_page(1, 123, 77, &mut first).unwrap();
        session.render_page(1, 123, 77, &mut second).unwrap();
        assert!(first == second);
    }

    #[test]
    fn test_page_out_of_range() {
        let fixture = fixture(three_pages());
        let session = loaded(&fixture);

        let mut buf = vec![0u8; 16];
        assert!(matches!(
            session.render_page(3, 2, 2, &mut buf),
            Err(SessionError::PageOutOfRange { index: 3, count: 3 })
        ));
        assert!(matches!(
            session.page_dimensions(3),
            Err(SessionError::PageOutOfRange { .. })
        ));
    }

    #[test]
    fn test_oversized_requests_fail_before_any_work() {
        let fixture = fixture(three_pages());
        let session = loaded(&fixture);

        let mut buf = Vec::new();
        assert!(matches!(
            session.render_page(0, 10_001, 10, &mut buf),
            Err(SessionError::DimensionTooLarge { .. })
        ));
        assert!(matches!(
            session.render_page(0, 6_000, 6_000, &mut buf),
            Err(SessionError::PixelBudgetExceeded { .. })
        ));

        let stats = fixture.engine.stats();
        assert_eq!(stats.pages_created(), 0);
        assert_eq!(stats.render_calls(), 0);
    }

    #[test]
    fn test_configured_limits_apply() {
        let fixture = fixture(three_pages());
        let mut config = fast_config();
        config.limits.max_dimension = 100;
        let mut session = Session::with_config(fixture.engine.as_ref(), config).unwrap();
        session.load(&fixture.path).unwrap();

        let mut buf = vec![0u8; 101 * 10 * 4];
        assert!(matches!(
            session.render_page(0, 101, 10, &mut buf),
            Err(SessionError::DimensionTooLarge { max: 100, .. })
        ));
    }

    #[test]
    fn test_short_output_buffer() {
        let fixture = fixture(three_pages());
        let session = loaded(&fixture);

        let mut buf = vec![0u8; 10 * 10 * 4 - 1];
        assert!(matches!(
            session.render_page(0, 10, 10, &mut buf),
            Err(SessionError::InvalidArgument(_))
        ));
        assert_eq!(fixture.engine.stats().pages_created(), 0);
    }

    #[test]
    fn test_failed_page_is_unwound_and_session_stays_usable() {
        let fixture = fixture(three_pages().with_failing_page(1));
        let session = loaded(&fixture);

        let mut buf = vec![7u8; 20 * 20 * 4];
        let error = session.render_page(1, 20, 20, &mut buf).unwrap_err();
        assert!(
            matches!(
                error,
                SessionError::DecodeFailed { page: 1, .. } | SessionError::DecodeError(_)
            ),
            "{error}"
        );
        assert!(error.is_retryable());
        assert!(buf.iter().all(|&b| b == 7));
        assert_eq!(fixture.engine.stats().live_pages(), 0);

        assert_eq!(
            session.render_page(0, 20, 20, &mut buf).unwrap(),
            RenderOutcome::Rendered
        );
    }

    #[test]
    fn test_reload_after_failed_page() {
        let fixture = fixture(
            MemoryDocument::new(vec![
                quadrants(40, 40, [200, 10, 10]),
                quadrants(40, 40, [10, 200, 10]),
            ])
            .with_failing_page(1)
            .with_decode_delay(Duration::from_millis(3)),
        );
        let mut session = loaded(&fixture);

        let mut buf = vec![0u8; 10 * 10 * 4];
        assert!(session.render_page(1, 10, 10, &mut buf).is_err());

        assert_eq!(session.load(&fixture.path).unwrap(), DocumentFormat::Native);
        assert_eq!(session.page_count(), 2);
        session.render_page(0, 10, 10, &mut buf).unwrap();
        assert_eq!(&buf[0..4], &[200, 10, 10, 255]);
    }

    #[test]
    fn test_failed_page_leaves_no_messages_behind() {
        let fixture = fixture(three_pages().with_failing_page(2));
        let mut config = fast_config();
        config.page_wait_strategy = PageWaitStrategy::Message;
        let mut session = Session::with_config(fixture.engine.as_ref(), config).unwrap();
        session.load(&fixture.path).unwrap();

        let mut buf = vec![0u8; 10 * 10 * 4];
        assert!(session.render_page(2, 10, 10, &mut buf).is_err());
        assert_eq!(
            session.render_page(0, 10, 10, &mut buf).unwrap(),
            RenderOutcome::Rendered
        );
    }

    #[test]
    fn test_raster_failure_leaves_buffer_untouched() {
        let fixture = fixture(three_pages().with_raster_failure());
        let session = loaded(&fixture);

        let mut buf = vec![7u8; 8 * 8 * 4];
        assert!(matches!(
            session.render_page(0, 8, 8, &mut buf),
            Err(SessionError::RasterFailed { page: 0, .. })
        ));
        assert!(buf.iter().all(|&b| b == 7));

        let stats = fixture.engine.stats();
        assert_eq!(stats.live_pages(), 0);
        assert_eq!(stats.live_formats(), 0);
    }

    #[test]
    fn test_page_decode_timeout() {
        let fixture = fixture(
            MemoryDocument::new(vec![quadrants(10, 10, [0, 0, 0])])
                .with_decode_delay(Duration::from_millis(300)),
        );
        let mut config = fast_config();
        config.document_wait = WaitBudget::new(100, 10);
        config.page_wait = WaitBudget::new(3, 1);
        let mut session = Session::with_config(fixture.engine.as_ref(), config).unwrap();
        session.load(&fixture.path).unwrap();

        let mut buf = vec![0u8; 10 * 10 * 4];
        assert!(matches!(
            session.render_page(0, 10, 10, &mut buf),
            Err(SessionError::Timeout {
                stage: crate::error::WaitStage::PageDecode,
                attempts: 3
            })
        ));
        assert_eq!(fixture.engine.stats().live_pages(), 0);
    }

    #[test]
    fn test_load_timeout_keeps_page_count_unset() {
        let fixture = fixture(MemoryDocument::new(vec![quadrants(4, 4, [0, 0, 0])]).never_ready());
        let mut config = fast_config();
        config.document_wait = WaitBudget::new(4, 1);
        let mut session = Session::with_config(fixture.engine.as_ref(), config).unwrap();

        assert!(matches!(
            session.load(&fixture.path),
            Err(SessionError::Timeout { .. })
        ));
        assert_eq!(session.page_count(), -1);
        assert!(matches!(session.state(), LoadState::Failed(_)));
        assert_eq!(fixture.engine.stats().live_documents(), 0);
    }

    #[test]
    fn test_foreign_document() {
        let engine = MemoryEngine::new();
        let mut session = Session::init(&engine).unwrap();

        assert_eq!(session.load("/library/paper.pdf").unwrap(), DocumentFormat::Foreign);
        assert!(session.is_foreign_format());
        assert_eq!(session.page_count(), 1);
        assert_eq!(session.page_dimensions(0).unwrap(), FOREIGN_PLACEHOLDER_SIZE);
        assert_eq!(FOREIGN_PLACEHOLDER_SIZE, PageSize::new(612, 792));

        let mut buf = vec![9u8; 16];
        assert_eq!(
            session.render_page(0, 2, 2, &mut buf).unwrap(),
            RenderOutcome::Delegate
        );
        assert!(buf.iter().all(|&b| b == 9));
        assert_eq!(engine.stats().documents_opened(), 0);
    }

    #[test]
    fn test_reload_releases_previous_document() {
        let fixture = fixture(three_pages());
        let mut session = loaded(&fixture);
        assert_eq!(fixture.engine.stats().live_documents(), 1);

        session.load(&fixture.path).unwrap();
        assert_eq!(fixture.engine.stats().documents_opened(), 2);
        assert_eq!(fixture.engine.stats().live_documents(), 1);

        session.load("/library/paper.pdf").unwrap();
        assert_eq!(fixture.engine.stats().live_documents(), 0);
        assert_eq!(session.path(), Some(Path::new("/library/paper.pdf")));
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let fixture = fixture(three_pages());
        let mut session = loaded(&fixture);

        session.teardown();
        session.teardown();
        let stats = fixture.engine.stats();
        assert_eq!(stats.live_documents(), 0);
        assert_eq!(stats.live_contexts(), 0);

        assert_eq!(session.page_count(), -1);
        assert!(matches!(session.load(&fixture.path), Err(SessionError::TornDown)));
        drop(session);
        assert_eq!(fixture.engine.stats().live_contexts(), 0);
    }

    #[test]
    fn test_drop_releases_everything() {
        let fixture = fixture(three_pages());
        let session = loaded(&fixture);
        drop(session);

        let stats = fixture.engine.stats();
        assert_eq!(stats.live_documents(), 0);
        assert_eq!(stats.live_contexts(), 0);
    }

    fn render_concurrently(session: &Session) -> (Vec<u8>, Vec<u8>) {
        thread::scope(|scope| {
            let first = scope.spawn(|| {
                let mut buf = vec![0u8; 50 * 60 * 4];
                session.render_page(0, 50, 60, &mut buf).unwrap();
                buf
            });
            let third = scope.spawn(|| {
                let mut buf = vec![0u8; 50 * 60 * 4];
                session.render_page(2, 50, 60, &mut buf).unwrap();
                buf
            });
            (first.join().unwrap(), third.join().unwrap())
        })
    }

    #[test]
    fn test_concurrent_renders_of_different_pages() {
        let fixture = fixture(three_pages());
        let session = loaded(&fixture);

        let (first, third) = render_concurrently(&session);
        assert_eq!(&first[0..4], &[200, 10, 10, 255]);
        assert_eq!(&third[0..4], &[10, 10, 200, 255]);

        let mut expected = vec![0u8; 50 * 60 * 4];
        session.render_page(0, 50, 60, &mut expected).unwrap();
        assert!(first == expected);
        assert_eq!(fixture.engine.stats().live_pages(), 0);
    }

    #[test]
    fn test_concurrent_renders_with_message_strategy() {
        let fixture = fixture(three_pages());
        let mut config = fast_config();
        config.page_wait_strategy = PageWaitStrategy::Message;
        let mut session = Session::with_config(fixture.engine.as_ref(), config).unwrap();
        session.load(&fixture.path).unwrap();

        let (first, third) = render_concurrently(&session);
        assert_eq!(&first[0..4], &[200, 10, 10, 255]);
        assert_eq!(&third[0..4], &[10, 10, 200, 255]);
    }
}
