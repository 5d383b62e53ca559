//! Synchronous waits on top of the engine's asynchronous message queue.
//!
//! The engine has no blocking wait primitive, so every wait is an
//! attempt-bounded poll: each attempt first asks the condition whether it is
//! already resolved, then looks at the oldest queued message. An empty queue
//! costs one sleep; a message is popped and classified. Messages are consumed
//! strictly in delivery order and never requeued, since the queue is shared by
//! everything running in the context.

use std::thread;

use djrender_engine::{
    DocumentId, EngineContext, HandleRef, JobStatus, Message, MessageTag, PageId, PageInfo,
    PageInfoQuery,
};
use tracing::{debug, trace, warn};

use crate::models::config::WaitBudget;

/// How a wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Satisfied,
    /// A polled job reached `Failed` or `Stopped`.
    Failed(JobStatus),
    /// An error message ended the wait.
    ErrorSeen(String),
    TimedOut,
}

/// What to do with a popped message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Satisfied,
    Discard,
    Abort(String),
}

/// A condition to wait for.
pub trait Readiness {
    /// Direct status check, made once per attempt before the queue is read.
    fn poll(&mut self, _context: &dyn EngineContext) -> Option<WaitOutcome> {
        None
    }

    /// Classify a message that has just been popped.
    fn classify(&self, message: &Message) -> Verdict;
}

/// Wait until `readiness` is met, an error is seen, or `budget` runs out.
pub fn wait_until<R>(
    context: &dyn EngineContext,
    readiness: &mut R,
    budget: WaitBudget,
) -> WaitOutcome
where
    R: Readiness + ?Sized,
{
    for attempt in 1..=budget.max_attempts {
        if let Some(outcome) = readiness.poll(context) {
            return outcome;
        }

        let Some(message) = context.peek_message() else {
            thread::sleep(budget.poll_interval());
            continue;
        };
        context.pop_message();

        match readiness.classify(&message) {
            Verdict::Satisfied => {
                trace!("Wait satisfied on attempt {}", attempt);
                return WaitOutcome::Satisfied;
            }
            Verdict::Abort(text) => return WaitOutcome::ErrorSeen(text),
            Verdict::Discard => trace!("Discarded {:?}", message.tag),
        }
    }

    // The last sleep may have been enough.
    readiness.poll(context).unwrap_or(WaitOutcome::TimedOut)
}

/// Pop the messages at the head of the queue that concern `handle`.
///
/// A status-polled wait can finish before its own messages are read; this
/// takes them out before the handle is released.
pub fn discard_leading(context: &dyn EngineContext, handle: HandleRef) -> usize {
    let mut discarded = 0;
    while context
        .peek_message()
        .is_some_and(|message| message.refers_to(handle))
    {
        context.pop_message();
        discarded += 1;
    }
    if discarded > 0 {
        trace!("Discarded {} leftover messages for {:?}", discarded, handle);
    }
    discarded
}

/// Empty the queue. Only valid while nothing is waiting on it.
pub fn flush(context: &dyn EngineContext) -> usize {
    let mut flushed = 0;
    while context.peek_message().is_some() {
        context.pop_message();
        flushed += 1;
    }
    if flushed > 0 {
        debug!("Flushed {} stale messages", flushed);
    }
    flushed
}

/// Waits for `DocInfo` about one document. Any error message aborts unless it
/// names a handle that has already been released.
pub struct DocumentReady {
    document: DocumentId,
}

impl DocumentReady {
    pub fn new(document: DocumentId) -> Self {
        Self { document }
    }
}

impl Readiness for DocumentReady {
    fn classify(&self, message: &Message) -> Verdict {
        match message.tag {
            MessageTag::DocInfo if message.refers_to(HandleRef::Document(self.document)) => {
                Verdict::Satisfied
            }
            MessageTag::Error if !message.is_stale() => Verdict::Abort(message.error_text()),
            _ => Verdict::Discard,
        }
    }
}

/// Waits for `PageInfo` about one page. Any live error message aborts.
///
/// Only correct while no other waiter drains the same queue.
pub struct PageMessage {
    page: PageId,
}

impl PageMessage {
    pub fn new(page: PageId) -> Self {
        Self { page }
    }
}

impl Readiness for PageMessage {
    fn classify(&self, message: &Message) -> Verdict {
        match message.tag {
            MessageTag::PageInfo if message.refers_to(HandleRef::Page(self.page)) => {
                Verdict::Satisfied
            }
            MessageTag::Error if !message.is_stale() => Verdict::Abort(message.error_text()),
            _ => Verdict::Discard,
        }
    }
}

/// Waits for a page job to reach a terminal status by polling it directly.
///
/// Messages only drain the queue. An error scoped to a different page is
/// dropped, since that page's own waiter learns about it from its status.
pub struct PageDecoded {
    page: PageId,
}

impl PageDecoded {
    pub fn new(page: PageId) -> Self {
        Self { page }
    }
}

impl Readiness for PageDecoded {
    fn poll(&mut self, context: &dyn EngineContext) -> Option<WaitOutcome> {
        match context.page_status(self.page) {
            JobStatus::Ok => Some(WaitOutcome::Satisfied),
            status if status.is_error() => Some(WaitOutcome::Failed(status)),
            _ => None,
        }
    }

    fn classify(&self, message: &Message) -> Verdict {
        classify_scoped_error(message, HandleRef::Page(self.page))
    }
}

/// Waits for a page's stored geometry, which the engine may still be decoding.
pub struct PageInfoReady {
    document: DocumentId,
    index: usize,
    info: Option<PageInfo>,
}

impl PageInfoReady {
    pub fn new(document: DocumentId, index: usize) -> Self {
        Self {
            document,
            index,
            info: None,
        }
    }

    /// The geometry, once the wait is satisfied.
    pub fn info(&self) -> Option<PageInfo> {
        self.info
    }
}

impl Readiness for PageInfoReady {
    fn poll(&mut self, context: &dyn EngineContext) -> Option<WaitOutcome> {
        match context.page_info(self.document, self.index) {
            PageInfoQuery::Ready(info) => {
                self.info = Some(info);
                Some(WaitOutcome::Satisfied)
            }
            PageInfoQuery::Failed => Some(WaitOutcome::Failed(JobStatus::Failed)),
            PageInfoQuery::Pending => None,
        }
    }

    fn classify(&self, message: &Message) -> Verdict {
        classify_scoped_error(message, HandleRef::Document(self.document))
    }
}

/// Errors abort unless they name a released handle, a different handle of the
/// same kind, or a page while a document-level query is waiting.
fn classify_scoped_error(message: &Message, ours: HandleRef) -> Verdict {
    if message.tag != MessageTag::Error {
        return Verdict::Discard;
    }
    if message.is_stale() {
        trace!("Dropping error for a released handle: {}", message.error_text());
        return Verdict::Discard;
    }

    let foreign = match (ours, message.target()) {
        (HandleRef::Page(page), Some(HandleRef::Page(other))) => page != other,
        (HandleRef::Document(doc), Some(HandleRef::Document(other))) => doc != other,
        (HandleRef::Document(_), Some(HandleRef::Page(_))) => true,
        _ => false,
    };
    if foreign {
        warn!("Dropping error for {:?}: {}", message.target(), message.error_text());
        Verdict::Discard
    } else {
        Verdict::Abort(message.error_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use djrender_engine::{
        FormatId, PixelFormat, RenderRect, Result as EngineResult,
    };
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Context whose queue and page status are set by the test.
    #[derive(Default)]
    struct ScriptedContext {
        queue: Mutex<VecDeque<Message>>,
        page_status: Mutex<Option<JobStatus>>,
        /// Page status turns `Ok` after this many polls.
        ok_after_polls: Option<usize>,
        polls: AtomicUsize,
    }

    impl ScriptedContext {
        fn with_messages(messages: Vec<Message>) -> Self {
            Self {
                queue: Mutex::new(messages.into()),
                ..Self::default()
            }
        }

        fn remaining(&self) -> usize {
            self.queue.lock().unwrap().len()
        }
    }

    impl EngineContext for ScriptedContext {
        fn open_document(&self, _path: &Path) -> EngineResult<DocumentId> {
            Ok(DocumentId(1))
        }
        fn release_document(&self, _document: DocumentId) {}
        fn document_status(&self, _document: DocumentId) -> JobStatus {
            JobStatus::Started
        }
        fn page_count(&self, _document: DocumentId) -> i32 {
            0
        }
        fn page_info(&self, _document: DocumentId, _index: usize) -> PageInfoQuery {
            PageInfoQuery::Pending
        }
        fn create_page(&self, _document: DocumentId, _index: usize) -> EngineResult<PageId> {
            Ok(PageId(1))
        }
        fn page_status(&self, _page: PageId) -> JobStatus {
            let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.ok_after_polls.is_some_and(|n| polls >= n) {
                return JobStatus::Ok;
            }
            self.page_status.lock().unwrap().unwrap_or(JobStatus::Started)
        }
        fn release_page(&self, _page: PageId) {}
        fn create_format(&self, _format: PixelFormat) -> EngineResult<FormatId> {
            Ok(FormatId(1))
        }
        fn release_format(&self, _format: FormatId) {}
        fn render_page(
            &self,
            _page: PageId,
            _format: FormatId,
            _page_rect: RenderRect,
            _render_rect: RenderRect,
            _row_stride: usize,
            _buffer: &mut [u8],
        ) -> EngineResult<()> {
            Ok(())
        }
        fn peek_message(&self) -> Option<Message> {
            self.queue.lock().unwrap().front().cloned()
        }
        fn pop_message(&self) {
            self.queue.lock().unwrap().pop_front();
        }
    }

    const FAST: WaitBudget = WaitBudget::new(5, 1);

    #[test]
    fn test_document_ready_skips_unrelated_messages() {
        let doc = DocumentId(1);
        let context = ScriptedContext::with_messages(vec![
            Message::other(Some(doc), None),
            Message::doc_info(DocumentId(9)),
            Message::doc_info(doc),
            Message::other(None, None),
        ]);

        let outcome = wait_until(&context, &mut DocumentReady::new(doc), FAST);
        assert_eq!(outcome, WaitOutcome::Satisfied);
        // The trailing message stays queued.
        assert_eq!(context.remaining(), 1);
    }

    #[test]
    fn test_any_error_aborts_document_wait() {
        let context = ScriptedContext::with_messages(vec![
            Message::error("unrelated failure", Some(DocumentId(9)), None),
            Message::doc_info(DocumentId(1)),
        ]);

        let outcome = wait_until(&context, &mut DocumentReady::new(DocumentId(1)), FAST);
        assert_eq!(outcome, WaitOutcome::ErrorSeen("unrelated failure".to_string()));
        assert_eq!(context.remaining(), 1);
    }

    #[test]
    fn test_times_out_on_empty_queue() {
        let context = ScriptedContext::default();
        let outcome = wait_until(&context, &mut DocumentReady::new(DocumentId(1)), FAST);
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[test]
    fn test_other_messages_consume_attempts() {
        let doc = DocumentId(1);
        let mut messages = vec![Message::other(None, None); 5];
        messages.push(Message::doc_info(doc));
        let context = ScriptedContext::with_messages(messages);

        let outcome = wait_until(&context, &mut DocumentReady::new(doc), FAST);
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert_eq!(context.remaining(), 1);
    }

    #[test]
    fn test_page_message_strategy() {
        let context = ScriptedContext::with_messages(vec![
            Message::page_info(DocumentId(1), PageId(4)),
            Message::page_info(DocumentId(1), PageId(3)),
        ]);
        let outcome = wait_until(&context, &mut PageMessage::new(PageId(3)), FAST);
        assert_eq!(outcome, WaitOutcome::Satisfied);
        assert_eq!(context.remaining(), 0);
    }

    #[test]
    fn test_page_status_polling_succeeds_without_messages() {
        let context = ScriptedContext {
            ok_after_polls: Some(3),
            ..ScriptedContext::default()
        };
        let outcome = wait_until(&context, &mut PageDecoded::new(PageId(1)), FAST);
        assert_eq!(outcome, WaitOutcome::Satisfied);
    }

    #[test]
    fn test_page_status_failure() {
        let context = ScriptedContext::default();
        *context.page_status.lock().unwrap() = Some(JobStatus::Stopped);
        let outcome = wait_until(&context, &mut PageDecoded::new(PageId(1)), FAST);
        assert_eq!(outcome, WaitOutcome::Failed(JobStatus::Stopped));
    }

    #[test]
    fn test_page_status_ignores_sibling_errors() {
        let context = ScriptedContext {
            queue: Mutex::new(
                vec![Message::error("sibling broke", Some(DocumentId(1)), Some(PageId(8)))].into(),
            ),
            ok_after_polls: Some(3),
            ..ScriptedContext::default()
        };
        let outcome = wait_until(&context, &mut PageDecoded::new(PageId(1)), FAST);
        assert_eq!(outcome, WaitOutcome::Satisfied);
        assert_eq!(context.remaining(), 0);
    }

    #[test]
    fn test_page_status_aborts_on_own_or_unscoped_error() {
        let own = ScriptedContext::with_messages(vec![Message::error(
            "bad page",
            Some(DocumentId(1)),
            Some(PageId(1)),
        )]);
        assert_eq!(
            wait_until(&own, &mut PageDecoded::new(PageId(1)), FAST),
            WaitOutcome::ErrorSeen("bad page".to_string())
        );

        let unscoped =
            ScriptedContext::with_messages(vec![Message::error("stream closed", None, None)]);
        assert_eq!(
            wait_until(&unscoped, &mut PageDecoded::new(PageId(1)), FAST),
            WaitOutcome::ErrorSeen("stream closed".to_string())
        );
    }

    #[test]
    fn test_page_info_ignores_page_errors() {
        let context = ScriptedContext::with_messages(vec![
            Message::error("page 2 is corrupt", Some(DocumentId(1)), Some(PageId(8))),
            Message::error("document truncated", Some(DocumentId(1)), None),
        ]);
        let mut readiness = PageInfoReady::new(DocumentId(1), 0);
        assert_eq!(
            wait_until(&context, &mut readiness, FAST),
            WaitOutcome::ErrorSeen("document truncated".to_string())
        );
    }

    #[test]
    fn test_released_handles_never_abort() {
        let context = ScriptedContext::with_messages(vec![
            Message::error("page 2 is corrupt", Some(DocumentId(1)), Some(PageId::RETIRED)),
            Message::error("old document", Some(DocumentId::RETIRED), None),
            Message::doc_info(DocumentId(1)),
        ]);
        let outcome = wait_until(&context, &mut DocumentReady::new(DocumentId(1)), FAST);
        assert_eq!(outcome, WaitOutcome::Satisfied);

        let context = ScriptedContext {
            queue: Mutex::new(
                vec![Message::error("gone", Some(DocumentId(1)), Some(PageId::RETIRED))].into(),
            ),
            ok_after_polls: Some(3),
            ..ScriptedContext::default()
        };
        let outcome = wait_until(&context, &mut PageDecoded::new(PageId(1)), FAST);
        assert_eq!(outcome, WaitOutcome::Satisfied);
    }

    #[test]
    fn test_discard_leading_stops_at_other_handles() {
        let context = ScriptedContext::with_messages(vec![
            Message::error("bad page", Some(DocumentId(1)), Some(PageId(4))),
            Message::page_info(DocumentId(1), PageId(4)),
            Message::page_info(DocumentId(1), PageId(5)),
            Message::error("bad page", Some(DocumentId(1)), Some(PageId(4))),
        ]);

        assert_eq!(discard_leading(&context, HandleRef::Page(PageId(4))), 2);
        assert_eq!(context.remaining(), 2);
        assert_eq!(discard_leading(&context, HandleRef::Page(PageId(4))), 0);
    }

    #[test]
    fn test_flush_empties_queue() {
        let context = ScriptedContext::with_messages(vec![
            Message::error("bad page", Some(DocumentId(1)), Some(PageId(4))),
            Message::other(None, None),
        ]);
        assert_eq!(flush(&context), 2);
        assert_eq!(context.remaining(), 0);
        assert_eq!(flush(&context), 0);
    }

    #[test]
    fn test_page_info_pending_times_out() {
        let context = ScriptedContext::default();
        let mut readiness = PageInfoReady::new(DocumentId(1), 0);
        assert_eq!(wait_until(&context, &mut readiness, FAST), WaitOutcome::TimedOut);
        assert_eq!(readiness.info(), None);
    }
}
