//! Owning wrappers around engine handles.
//!
//! Each wrapper releases its handle exactly once, on drop. None of them is
//! `Clone`.

use std::path::Path;
use std::sync::Arc;

use djrender_engine::{DocumentId, EngineContext, FormatId, PageId, PixelFormat};
use tracing::{debug, trace};

/// An open document. Keeps its context alive, so the context is always
/// released after the document.
pub(crate) struct DocumentHandle {
    context: Arc<dyn EngineContext>,
    id: DocumentId,
}

impl DocumentHandle {
    pub(crate) fn open(
        context: &Arc<dyn EngineContext>,
        path: &Path,
    ) -> djrender_engine::Result<Self> {
        let id = context.open_document(path)?;
        Ok(Self {
            context: Arc::clone(context),
            id,
        })
    }

    pub(crate) fn id(&self) -> DocumentId {
        self.id
    }
}

impl Drop for DocumentHandle {
    fn drop(&mut self) {
        debug!("Releasing document {:?}", self.id);
        self.context.release_document(self.id);
    }
}

/// A page decode job, scoped to one render or info call.
pub(crate) struct PageHandle<'a> {
    context: &'a dyn EngineContext,
    id: PageId,
}

impl<'a> PageHandle<'a> {
    pub(crate) fn create(
        context: &'a dyn EngineContext,
        document: DocumentId,
        index: usize,
    ) -> djrender_engine::Result<Self> {
        let id = context.create_page(document, index)?;
        Ok(Self { context, id })
    }

    pub(crate) fn id(&self) -> PageId {
        self.id
    }
}

impl Drop for PageHandle<'_> {
    fn drop(&mut self) {
        trace!("Releasing page {:?}", self.id);
        self.context.release_page(self.id);
    }
}

/// A pixel format descriptor.
pub(crate) struct FormatHandle<'a> {
    context: &'a dyn EngineContext,
    id: FormatId,
}

impl<'a> FormatHandle<'a> {
    pub(crate) fn create(
        context: &'a dyn EngineContext,
        format: PixelFormat,
    ) -> djrender_engine::Result<Self> {
        let id = context.create_format(format)?;
        Ok(Self { context, id })
    }

    pub(crate) fn id(&self) -> FormatId {
        self.id
    }
}

impl Drop for FormatHandle<'_> {
    fn drop(&mut self) {
        self.context.release_format(self.id);
    }
}
