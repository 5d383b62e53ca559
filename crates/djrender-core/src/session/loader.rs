//! Document loading: classification, file checks, open-and-wait.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::sync::Arc;

use djrender_engine::EngineContext;
use tracing::{debug, info, warn};

use super::handles::DocumentHandle;
use super::waiter::{self, DocumentReady, WaitOutcome, wait_until};
use crate::error::{Result, SessionError, WaitStage};
use crate::format::{self, Signature};
use crate::models::config::SessionConfig;

/// A successfully loaded document.
pub(crate) enum Loaded {
    Native {
        document: DocumentHandle,
        page_count: usize,
    },
    Foreign,
}

/// Classify `path` and, for native documents, open it and wait until the
/// engine knows its structure.
pub(crate) fn load_document(
    context: &Arc<dyn EngineContext>,
    path: &Path,
    config: &SessionConfig,
) -> Result<Loaded> {
    if path.as_os_str().is_empty() {
        return Err(SessionError::InvalidArgument("empty document path".to_string()));
    }

    if format::has_foreign_extension(path, &config.foreign_extensions) {
        debug!("{} has a foreign extension, delegating", path.display());
        return Ok(Loaded::Foreign);
    }

    let header = read_header(path, config.min_file_size)?;
    if config.sniff_signatures {
        match format::sniff(&header) {
            Signature::Pdf => {
                debug!("{} is a PDF despite its extension, delegating", path.display());
                return Ok(Loaded::Foreign);
            }
            Signature::Djvu => debug!("{} has a DjVu signature", path.display()),
            Signature::Unknown => {
                warn!("{} has no DjVu signature, trying the engine anyway", path.display())
            }
        }
    }

    // Nothing else waits while a load runs; leftovers from released pages and
    // documents would otherwise be read as errors for this one.
    waiter::flush(context.as_ref());

    let document = DocumentHandle::open(context, path).map_err(|e| SessionError::OpenFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let budget = config.document_wait;
    match wait_until(context.as_ref(), &mut DocumentReady::new(document.id()), budget) {
        WaitOutcome::Satisfied => {}
        WaitOutcome::ErrorSeen(text) => return Err(SessionError::DecodeError(text)),
        WaitOutcome::Failed(status) => {
            return Err(SessionError::DecodeError(format!(
                "document decode ended with {:?}",
                status
            )));
        }
        WaitOutcome::TimedOut => {
            return Err(SessionError::Timeout {
                stage: WaitStage::DocumentInfo,
                attempts: budget.max_attempts,
            });
        }
    }

    let raw_count = context.page_count(document.id());
    let page_count = usize::try_from(raw_count)
        .ok()
        .filter(|&count| count > 0)
        .ok_or(SessionError::InvalidPageCount(raw_count))?;

    info!("Loaded {} ({} pages)", path.display(), page_count);
    Ok(Loaded::Native {
        document,
        page_count,
    })
}

/// Check that `path` is a readable file of at least `min_size` bytes and
/// return its first bytes.
fn read_header(path: &Path, min_size: u64) -> Result<Vec<u8>> {
    let unreadable = |reason: String| SessionError::Unreadable {
        path: path.to_path_buf(),
        reason,
    };

    let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => SessionError::NotFound(path.to_path_buf()),
        _ => unreadable(e.to_string()),
    })?;
    if !metadata.is_file() {
        return Err(unreadable("not a regular file".to_string()));
    }
    if metadata.len() < min_size {
        return Err(unreadable(format!(
            "{} bytes is too small for a document",
            metadata.len()
        )));
    }

    let mut header = Vec::with_capacity(16);
    File::open(path)
        .and_then(|file| file.take(16).read_to_end(&mut header))
        .map_err(|e| unreadable(e.to_string()))?;
    Ok(header)
}
