//! Native page rendering and page geometry.

use djrender_engine::{DocumentId, EngineContext, HandleRef, PixelFormat, RenderRect};
use tracing::{debug, warn};

use super::handles::{FormatHandle, PageHandle};
use super::waiter::{
    PageDecoded, PageInfoReady, PageMessage, Readiness, WaitOutcome, discard_leading, wait_until,
};
use crate::error::{Result, SessionError, WaitStage};
use crate::models::config::{PageWaitStrategy, SessionConfig};
use crate::models::page::{PageRequest, PageSize};
use crate::pixels;

/// Decode and rasterize one page into `out` (RGBA, already validated to hold
/// the request).
///
/// Every handle and the scratch buffer are owned locally, so all of them are
/// released on every return path.
pub(crate) fn render_native(
    context: &dyn EngineContext,
    document: DocumentId,
    request: PageRequest,
    out: &mut [u8],
    config: &SessionConfig,
) -> Result<()> {
    let PageRequest {
        index,
        width,
        height,
    } = request;

    let page = PageHandle::create(context, document, index).map_err(|e| {
        SessionError::PageCreateFailed {
            page: index,
            reason: e.to_string(),
        }
    })?;

    let mut readiness: Box<dyn Readiness> = match config.page_wait_strategy {
        PageWaitStrategy::Status => Box::new(PageDecoded::new(page.id())),
        PageWaitStrategy::Message => Box::new(PageMessage::new(page.id())),
    };
    let outcome = wait_until(context, readiness.as_mut(), config.page_wait);
    discard_leading(context, HandleRef::Page(page.id()));
    match outcome {
        WaitOutcome::Satisfied => {}
        WaitOutcome::Failed(status) => {
            warn!("Page {} failed to decode: {:?}", index, status);
            return Err(SessionError::DecodeFailed {
                page: index,
                status,
            });
        }
        WaitOutcome::ErrorSeen(text) => {
            warn!("Page {} aborted by engine error: {}", index, text);
            return Err(SessionError::DecodeError(text));
        }
        WaitOutcome::TimedOut => {
            return Err(SessionError::Timeout {
                stage: WaitStage::PageDecode,
                attempts: config.page_wait.max_attempts,
            });
        }
    }

    let pixel_format = PixelFormat::rgb24();
    let format = FormatHandle::create(context, pixel_format).map_err(|e| {
        SessionError::RasterFailed {
            page: index,
            reason: e.to_string(),
        }
    })?;

    let stride = pixel_format.row_stride(width);
    let mut scratch = pixels::alloc_scratch(stride * height as usize)?;

    // Same rectangle twice: the engine scales the whole page to the output.
    let rect = RenderRect::sized(width, height);
    context
        .render_page(page.id(), format.id(), rect, rect, stride, &mut scratch)
        .map_err(|e| SessionError::RasterFailed {
            page: index,
            reason: e.to_string(),
        })?;

    pixels::expand_rgb_to_rgba(&scratch, &mut out[..request.rgba_len()]);
    debug!("Rendered page {} at {}x{}", index, width, height);
    Ok(())
}

/// Stored size of a native page, waiting for the engine if needed.
pub(crate) fn native_page_size(
    context: &dyn EngineContext,
    document: DocumentId,
    index: usize,
    config: &SessionConfig,
) -> Result<PageSize> {
    let mut readiness = PageInfoReady::new(document, index);
    match wait_until(context, &mut readiness, config.page_wait) {
        WaitOutcome::Satisfied => readiness
            .info()
            .map(|info| PageSize::new(info.width, info.height))
            .ok_or_else(|| SessionError::DecodeError("page info vanished".to_string())),
        WaitOutcome::Failed(status) => Err(SessionError::DecodeFailed {
            page: index,
            status,
        }),
        WaitOutcome::ErrorSeen(text) => Err(SessionError::DecodeError(text)),
        WaitOutcome::TimedOut => Err(SessionError::Timeout {
            stage: WaitStage::PageInfo,
            attempts: config.page_wait.max_attempts,
        }),
    }
}
