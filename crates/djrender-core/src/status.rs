//! Integer status codes for callers that cannot take a `Result`.
//!
//! Errors are logged here and collapsed to `STATUS_ERROR`; the session is
//! never left unusable by a failed call.

use std::path::Path;

use djrender_engine::DecodeEngine;
use tracing::warn;

use crate::error::Result;
use crate::format::DocumentFormat;
use crate::models::page::RenderOutcome;
use crate::session::Session;

pub const STATUS_OK: i32 = 0;
pub const STATUS_ERROR: i32 = -1;
/// Not an error: the page belongs to the foreign renderer.
pub const STATUS_DELEGATE: i32 = -2;

pub fn load_status(result: &Result<DocumentFormat>) -> i32 {
    match result {
        Ok(_) => STATUS_OK,
        Err(e) => {
            warn!("Load failed: {}", e);
            STATUS_ERROR
        }
    }
}

pub fn render_status(result: &Result<RenderOutcome>) -> i32 {
    match result {
        Ok(RenderOutcome::Rendered) => STATUS_OK,
        Ok(RenderOutcome::Delegate) => STATUS_DELEGATE,
        Err(e) => {
            warn!("Render failed: {}", e);
            STATUS_ERROR
        }
    }
}

/// `None` only when the engine cannot allocate a context.
pub fn session_init(engine: &dyn DecodeEngine) -> Option<Session> {
    Session::init(engine)
        .inspect_err(|e| warn!("Session init failed: {}", e))
        .ok()
}

pub fn load_document(session: &mut Session, path: impl AsRef<Path>) -> i32 {
    load_status(&session.load(path))
}

pub fn page_count(session: &Session) -> i32 {
    session.page_count()
}

pub fn page_dimensions(session: &Session, index: usize) -> Option<(i32, i32)> {
    let size = session
        .page_dimensions(index)
        .inspect_err(|e| warn!("No dimensions for page {}: {}", index, e))
        .ok()?;
    Some((
        i32::try_from(size.width).ok()?,
        i32::try_from(size.height).ok()?,
    ))
}

pub fn render_page(
    session: &Session,
    index: usize,
    width: u32,
    height: u32,
    out: &mut [u8],
) -> i32 {
    render_status(&session.render_page(index, width, height, out))
}

pub fn is_foreign_format(session: &Session) -> bool {
    session.is_foreign_format()
}

pub fn teardown(session: &mut Session) {
    session.teardown();
}
