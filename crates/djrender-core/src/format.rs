//! Input classification by file extension and header signature.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Every DjVu file starts with an IFF85 `FORM` chunk behind this magic.
pub const DJVU_SIGNATURE: &[u8] = b"AT&TFORM";

pub const PDF_SIGNATURE: &[u8] = b"%PDF-";

/// Who decodes a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    /// Decoded by the session's engine.
    Native,
    /// Delegated to the foreign renderer.
    Foreign,
}

/// What a file header looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    Djvu,
    Pdf,
    Unknown,
}

/// Whether `path` carries one of `extensions` (compared case-insensitively).
pub fn has_foreign_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|f| f.eq_ignore_ascii_case(ext)))
}

/// Identify a file from its first bytes.
pub fn sniff(header: &[u8]) -> Signature {
    if header.starts_with(DJVU_SIGNATURE) {
        Signature::Djvu
    } else if header.starts_with(PDF_SIGNATURE) {
        Signature::Pdf
    } else {
        Signature::Unknown
    }
}
