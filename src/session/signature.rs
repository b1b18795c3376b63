//! Process-wide copy of the most recent session signature.
//!
//! Set by every successful authentication context, last write wins. It exists for display and
//! diagnostics only; each [`Session`](super::Session) keeps its own authoritative copy.
use std::sync::{Mutex, PoisonError};

/// Number of leading bytes of the source material rendered into a signature.
pub const SIGNATURE_BYTES: usize = 16;

static LAST_SESSION_SIGNATURE: Mutex<String> = Mutex::new(String::new());

/// Most recent signature established in this process, empty if none yet.
pub fn last_session_signature() -> String {
    LAST_SESSION_SIGNATURE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

pub(crate) fn set_last_session_signature(signature: &str) {
    let mut last = LAST_SESSION_SIGNATURE
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    last.clear();
    last.push_str(signature);
}

/// Lowercase hex of the first [`SIGNATURE_BYTES`] bytes of `material`.
pub fn signature_from_bytes(material: &[u8]) -> String {
    hex::encode(&material[..material.len().min(SIGNATURE_BYTES)])
}
