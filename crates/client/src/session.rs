//! Default session key derivation.
//!
//! The cache core treats session ids as opaque; callers that have no naming
//! scheme of their own can derive one from the page URL plus whatever vary
//! headers distinguish variants of it.

use sha2::{Digest, Sha256};

/// Derive a stable session id for a page URL.
pub fn derive_session_id(url: &str, vary_headers: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(b"\n");
    hasher.update(vary_headers.as_bytes());
    hex::encode(hasher.finalize())
}
