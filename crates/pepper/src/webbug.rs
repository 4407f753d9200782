//! Web-bug (tracking pixel) detection.
//!
//! A web bug is a 1×1 image whose only purpose is to trigger a request.
//! Detection is cheap: only responses that declare
//! `image/gif` and carry fewer than [`WEB_BUG_MAX_BYTES`] bytes are
//! inspected, and only the GIF logical screen descriptor is decoded.
//!
//! [`WebBugStore`] holds the URLs confirmed to be web bugs plus the count
//! of blocked requests. It is shared by every connection task.

use crate::error::{PepperError, Result};
use image::codecs::gif::GifDecoder;
use image::ImageDecoder;
use std::collections::HashSet;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Responses at or above this size are never treated as web bugs.
pub const WEB_BUG_MAX_BYTES: usize = 100;

/// Content type a web bug must declare.
pub const WEB_BUG_CONTENT_TYPE: &str = "image/gif";

/// A transparent 1×1 GIF served in place of blocked web bugs.
pub const PIXEL_GIF: [u8; 35] = [
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0xFF, 0x00, 0xFF, 0xFF,
    0xFF, 0x00, 0x00, 0x00, 0x2C, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02,
    0x02, 0x44, 0x01, 0x00, 0x3B,
];

/// Decode the logical screen size of a GIF.
///
/// Only the header and global color table are read; no frame is decoded.
pub fn gif_dimensions(data: &[u8]) -> Result<(u32, u32)> {
    let decoder =
        GifDecoder::new(Cursor::new(data)).map_err(|e| PepperError::GifDecode(e.to_string()))?;
    Ok(decoder.dimensions())
}

/// Whether a `Content-Type` header value names a GIF.
///
/// Parameters (`; charset=...`) and case are ignored.
#[must_use]
pub fn is_gif_content_type(value: &str) -> bool {
    value
        .split(';')
        .next()
        .map(|media| media.trim().eq_ignore_ascii_case(WEB_BUG_CONTENT_TYPE))
        .unwrap_or(false)
}

/// Classify a fetched response.
///
/// `body` must be the complete response body. Anything that fails to decode
/// is not a web bug.
#[must_use]
pub fn is_web_bug(content_type: Option<&str>, body: &[u8]) -> bool {
    if body.len() >= WEB_BUG_MAX_BYTES {
        return false;
    }
    if !content_type.map(is_gif_content_type).unwrap_or(false) {
        return false;
    }
    match gif_dimensions(body) {
        Ok((w, h)) => u64::from(w) * u64::from(h) == 1,
        Err(_) => false,
    }
}

/// Blacklist of confirmed web-bug URLs and the blocked-request counter.
///
/// The set only ever grows. Lookups take a read lock; inserts take the
/// write lock briefly. Two tasks racing on the same unknown URL may both
/// probe it, but the set still ends up with a single entry.
#[derive(Debug, Default)]
pub struct WebBugStore {
    urls: RwLock<HashSet<String>>,
    hits: AtomicU64,
}

impl WebBugStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `url` (canonical form) is a known web bug.
    #[must_use]
    pub fn contains(&self, url: &str) -> bool {
        // A poisoned lock still guards a consistent set: inserts are a
        // single HashSet::insert call.
        let urls = self.urls.read().unwrap_or_else(|e| e.into_inner());
        urls.contains(url)
    }

    /// Record `url` as a web bug. Returns `true` if it was not yet known.
    pub fn insert(&self, url: &str) -> bool {
        let mut urls = self.urls.write().unwrap_or_else(|e| e.into_inner());
        if urls.contains(url) {
            return false;
        }
        urls.insert(url.to_string())
    }

    /// Count one blocked web bug. Returns the new total.
    pub fn record_hit(&self) -> u64 {
        self.hits.fetch_add(1, Ordering::Relaxed).saturating_add(1)
    }

    /// Total web bugs blocked so far.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of blacklisted URLs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.urls.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
