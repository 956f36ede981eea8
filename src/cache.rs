//! Content-addressed cache of extracted frames.
//!
//! Entries are keyed by the SHA-256 hex digest of the uploaded payload, so
//! processing the same bytes twice in one session skips decoding.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::capture::EncodedFrame;

pub(crate) type Frames = Arc<Vec<EncodedFrame>>;

/// What one decode produced, kept whole so a cache hit reports the same
/// truncation as the original decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CachedFrames {
    pub(crate) frames: Frames,
    pub(crate) truncated: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct FrameCache {
    entries: HashMap<String, CachedFrames>,
}

impl FrameCache {
    pub(crate) fn key_for(payload: &[u8]) -> String {
        let hash = Sha256::digest(payload);
        format!("{hash:x}")
    }

    pub(crate) fn get(&self, key: &str) -> Option<CachedFrames> {
        self.entries.get(key).cloned()
    }

    pub(crate) fn insert(&mut self, key: String, entry: CachedFrames) {
        self.entries.insert(key, entry);
    }

    /// Drops the entry for `key`, returning whether one existed.
    pub(crate) fn invalidate(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
