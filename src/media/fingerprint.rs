//! Track deduplication key

use sha2::{Digest, Sha256};
use std::fmt;

/// Deterministic digest over the normalized `"{title} - {artist}"` text.
/// Two change events for the same track always produce the same
/// fingerprint, which is what keeps repeat announcements out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackFingerprint(u64);

impl TrackFingerprint {
    pub fn for_track(title: &str, artist: &str) -> Self {
        let text = format!("{} - {}", title.trim(), artist.trim());
        let digest = Sha256::digest(text.as_bytes());

        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        Self(u64::from_be_bytes(prefix))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TrackFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
