//! Media session seam
//! The OS-level media API lives behind these traits; the notifier only sees
//! snapshots, playback status, and change events

mod fingerprint;
pub mod mock;
mod notifier;

pub use fingerprint::TrackFingerprint;
pub use notifier::MediaNotifier;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Upper bound on artwork reads (the announcement does not need more)
pub const ARTWORK_MAX_BYTES: usize = 5_000_000;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Media session error: {0}")]
    Session(String),
    #[error("Artwork read failed: {0}")]
    Artwork(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Playing,
    Paused,
    Stopped,
    Closed,
    Changing,
    Opened,
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PlaybackStatus::Playing => "Playing",
            PlaybackStatus::Paused => "Paused",
            PlaybackStatus::Stopped => "Stopped",
            PlaybackStatus::Closed => "Closed",
            PlaybackStatus::Changing => "Changing",
            PlaybackStatus::Opened => "Opened",
        };
        f.write_str(label)
    }
}

/// Reference to artwork bytes held by the media session. Reads are bounded;
/// a failed read never blocks an announcement.
#[async_trait]
pub trait ArtworkRef: Send + Sync {
    async fn read(&self, limit: usize) -> Result<Vec<u8>, MediaError>;
}

/// Immutable view of what a media session is playing. Superseded by newer
/// snapshots, never mutated.
#[derive(Clone)]
pub struct MediaSnapshot {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub genres: Vec<String>,
    pub artwork: Option<Arc<dyn ArtworkRef>>,
    pub status: PlaybackStatus,
}

impl fmt::Debug for MediaSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaSnapshot")
            .field("title", &self.title)
            .field("artist", &self.artist)
            .field("album", &self.album)
            .field("genres", &self.genres)
            .field("artwork", &self.artwork.is_some())
            .field("status", &self.status)
            .finish()
    }
}

/// One active media session exposed by the OS
#[async_trait]
pub trait MediaSession: Send + Sync {
    /// Identifier of the application reporting this session
    fn reporting_app(&self) -> Option<String>;

    /// Extract the enumerated metadata fields for the current track
    async fn snapshot(&self) -> Result<MediaSnapshot, MediaError>;

    fn playback_status(&self) -> PlaybackStatus;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEventKind {
    PropertiesChanged,
    PlaybackChanged,
}

/// Change event delivered through a subscription
pub struct MediaEvent {
    pub session: Arc<dyn MediaSession>,
    pub kind: MediaEventKind,
}

/// Enumerates sessions and hands out event subscriptions
pub trait MediaSessionSource: Send + Sync {
    fn sessions(&self) -> Vec<Arc<dyn MediaSession>>;

    fn subscribe(&self) -> MediaSubscription;
}

/// Live event subscription. Dropping it unsubscribes, so the notifier's
/// stop is deterministic instead of leaking callbacks.
pub struct MediaSubscription {
    receiver: mpsc::UnboundedReceiver<MediaEvent>,
    _guard: SubscriptionGuard,
}

impl MediaSubscription {
    pub fn new(receiver: mpsc::UnboundedReceiver<MediaEvent>, guard: SubscriptionGuard) -> Self {
        Self {
            receiver,
            _guard: guard,
        }
    }

    /// Next change event; `None` once the source is gone
    pub async fn next(&mut self) -> Option<MediaEvent> {
        self.receiver.recv().await
    }
}

/// Runs its unsubscribe action on drop
pub struct SubscriptionGuard(Option<Box<dyn FnOnce() + Send>>);

impl SubscriptionGuard {
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(unsubscribe)))
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.0.take() {
            unsubscribe();
        }
    }
}
