//! Scriptable media source
//! Stands in for the OS media API in tests and in the local run mode

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{
    ArtworkRef, MediaError, MediaEvent, MediaEventKind, MediaSession, MediaSessionSource,
    MediaSnapshot, MediaSubscription, PlaybackStatus, SubscriptionGuard,
};

/// Media source whose sessions and events are driven by the test
#[derive(Default)]
pub struct MockMediaSource {
    sessions: Mutex<Vec<Arc<dyn MediaSession>>>,
    subscribers: Arc<Mutex<Vec<(u64, mpsc::UnboundedSender<MediaEvent>)>>>,
    next_id: AtomicU64,
}

impl MockMediaSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_session(&self, session: Arc<dyn MediaSession>) {
        self.sessions.lock().push(session);
    }

    /// Fan a change event out to every live subscriber
    pub fn emit(&self, session: Arc<dyn MediaSession>, kind: MediaEventKind) {
        let subscribers = self.subscribers.lock();
        for (_, sender) in subscribers.iter() {
            let _ = sender.send(MediaEvent {
                session: session.clone(),
                kind,
            });
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl MediaSessionSource for MockMediaSource {
    fn sessions(&self) -> Vec<Arc<dyn MediaSession>> {
        self.sessions.lock().clone()
    }

    fn subscribe(&self) -> MediaSubscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push((id, tx));

        let subscribers = self.subscribers.clone();
        let guard = SubscriptionGuard::new(move || {
            subscribers.lock().retain(|(sid, _)| *sid != id);
        });

        MediaSubscription::new(rx, guard)
    }
}

/// Session with a fixed reporting app and a swappable snapshot
pub struct ScriptedMediaSession {
    app: Option<String>,
    snapshot: Mutex<MediaSnapshot>,
    fail_snapshot: AtomicBool,
}

impl ScriptedMediaSession {
    pub fn new(app: Option<&str>, snapshot: MediaSnapshot) -> Self {
        Self {
            app: app.map(str::to_string),
            snapshot: Mutex::new(snapshot),
            fail_snapshot: AtomicBool::new(false),
        }
    }

    pub fn set_snapshot(&self, snapshot: MediaSnapshot) {
        *self.snapshot.lock() = snapshot;
    }

    pub fn fail_next_snapshot(&self) {
        self.fail_snapshot.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaSession for ScriptedMediaSession {
    fn reporting_app(&self) -> Option<String> {
        self.app.clone()
    }

    async fn snapshot(&self) -> Result<MediaSnapshot, MediaError> {
        if self.fail_snapshot.swap(false, Ordering::SeqCst) {
            return Err(MediaError::Session("scripted failure".into()));
        }
        Ok(self.snapshot.lock().clone())
    }

    fn playback_status(&self) -> PlaybackStatus {
        self.snapshot.lock().status
    }
}

/// Artwork reference backed by an in-memory byte blob
pub struct StaticArtwork {
    bytes: Vec<u8>,
    fail: AtomicBool,
}

impl StaticArtwork {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            fail: AtomicBool::new(false),
        }
    }

    pub fn failing() -> Self {
        Self {
            bytes: Vec::new(),
            fail: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl ArtworkRef for StaticArtwork {
    async fn read(&self, limit: usize) -> Result<Vec<u8>, MediaError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MediaError::Artwork("scripted failure".into()));
        }
        Ok(self.bytes[..self.bytes.len().min(limit)].to_vec())
    }
}
