//! Media change notifier
//! Watches the allow-listed media session, deduplicates track changes by
//! fingerprint, and pushes announcements and presence updates outward

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use super::fingerprint::TrackFingerprint;
use super::{
    MediaSession, MediaSessionSource, MediaSnapshot, PlaybackStatus, ARTWORK_MAX_BYTES,
};
use crate::outbound::{Announcement, AnnouncementChannel, ArtworkAttachment, PresencePublisher};

/// Grace period for OS metadata to settle after a track transition
const METADATA_SETTLE_DELAY: Duration = Duration::from_secs(1);

const UNKNOWN_TITLE: &str = "Unknown Title";
const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Owned deduplication state: at most one fingerprint is current at a time,
/// and marking a new one evicts the old, so tracking never grows.
#[derive(Default)]
struct NotifierState {
    current: Option<TrackFingerprint>,
    last_snapshot: Option<MediaSnapshot>,
}

pub struct MediaNotifier {
    allow_list: Vec<String>,
    announcer: Arc<dyn AnnouncementChannel>,
    presence: Arc<dyn PresencePublisher>,
    state: Mutex<NotifierState>,
}

impl MediaNotifier {
    pub fn new(
        allow_list: Vec<String>,
        announcer: Arc<dyn AnnouncementChannel>,
        presence: Arc<dyn PresencePublisher>,
    ) -> Self {
        Self {
            allow_list,
            announcer,
            presence,
            state: Mutex::new(NotifierState::default()),
        }
    }

    fn app_allowed(&self, app: Option<&str>) -> bool {
        match app {
            Some(app) => self.allow_list.iter().any(|client| app.contains(client)),
            None => false,
        }
    }

    /// Scan the source for the first session whose reporting application is
    /// allow-listed and extract its snapshot.
    pub async fn poll_current_session(
        &self,
        source: &dyn MediaSessionSource,
    ) -> Option<MediaSnapshot> {
        for session in source.sessions() {
            if !self.app_allowed(session.reporting_app().as_deref()) {
                continue;
            }

            match session.snapshot().await {
                Ok(snapshot) => return Some(snapshot),
                Err(e) => {
                    tracing::warn!("Failed to extract media info: {}", e);
                    return None;
                }
            }
        }
        None
    }

    /// Track properties changed. Events can arrive from any session, so the
    /// allow-list is re-checked after the settle delay.
    pub async fn on_media_changed(&self, session: Arc<dyn MediaSession>) {
        tokio::time::sleep(METADATA_SETTLE_DELAY).await;

        let app = session.reporting_app();
        if !self.app_allowed(app.as_deref()) {
            tracing::warn!("Source app {:?} is not supported", app);
            return;
        }

        match session.snapshot().await {
            Ok(snapshot) => self.process_snapshot(snapshot).await,
            Err(e) => tracing::warn!("Failed to extract media info: {}", e),
        }
    }

    /// Playback state changed (pause/play). Re-announces presence from the
    /// last known snapshot; no fresh metadata extraction.
    pub async fn on_playback_changed(&self, session: Arc<dyn MediaSession>) {
        if !self.app_allowed(session.reporting_app().as_deref()) {
            return;
        }

        let status = session.playback_status();
        let text = {
            let state = self.state.lock();
            match state.last_snapshot.as_ref() {
                Some(snapshot) => presence_text(
                    &snapshot.title,
                    &snapshot.artist,
                    non_blank(&snapshot.album),
                    status,
                ),
                None => presence_text(UNKNOWN_TITLE, UNKNOWN_ARTIST, None, status),
            }
        };

        self.presence.set_status(&text).await;
    }

    /// Deduplicate and announce one snapshot. Invalid snapshots are dropped
    /// without side effects; a repeated fingerprint announces nothing.
    pub async fn process_snapshot(&self, snapshot: MediaSnapshot) {
        if snapshot.title.trim().is_empty() || snapshot.artist.trim().is_empty() {
            tracing::debug!("Invalid or empty media information received, skipping update");
            return;
        }

        let fingerprint = TrackFingerprint::for_track(&snapshot.title, &snapshot.artist);

        // Mark-one-evict-rest must be atomic with respect to concurrent
        // events: the second of two near-simultaneous events for the same
        // track observes the first one's mark here
        {
            let mut state = self.state.lock();
            if state.current == Some(fingerprint) {
                return;
            }
            state.current = Some(fingerprint);
            state.last_snapshot = Some(snapshot.clone());
        }

        let artwork = self.fetch_artwork(&snapshot, fingerprint).await;

        let announcement = render_announcement(&snapshot, artwork);
        if let Err(e) = self.announcer.send(&announcement).await {
            // The track stays marked as announced; retrying would flood
            // the channel
            tracing::error!("Error sending announcement: {}", e);
        }

        let text = presence_text(
            &snapshot.title,
            &snapshot.artist,
            non_blank(&snapshot.album),
            snapshot.status,
        );
        self.presence.set_status(&text).await;
    }

    /// Best-effort bounded artwork read
    async fn fetch_artwork(
        &self,
        snapshot: &MediaSnapshot,
        fingerprint: TrackFingerprint,
    ) -> Option<ArtworkAttachment> {
        let artwork = snapshot.artwork.as_ref()?;

        match artwork.read(ARTWORK_MAX_BYTES).await {
            Ok(bytes) if !bytes.is_empty() => Some(ArtworkAttachment {
                filename: format!("artwork_{}.png", fingerprint),
                bytes,
            }),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Artwork fetch failed, announcing without it: {}", e);
                None
            }
        }
    }
}

fn non_blank(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then_some(text)
}

/// `"{title} - {artist}[ ({album})]. Status: {status}"`
fn presence_text(title: &str, artist: &str, album: Option<&str>, status: PlaybackStatus) -> String {
    let mut text = format!("{} - {}", title, artist);
    if let Some(album) = album {
        text.push_str(&format!(" ({})", album));
    }
    text.push_str(&format!(". Status: {}", status));
    text
}

fn render_announcement(snapshot: &MediaSnapshot, artwork: Option<ArtworkAttachment>) -> Announcement {
    let mut headline = format!("Now Playing: {} - {}", snapshot.title, snapshot.artist);
    if let Some(album) = non_blank(&snapshot.album) {
        headline.push_str(&format!(" ({})", album));
    }

    Announcement {
        headline,
        copyable: format!("{} - {}", snapshot.title, snapshot.artist),
        artwork,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::mock::{MockMediaSource, ScriptedMediaSession, StaticArtwork};
    use crate::outbound::OutboundError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    const PLAYER: &str = "music.desktop.client";

    #[derive(Default)]
    struct RecordingAnnouncer {
        sent: Mutex<Vec<Announcement>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl AnnouncementChannel for RecordingAnnouncer {
        async fn send(&self, announcement: &Announcement) -> Result<(), OutboundError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(OutboundError::Delivery("scripted failure".into()));
            }
            self.sent.lock().push(announcement.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingPresence {
        statuses: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PresencePublisher for RecordingPresence {
        async fn set_status(&self, text: &str) {
            self.statuses.lock().push(text.to_string());
        }
    }

    fn snapshot(title: &str, artist: &str, album: &str) -> MediaSnapshot {
        MediaSnapshot {
            title: title.to_string(),
            artist: artist.to_string(),
            album: album.to_string(),
            genres: vec![],
            artwork: None,
            status: PlaybackStatus::Playing,
        }
    }

    fn notifier() -> (Arc<MediaNotifier>, Arc<RecordingAnnouncer>, Arc<RecordingPresence>) {
        let announcer = Arc::new(RecordingAnnouncer::default());
        let presence = Arc::new(RecordingPresence::default());
        let notifier = Arc::new(MediaNotifier::new(
            vec![PLAYER.to_string()],
            announcer.clone(),
            presence.clone(),
        ));
        (notifier, announcer, presence)
    }

    #[tokio::test]
    async fn duplicate_snapshots_announce_once() {
        let (notifier, announcer, _) = notifier();

        notifier.process_snapshot(snapshot("One", "Metallica", "")).await;
        notifier.process_snapshot(snapshot("One", "Metallica", "")).await;

        assert_eq!(announcer.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn new_track_evicts_previous_fingerprint() {
        let (notifier, announcer, _) = notifier();

        notifier.process_snapshot(snapshot("One", "Metallica", "")).await;
        notifier.process_snapshot(snapshot("Two", "Metallica", "")).await;
        // The first track is no longer current, so it announces again
        notifier.process_snapshot(snapshot("One", "Metallica", "")).await;

        assert_eq!(announcer.sent.lock().len(), 3);
        assert_eq!(
            notifier.state.lock().current,
            Some(TrackFingerprint::for_track("One", "Metallica"))
        );
    }

    #[tokio::test]
    async fn blank_title_is_rejected_without_side_effects() {
        let (notifier, announcer, presence) = notifier();

        notifier.process_snapshot(snapshot("   ", "Metallica", "")).await;
        notifier.process_snapshot(snapshot("One", "  ", "")).await;

        assert!(announcer.sent.lock().is_empty());
        assert!(presence.statuses.lock().is_empty());
        assert!(notifier.state.lock().current.is_none());
        assert!(notifier.state.lock().last_snapshot.is_none());
    }

    #[tokio::test]
    async fn announcement_and_presence_formats() {
        let (notifier, announcer, presence) = notifier();

        notifier
            .process_snapshot(snapshot("Clair de Lune", "Debussy", "Suite bergamasque"))
            .await;

        let sent = announcer.sent.lock();
        assert_eq!(
            sent[0].headline,
            "Now Playing: Clair de Lune - Debussy (Suite bergamasque)"
        );
        assert_eq!(sent[0].copyable, "Clair de Lune - Debussy");
        assert!(sent[0].artwork.is_none());

        assert_eq!(
            presence.statuses.lock()[0],
            "Clair de Lune - Debussy (Suite bergamasque). Status: Playing"
        );
    }

    #[tokio::test]
    async fn empty_album_is_omitted() {
        let (notifier, announcer, presence) = notifier();

        notifier.process_snapshot(snapshot("One", "Metallica", "  ")).await;

        assert_eq!(announcer.sent.lock()[0].headline, "Now Playing: One - Metallica");
        assert_eq!(
            presence.statuses.lock()[0],
            "One - Metallica. Status: Playing"
        );
    }

    #[tokio::test]
    async fn artwork_is_attached_and_named_by_fingerprint() {
        let (notifier, announcer, _) = notifier();

        let mut snap = snapshot("One", "Metallica", "");
        snap.artwork = Some(Arc::new(StaticArtwork::new(vec![0x89, 0x50, 0x4e, 0x47])));
        notifier.process_snapshot(snap).await;

        let fp = TrackFingerprint::for_track("One", "Metallica");
        let sent = announcer.sent.lock();
        let artwork = sent[0].artwork.as_ref().expect("artwork attached");
        assert_eq!(artwork.filename, format!("artwork_{}.png", fp));
        assert_eq!(artwork.bytes, vec![0x89, 0x50, 0x4e, 0x47]);
    }

    #[tokio::test]
    async fn artwork_failure_does_not_block_announcement() {
        let (notifier, announcer, _) = notifier();

        let mut snap = snapshot("One", "Metallica", "");
        snap.artwork = Some(Arc::new(StaticArtwork::failing()));
        notifier.process_snapshot(snap).await;

        let sent = announcer.sent.lock();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].artwork.is_none());
    }

    #[tokio::test]
    async fn oversized_artwork_is_truncated_at_the_bound() {
        let (notifier, announcer, _) = notifier();

        let mut snap = snapshot("One", "Metallica", "");
        snap.artwork = Some(Arc::new(StaticArtwork::new(vec![7u8; ARTWORK_MAX_BYTES + 1])));
        notifier.process_snapshot(snap).await;

        let sent = announcer.sent.lock();
        assert_eq!(sent[0].artwork.as_ref().unwrap().bytes.len(), ARTWORK_MAX_BYTES);
    }

    #[tokio::test]
    async fn delivery_failure_keeps_track_marked_announced() {
        let (notifier, announcer, _) = notifier();
        announcer.fail.store(true, Ordering::SeqCst);

        notifier.process_snapshot(snapshot("One", "Metallica", "")).await;

        announcer.fail.store(false, Ordering::SeqCst);
        notifier.process_snapshot(snapshot("One", "Metallica", "")).await;

        // The failed delivery still counts as announced; no retry flood
        assert!(announcer.sent.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn media_change_revalidates_the_allow_list() {
        let (notifier, announcer, _) = notifier();

        let stranger = Arc::new(ScriptedMediaSession::new(
            Some("some.other.app"),
            snapshot("One", "Metallica", ""),
        ));
        notifier.on_media_changed(stranger).await;

        assert!(announcer.sent.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_change_events_announce_once() {
        let (notifier, announcer, _) = notifier();

        let session = Arc::new(ScriptedMediaSession::new(
            Some(PLAYER),
            snapshot("One", "Metallica", ""),
        ));

        notifier.on_media_changed(session.clone()).await;
        notifier.on_media_changed(session).await;

        assert_eq!(announcer.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn playback_change_reuses_last_snapshot() {
        let (notifier, _, presence) = notifier();

        notifier.process_snapshot(snapshot("One", "Metallica", "")).await;

        let session = Arc::new(ScriptedMediaSession::new(Some(PLAYER), {
            let mut s = snapshot("One", "Metallica", "");
            s.status = PlaybackStatus::Paused;
            s
        }));
        notifier.on_playback_changed(session).await;

        let statuses = presence.statuses.lock();
        assert_eq!(statuses.last().unwrap(), "One - Metallica. Status: Paused");
    }

    #[tokio::test]
    async fn playback_change_before_any_track_uses_placeholders() {
        let (notifier, _, presence) = notifier();

        let session = Arc::new(ScriptedMediaSession::new(Some(PLAYER), {
            let mut s = snapshot("x", "y", "");
            s.status = PlaybackStatus::Stopped;
            s
        }));
        notifier.on_playback_changed(session).await;

        assert_eq!(
            presence.statuses.lock()[0],
            "Unknown Title - Unknown Artist. Status: Stopped"
        );
    }

    #[tokio::test]
    async fn poll_selects_first_allow_listed_session() {
        let (notifier, _, _) = notifier();
        let source = MockMediaSource::new();

        source.add_session(Arc::new(ScriptedMediaSession::new(
            Some("browser.tab"),
            snapshot("Wrong", "App", ""),
        )));
        source.add_session(Arc::new(ScriptedMediaSession::new(
            Some(PLAYER),
            snapshot("Right", "Track", ""),
        )));

        let found = notifier.poll_current_session(&source).await.unwrap();
        assert_eq!(found.title, "Right");
    }

    #[tokio::test]
    async fn poll_returns_none_without_matching_session() {
        let (notifier, _, _) = notifier();
        let source = MockMediaSource::new();

        source.add_session(Arc::new(ScriptedMediaSession::new(
            Some("browser.tab"),
            snapshot("Wrong", "App", ""),
        )));

        assert!(notifier.poll_current_session(&source).await.is_none());
    }
}
