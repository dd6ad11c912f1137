//! Top-level wiring
//! Builds the connection manager, relay pipeline, and media notifier from a
//! config plus the platform adapters, and drives the shared event loop

use std::sync::Arc;

use crate::audio::{AudioRelayPipeline, CaptureBackend, CHANNELS, SAMPLE_RATE};
use crate::config::RelayConfig;
use crate::connection::{ConnectionManager, ReconnectPolicy};
use crate::media::{MediaEventKind, MediaNotifier, MediaSessionSource};
use crate::outbound::{AnnouncementChannel, PresencePublisher};
use crate::transport::{ConnectTarget, VoiceTransport};

/// Presence shown when no media session is around at startup
const IDLE_PRESENCE: &str = "Audio Streaming";

pub struct RelayApp {
    manager: Arc<ConnectionManager>,
    notifier: Arc<MediaNotifier>,
    media_source: Arc<dyn MediaSessionSource>,
    presence: Arc<dyn PresencePublisher>,
}

impl RelayApp {
    pub fn new(
        config: &RelayConfig,
        transport: Arc<dyn VoiceTransport>,
        capture: Arc<dyn CaptureBackend>,
        media_source: Arc<dyn MediaSessionSource>,
        announcer: Arc<dyn AnnouncementChannel>,
        presence: Arc<dyn PresencePublisher>,
    ) -> Self {
        let target = ConnectTarget {
            server_id: config.server_id,
            channel_id: config.voice_channel_id,
        };

        let manager = Arc::new(ConnectionManager::new(
            transport.clone(),
            target,
            ReconnectPolicy::default(),
        ));

        let pipeline = AudioRelayPipeline::new(
            capture,
            transport,
            config.microphone_id.clone(),
            SAMPLE_RATE,
            CHANNELS,
        );
        manager.set_relay_starter(Box::new(move || pipeline.start()));

        let notifier = Arc::new(MediaNotifier::new(
            config.desktop_clients.clone(),
            announcer,
            presence.clone(),
        ));

        Self {
            manager,
            notifier,
            media_source,
            presence,
        }
    }

    pub fn manager(&self) -> Arc<ConnectionManager> {
        self.manager.clone()
    }

    /// Startup sequence followed by the shared event loop. Returns when
    /// `shutdown` resolves; the connection is torn down before returning.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: std::future::Future<Output = ()>,
    {
        // Announce whatever is already playing, or fall back to a neutral
        // presence
        match self
            .notifier
            .poll_current_session(self.media_source.as_ref())
            .await
        {
            Some(snapshot) => self.notifier.process_snapshot(snapshot).await,
            None => self.presence.set_status(IDLE_PRESENCE).await,
        }

        self.manager.connect().await;
        let liveness = self.manager.spawn_liveness_check();

        let mut subscription = self.media_source.subscribe();
        tracing::info!("Media event handlers registered");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                event = subscription.next() => {
                    let Some(event) = event else {
                        tracing::warn!("Media event source closed");
                        break;
                    };

                    // Handlers can sleep (metadata settle delay); run them
                    // off the loop so bursts do not queue behind each other
                    let notifier = self.notifier.clone();
                    match event.kind {
                        MediaEventKind::PropertiesChanged => {
                            tokio::spawn(async move {
                                notifier.on_media_changed(event.session).await;
                            });
                        }
                        MediaEventKind::PlaybackChanged => {
                            tokio::spawn(async move {
                                notifier.on_playback_changed(event.session).await;
                            });
                        }
                    }
                }
            }
        }

        tracing::info!("Shutting down, releasing audio and transport");
        liveness.abort();
        self.manager.disconnect().await;
    }
}
