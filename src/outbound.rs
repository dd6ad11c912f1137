//! Outbound announcement and presence seams
//! The chat platform's delivery layer sits behind these traits

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OutboundError {
    #[error("Announcement delivery failed: {0}")]
    Delivery(String),
}

/// Artwork image attached to an announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtworkAttachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Two-part now-playing message: a human-readable headline and a verbatim
/// copy-pasteable block, plus optional artwork
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub headline: String,
    pub copyable: String,
    pub artwork: Option<ArtworkAttachment>,
}

#[async_trait]
pub trait AnnouncementChannel: Send + Sync {
    async fn send(&self, announcement: &Announcement) -> Result<(), OutboundError>;
}

#[async_trait]
pub trait PresencePublisher: Send + Sync {
    async fn set_status(&self, text: &str);
}

/// Log-backed announcement channel for local runs
pub struct TracingAnnouncer;

#[async_trait]
impl AnnouncementChannel for TracingAnnouncer {
    async fn send(&self, announcement: &Announcement) -> Result<(), OutboundError> {
        tracing::info!(
            "{} (artwork: {})",
            announcement.headline,
            announcement
                .artwork
                .as_ref()
                .map(|a| a.filename.as_str())
                .unwrap_or("none")
        );
        Ok(())
    }
}

/// Log-backed presence publisher for local runs
pub struct TracingPresence;

#[async_trait]
impl PresencePublisher for TracingPresence {
    async fn set_status(&self, text: &str) {
        tracing::info!("Presence: {}", text);
    }
}
