//! Voice transport seam
//! The platform gateway owns the wire protocol; the core only needs the
//! capability set below and never touches the handle behind it

mod loopback;

pub use loopback::LoopbackTransport;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

use crate::audio::RelayStream;

/// Audio byte source shared between the relay pipeline and the transport's
/// send operation
pub type SharedRelayStream = Arc<Mutex<RelayStream>>;

/// Where to connect: a server and a voice channel on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub server_id: u64,
    pub channel_id: u64,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport handshake failed: {0}")]
    Handshake(String),
    #[error("Transport not connected")]
    NotConnected,
    #[error("Transport send failed: {0}")]
    Send(String),
}

/// Capability set of the voice transport.
///
/// The handle lifecycle lives entirely behind this trait: `connect`
/// replaces any previous handle, `disconnect(force)` tears the current one
/// down, and `begin_send` starts one send operation that pulls bytes from
/// the given source until it runs dry or the link drops. `is_sending`
/// reports whether such an operation is still in flight.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn connect(&self, target: &ConnectTarget) -> Result<(), TransportError>;

    async fn disconnect(&self, force: bool);

    fn is_connected(&self) -> bool;

    fn is_sending(&self) -> bool;

    fn begin_send(&self, source: SharedRelayStream) -> Result<(), TransportError>;
}
