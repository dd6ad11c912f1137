//! In-process voice transport
//! Consumes relayed audio at frame pace and discards it; used by the local
//! run mode and by tests that need a controllable link

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{ConnectTarget, SharedRelayStream, TransportError, VoiceTransport};
use crate::audio::FRAME_BYTES;

/// Pace at which the send task drains the relay stream
const SEND_INTERVAL: Duration = Duration::from_millis(20);

/// Loopback transport with scriptable handshake failures.
///
/// `fail_next_connects(n)` makes the next `n` connect calls fail, which is
/// how the reconnect tests drive backoff episodes. `drop_link()` simulates
/// the remote side going away without a local disconnect call.
pub struct LoopbackTransport {
    connected: Arc<AtomicBool>,
    sending: Arc<AtomicBool>,
    fail_connects: AtomicUsize,
    connect_calls: AtomicUsize,
    bytes_sent: Arc<AtomicUsize>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            connected: Arc::new(AtomicBool::new(false)),
            sending: Arc::new(AtomicBool::new(false)),
            fail_connects: AtomicUsize::new(0),
            connect_calls: AtomicUsize::new(0),
            bytes_sent: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make the next `n` connect attempts fail with a handshake error
    pub fn fail_next_connects(&self, n: usize) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Simulate the link dropping out from under us
    pub fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Total audio bytes drained from relay streams
    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent.load(Ordering::SeqCst)
    }

    /// How many connect attempts have been made
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VoiceTransport for LoopbackTransport {
    async fn connect(&self, target: &ConnectTarget) -> Result<(), TransportError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.fail_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::Handshake(format!(
                "simulated refusal for channel {}",
                target.channel_id
            )));
        }

        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(
            "Loopback transport connected to {}/{}",
            target.server_id,
            target.channel_id
        );
        Ok(())
    }

    async fn disconnect(&self, force: bool) {
        if self.connected.swap(false, Ordering::SeqCst) {
            tracing::info!("Loopback transport disconnected (force: {})", force);
        }
        self.sending.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_sending(&self) -> bool {
        self.sending.load(Ordering::SeqCst)
    }

    fn begin_send(&self, source: SharedRelayStream) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        if self.sending.swap(true, Ordering::SeqCst) {
            // One send operation at a time
            return Ok(());
        }

        let connected = self.connected.clone();
        let sending = self.sending.clone();
        let bytes_sent = self.bytes_sent.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SEND_INTERVAL);
            loop {
                ticker.tick().await;

                if !connected.load(Ordering::SeqCst) {
                    break;
                }

                // The relay stream read can wait on the capture driver, so
                // keep it off the async workers
                let reader = source.clone();
                let chunk = match tokio::task::spawn_blocking(move || reader.lock().read(FRAME_BYTES))
                    .await
                {
                    Ok(chunk) => chunk,
                    Err(_) => break,
                };

                if chunk.is_empty() {
                    // Source went inert; the send operation is over
                    break;
                }

                bytes_sent.fetch_add(chunk.len(), Ordering::SeqCst);
            }

            sending.store(false, Ordering::SeqCst);
        });

        Ok(())
    }
}
