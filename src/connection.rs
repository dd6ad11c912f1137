//! Voice connection lifecycle
//! Owns the transport handle: connect, detect disconnects, retry with
//! bounded exponential backoff, and re-arm the audio relay after recovery

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::audio::{PipelineError, RelayHandle};
use crate::transport::{ConnectTarget, VoiceTransport};

/// How often the liveness check looks at the transport
pub const LIVENESS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Backoff settings for one reconnect episode
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub cap_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            cap_delay: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay after the given failed attempt (1-based):
    /// `min(base * 2^(attempt-1), cap)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(factor)
            .min(self.cap_delay)
    }
}

/// Starts (or restarts) the audio relay once a connection is up
pub type RelayStarter = Box<dyn Fn() -> Result<RelayHandle, PipelineError> + Send + Sync>;

/// Serialized owner of the voice transport connection.
///
/// All transitions run through this manager; dependent components only read
/// `state()`. Only one reconnect episode can be active at a time, and a
/// backoff sleep is cut short by a fresh explicit connect request.
pub struct ConnectionManager {
    transport: Arc<dyn VoiceTransport>,
    target: ConnectTarget,
    policy: ReconnectPolicy,
    state: RwLock<ConnectionState>,
    is_reconnecting: AtomicBool,
    connect_requested: Notify,
    disconnect_requested: AtomicBool,
    // Serializes explicit connect/disconnect against each other
    transition: tokio::sync::Mutex<()>,
    relay_starter: Mutex<Option<RelayStarter>>,
    relay: Mutex<Option<RelayHandle>>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn VoiceTransport>,
        target: ConnectTarget,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            transport,
            target,
            policy,
            state: RwLock::new(ConnectionState::Disconnected),
            is_reconnecting: AtomicBool::new(false),
            connect_requested: Notify::new(),
            disconnect_requested: AtomicBool::new(false),
            transition: tokio::sync::Mutex::new(()),
            relay_starter: Mutex::new(None),
            relay: Mutex::new(None),
        }
    }

    /// Install the closure that re-arms the audio relay after a successful
    /// connect. Kept separate from `new` so the pipeline can capture the
    /// manager's transport.
    pub fn set_relay_starter(&self, starter: RelayStarter) {
        *self.relay_starter.lock() = Some(starter);
    }

    /// Read-only state query for dependent components
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Establish the connection. A no-op when already connected; a
    /// handshake failure is logged and left for the caller to decide on
    /// (automatic retries only run on the liveness path).
    pub async fn connect(&self) {
        if self.transport.is_connected() {
            tracing::info!("Already connected to the voice channel");
            return;
        }

        if self.is_reconnecting.load(Ordering::SeqCst) {
            // An episode is in flight; cut its backoff sleep short instead
            // of racing a second connect attempt
            self.connect_requested.notify_one();
            return;
        }

        let _guard = self.transition.lock().await;

        *self.state.write() = ConnectionState::Connecting;

        match self.transport.connect(&self.target).await {
            Ok(()) => {
                *self.state.write() = ConnectionState::Connected;
                tracing::info!(
                    "Connected to voice channel {}",
                    self.target.channel_id
                );
                self.arm_relay();
            }
            Err(e) => {
                tracing::error!("Error connecting to voice channel: {}", e);
                *self.state.write() = ConnectionState::Disconnected;
            }
        }
    }

    /// Tear the connection down on request (the `leave` path). Audio
    /// resources go first so no send operation outlives the handle.
    ///
    /// An active reconnect episode is cancelled first; its next attempt
    /// must never undo an explicit disconnect.
    pub async fn disconnect(&self) {
        self.disconnect_requested.store(true, Ordering::SeqCst);
        if self.is_reconnecting.load(Ordering::SeqCst) {
            // Cut the backoff sleep short so the episode sees the request
            self.connect_requested.notify_one();
        }
        while self.is_reconnecting.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let _guard = self.transition.lock().await;

        self.stop_relay();
        self.transport.disconnect(false).await;
        *self.state.write() = ConnectionState::Disconnected;
        self.disconnect_requested.store(false, Ordering::SeqCst);
    }

    /// Entry point for the liveness check: the transport stopped reporting
    /// connected while we believed it was up.
    pub async fn on_disconnect_detected(self: &Arc<Self>) {
        // Re-entrancy guard: one episode at a time
        if self.is_reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }

        *self.state.write() = ConnectionState::Reconnecting;

        let mut attempt: u32 = 0;

        while attempt < self.policy.max_attempts {
            if self.disconnect_requested.load(Ordering::SeqCst) {
                tracing::info!("Disconnect requested, abandoning reconnection");
                *self.state.write() = ConnectionState::Disconnected;
                self.is_reconnecting.store(false, Ordering::SeqCst);
                return;
            }

            attempt += 1;
            tracing::info!(
                "Attempting to reconnect... (attempt {}/{})",
                attempt,
                self.policy.max_attempts
            );

            // A half-open handle must never linger next to a fresh one
            self.transport.disconnect(true).await;

            match self.transport.connect(&self.target).await {
                Ok(()) if self.transport.is_connected() => {
                    if self.disconnect_requested.load(Ordering::SeqCst) {
                        // The user asked to leave while this attempt was in
                        // flight; the fresh handle goes straight down
                        tracing::info!("Disconnect requested, abandoning reconnection");
                        self.transport.disconnect(true).await;
                        *self.state.write() = ConnectionState::Disconnected;
                        self.is_reconnecting.store(false, Ordering::SeqCst);
                        return;
                    }

                    tracing::info!("Reconnection successful");
                    *self.state.write() = ConnectionState::Connected;
                    self.is_reconnecting.store(false, Ordering::SeqCst);
                    self.arm_relay();
                    return;
                }
                Ok(()) => {
                    tracing::warn!("Transport accepted the handshake but is not connected");
                }
                Err(e) => {
                    tracing::error!("Reconnection attempt failed: {}", e);
                }
            }

            let delay = self.policy.delay_for(attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.connect_requested.notified() => {
                    tracing::info!("Connect requested during backoff, retrying now");
                }
            }
        }

        // Terminal for this episode: no automatic attempts until someone
        // asks for a new connect
        tracing::error!(
            "Max reconnection attempts reached; check the connection and reconnect manually"
        );
        *self.state.write() = ConnectionState::Disconnected;
        self.is_reconnecting.store(false, Ordering::SeqCst);
    }

    /// Spawn the periodic liveness check
    pub fn spawn_liveness_check(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(LIVENESS_INTERVAL);
            ticker.tick().await; // first tick fires immediately

            loop {
                ticker.tick().await;

                if manager.state() == ConnectionState::Connected
                    && !manager.transport.is_connected()
                {
                    tracing::info!("Detected disconnection from voice channel");
                    manager.on_disconnect_detected().await;
                }
            }
        })
    }

    /// (Re)start the audio relay for the freshly connected transport
    fn arm_relay(&self) {
        self.stop_relay();

        let starter = self.relay_starter.lock();
        let Some(starter) = starter.as_ref() else {
            return;
        };

        match starter() {
            Ok(handle) => {
                *self.relay.lock() = Some(handle);
            }
            Err(e) => {
                // Reported, not retried here: a missing device does not
                // come back because we reconnect faster
                tracing::error!("Failed to start audio relay: {}", e);
            }
        }
    }

    fn stop_relay(&self) {
        if let Some(handle) = self.relay.lock().take() {
            handle.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;
    use std::sync::atomic::AtomicUsize;

    fn target() -> ConnectTarget {
        ConnectTarget {
            server_id: 10,
            channel_id: 20,
        }
    }

    fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(5),
            cap_delay: Duration::from_millis(60),
            max_attempts,
        }
    }

    #[test]
    fn backoff_sequence_is_capped_exponential() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (1..=5).map(|a| policy.delay_for(a).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60]);

        // Stays at the cap afterwards
        assert_eq!(policy.delay_for(6).as_secs(), 60);
        assert_eq!(policy.delay_for(30).as_secs(), 60);
    }

    #[tokio::test]
    async fn connect_is_a_noop_when_already_connected() {
        let transport = Arc::new(LoopbackTransport::new());
        let manager = Arc::new(ConnectionManager::new(
            transport.clone(),
            target(),
            ReconnectPolicy::default(),
        ));

        manager.connect().await;
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(transport.connect_calls(), 1);

        manager.connect().await;
        assert_eq!(transport.connect_calls(), 1);
    }

    #[tokio::test]
    async fn handshake_failure_returns_to_disconnected() {
        let transport = Arc::new(LoopbackTransport::new());
        transport.fail_next_connects(1);
        let manager = Arc::new(ConnectionManager::new(
            transport.clone(),
            target(),
            ReconnectPolicy::default(),
        ));

        manager.connect().await;

        // Initial connect failures are not auto-retried
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(transport.connect_calls(), 1);
    }

    #[tokio::test]
    async fn reconnect_episode_recovers_after_failures() {
        let transport = Arc::new(LoopbackTransport::new());
        let manager = Arc::new(ConnectionManager::new(
            transport.clone(),
            target(),
            fast_policy(5),
        ));

        manager.connect().await;
        assert_eq!(manager.state(), ConnectionState::Connected);

        transport.drop_link();
        transport.fail_next_connects(2);
        manager.on_disconnect_detected().await;

        assert_eq!(manager.state(), ConnectionState::Connected);
        // 1 initial + 2 failed + 1 successful
        assert_eq!(transport.connect_calls(), 4);
    }

    #[tokio::test]
    async fn episode_is_terminal_after_max_attempts() {
        let transport = Arc::new(LoopbackTransport::new());
        let manager = Arc::new(ConnectionManager::new(
            transport.clone(),
            target(),
            fast_policy(5),
        ));

        manager.connect().await;
        transport.drop_link();
        transport.fail_next_connects(100);

        manager.on_disconnect_detected().await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        // 1 initial + exactly 5 reconnect attempts, then nothing
        assert_eq!(transport.connect_calls(), 6);

        // A later detection while Disconnected is not an episode; the
        // liveness check never calls in when the state is not Connected,
        // and a direct call still burns no more than a fresh episode
        assert!(!manager.is_reconnecting.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn concurrent_detections_run_one_episode() {
        let transport = Arc::new(LoopbackTransport::new());
        let manager = Arc::new(ConnectionManager::new(
            transport.clone(),
            target(),
            fast_policy(3),
        ));

        manager.connect().await;
        transport.drop_link();
        transport.fail_next_connects(100);

        let a = {
            let m = manager.clone();
            tokio::spawn(async move { m.on_disconnect_detected().await })
        };
        let b = {
            let m = manager.clone();
            tokio::spawn(async move { m.on_disconnect_detected().await })
        };
        let _ = tokio::join!(a, b);

        // Re-entrancy guard: the second call was a no-op
        assert_eq!(transport.connect_calls(), 1 + 3);
    }

    #[tokio::test]
    async fn connect_during_backoff_cuts_sleep_short() {
        let transport = Arc::new(LoopbackTransport::new());
        let manager = Arc::new(ConnectionManager::new(
            transport.clone(),
            target(),
            ReconnectPolicy {
                base_delay: Duration::from_secs(30),
                cap_delay: Duration::from_secs(60),
                max_attempts: 3,
            },
        ));

        manager.connect().await;
        transport.drop_link();
        transport.fail_next_connects(1);

        let episode = {
            let m = manager.clone();
            tokio::spawn(async move { m.on_disconnect_detected().await })
        };

        // Let the first attempt fail and the episode settle into its sleep
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.connect().await;

        // Without the notify this would take 30s; the retry fires now
        tokio::time::timeout(Duration::from_secs(2), episode)
            .await
            .expect("backoff sleep was not cancelled")
            .unwrap();

        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn explicit_disconnect_cancels_reconnect_episode() {
        let transport = Arc::new(LoopbackTransport::new());
        let manager = Arc::new(ConnectionManager::new(
            transport.clone(),
            target(),
            ReconnectPolicy {
                base_delay: Duration::from_secs(30),
                cap_delay: Duration::from_secs(60),
                max_attempts: 3,
            },
        ));

        manager.connect().await;
        transport.drop_link();
        transport.fail_next_connects(1);

        let episode = {
            let m = manager.clone();
            tokio::spawn(async move { m.on_disconnect_detected().await })
        };

        // First attempt fails and the episode settles into its backoff sleep
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Leaving mid-episode ends it; no later attempt may undo this
        manager.disconnect().await;
        tokio::time::timeout(Duration::from_secs(2), episode)
            .await
            .expect("episode did not end on disconnect")
            .unwrap();

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!transport.is_connected());
        // 1 initial + 1 failed reconnect attempt, then nothing
        assert_eq!(transport.connect_calls(), 2);
    }

    #[tokio::test]
    async fn relay_restarts_on_each_successful_connect() {
        let transport = Arc::new(LoopbackTransport::new());
        let manager = Arc::new(ConnectionManager::new(
            transport.clone(),
            target(),
            fast_policy(5),
        ));

        let starts = Arc::new(AtomicUsize::new(0));
        let counter = starts.clone();
        manager.set_relay_starter(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(PipelineError::DeviceUnavailable("none".into()))
        }));

        manager.connect().await;
        assert_eq!(starts.load(Ordering::SeqCst), 1);

        transport.drop_link();
        manager.on_disconnect_detected().await;

        // Re-armed after the reconnect even though the start itself failed
        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }
}
