//! Audio relay pipeline
//! Opens the capture device, wraps it in a RelayStream, and keeps a send
//! operation running on the transport for as long as the link is up

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::capture::{CaptureBackend, CaptureError};
use super::relay::RelayStream;
use super::{FRAME_SAMPLES, RELAY_TICK_MS};
use crate::transport::{SharedRelayStream, VoiceTransport};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Capture device '{0}' not found or invalid")]
    DeviceUnavailable(String),
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

/// Builds and starts relay pipelines. Retrying a failed start is the
/// connection manager's job, not ours.
pub struct AudioRelayPipeline {
    backend: Arc<dyn CaptureBackend>,
    transport: Arc<dyn VoiceTransport>,
    device_id: String,
    sample_rate: u32,
    channels: u16,
}

impl AudioRelayPipeline {
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        transport: Arc<dyn VoiceTransport>,
        device_id: String,
        sample_rate: u32,
        channels: u16,
    ) -> Self {
        Self {
            backend,
            transport,
            device_id,
            sample_rate,
            channels,
        }
    }

    /// Open the capture device and spawn the relay loop. A missing device
    /// is fatal for this attempt and reported upward.
    pub fn start(&self) -> Result<RelayHandle, PipelineError> {
        let session = self
            .backend
            .open(&self.device_id, self.sample_rate, self.channels)
            .map_err(|e| match e {
                CaptureError::NotFound(id) => PipelineError::DeviceUnavailable(id),
                other => PipelineError::Capture(other),
            })?;

        let stream: SharedRelayStream = Arc::new(Mutex::new(RelayStream::new(
            session,
            FRAME_SAMPLES,
        )));

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(relay_loop(self.transport.clone(), stream.clone(), stop_rx));

        tracing::info!("Audio relay started on '{}'", self.device_id);

        Ok(RelayHandle {
            stream,
            stop: stop_tx,
            task,
        })
    }
}

/// Every tick: if the transport is idle, (re)start a send operation sourced
/// from the relay stream. Exits cleanly when the transport is no longer
/// connected or the capture side has been released.
async fn relay_loop(
    transport: Arc<dyn VoiceTransport>,
    stream: SharedRelayStream,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(RELAY_TICK_MS));

    loop {
        tokio::select! {
            _ = stop.changed() => {
                tracing::info!("Audio relay stopped");
                break;
            }
            _ = ticker.tick() => {
                if !transport.is_connected() {
                    tracing::info!("Transport no longer connected, audio relay exiting");
                    break;
                }

                if !transport.is_sending() {
                    if !stream.lock().is_active() {
                        // Capture released itself after an error; nothing
                        // left to feed the transport
                        tracing::warn!("No audio available, relay exiting");
                        break;
                    }

                    if let Err(e) = transport.begin_send(stream.clone()) {
                        tracing::error!("Error starting audio send: {}", e);
                        break;
                    }
                }
            }
        }
    }
}

/// Running relay pipeline. Stopping cancels the loop and releases the
/// capture device immediately.
pub struct RelayHandle {
    stream: SharedRelayStream,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RelayHandle {
    pub fn stop(self) {
        let _ = self.stop.send(true);
        // Release the device now rather than when the transport's in-flight
        // read notices; the next read observes an inert stream
        self.stream.lock().release();
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}
