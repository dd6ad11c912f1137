//! Audio capture seam
//! Bridges cpal's push-based input callback into the synchronous pull
//! interface the relay pipeline consumes

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Host, SampleFormat, Stream, StreamConfig};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture device '{0}' not found")]
    NotFound(String),
    #[error("Capture device error: {0}")]
    Backend(String),
    #[error("Capture session closed")]
    Closed,
}

/// Opens capture sessions on a local audio input
pub trait CaptureBackend: Send + Sync {
    /// Open the device. At most one session should be open per process;
    /// the pipeline enforces this by owning the session exclusively.
    fn open(
        &self,
        device_id: &str,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Box<dyn CaptureSession>, CaptureError>;
}

/// An open handle to the capture device. Dropping the session releases it.
pub trait CaptureSession: Send {
    /// Pull `frames` frames of normalized f32 samples. Returns
    /// `frames * channels` interleaved samples.
    fn read_frame(&mut self, frames: usize) -> Result<Vec<f32>, CaptureError>;

    fn channels(&self) -> u16;
}

/// How long a read waits for the driver before giving up
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// cpal-backed capture
pub struct CpalBackend {
    host: Host,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    /// List available input devices
    pub fn list_devices() -> Result<Vec<String>, CaptureError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| CaptureError::Backend(format!("Failed to enumerate input devices: {}", e)))?;

        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }

    fn find_device(&self, device_id: &str) -> Result<cpal::Device, CaptureError> {
        let devices = self
            .host
            .input_devices()
            .map_err(|e| CaptureError::Backend(format!("Failed to enumerate devices: {}", e)))?;

        for device in devices {
            if let Ok(name) = device.name() {
                if name == device_id {
                    return Ok(device);
                }
            }
        }

        Err(CaptureError::NotFound(device_id.to_string()))
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for CpalBackend {
    fn open(
        &self,
        device_id: &str,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Box<dyn CaptureSession>, CaptureError> {
        let device = self.find_device(device_id)?;

        let device_name = device.name().unwrap_or_default();
        tracing::info!("Opening capture device: {}", device_name);

        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let queue: Arc<Mutex<VecDeque<f32>>> =
            Arc::new(Mutex::new(VecDeque::with_capacity(sample_rate as usize)));
        let failed = Arc::new(AtomicBool::new(false));

        let supported = device
            .default_input_config()
            .map_err(|e| CaptureError::Backend(format!("Failed to get input config: {}", e)))?;

        fn err_fn(failed: Arc<AtomicBool>) -> impl FnMut(cpal::StreamError) {
            move |err| {
                tracing::error!("Audio input error: {}", err);
                failed.store(true, Ordering::SeqCst);
            }
        }

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                let queue = queue.clone();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let mut buf = queue.lock();
                        buf.extend(data.iter().copied());
                    },
                    err_fn(failed.clone()),
                    None,
                )
            }
            SampleFormat::I16 => {
                let queue = queue.clone();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let mut buf = queue.lock();
                        buf.extend(data.iter().map(|&s| s as f32 / i16::MAX as f32));
                    },
                    err_fn(failed.clone()),
                    None,
                )
            }
            format => {
                return Err(CaptureError::Backend(format!(
                    "Unsupported sample format: {:?}",
                    format
                )));
            }
        }
        .map_err(|e| CaptureError::Backend(format!("Failed to build input stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| CaptureError::Backend(format!("Failed to start stream: {}", e)))?;

        Ok(Box::new(CpalSession {
            _stream: stream,
            queue,
            failed,
            channels,
        }))
    }
}

/// Live cpal capture session. The stream keeps the driver callback running;
/// dropping the session drops the stream and releases the device.
struct CpalSession {
    _stream: Stream,
    queue: Arc<Mutex<VecDeque<f32>>>,
    failed: Arc<AtomicBool>,
    channels: u16,
}

// Safety: the cpal Stream is only dropped from this session; all sample
// traffic goes through the Arc<Mutex> queue and the atomic failure flag
unsafe impl Send for CpalSession {}

impl CaptureSession for CpalSession {
    fn read_frame(&mut self, frames: usize) -> Result<Vec<f32>, CaptureError> {
        let wanted = frames * self.channels as usize;
        let deadline = Instant::now() + READ_TIMEOUT;

        loop {
            if self.failed.load(Ordering::SeqCst) {
                return Err(CaptureError::Backend("input stream reported an error".into()));
            }

            {
                let mut buf = self.queue.lock();
                if buf.len() >= wanted {
                    return Ok(buf.drain(..wanted).collect());
                }
            }

            if Instant::now() >= deadline {
                return Err(CaptureError::Backend("timed out waiting for samples".into()));
            }

            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}
