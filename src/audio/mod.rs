mod capture;
mod pcm;
mod pipeline;
mod relay;

pub use capture::{CaptureBackend, CaptureError, CaptureSession, CpalBackend};
pub use pipeline::{AudioRelayPipeline, PipelineError, RelayHandle};
pub use relay::RelayStream;

pub use pcm::samples_to_s16le;

/// Sample rate for all audio operations (matches the voice transport)
pub const SAMPLE_RATE: u32 = 48000;
/// Channels (stereo relay of the local input)
pub const CHANNELS: u16 = 2;
/// Frames pulled from the capture device per read (20ms at 48kHz)
pub const FRAME_SAMPLES: usize = 960;
/// Bytes produced by one frame of s16le samples across all channels
pub const FRAME_BYTES: usize = FRAME_SAMPLES * CHANNELS as usize * 2;
/// How often the relay loop checks whether the transport wants audio
pub const RELAY_TICK_MS: u64 = 100;

#[cfg(test)]
pub(crate) use capture::testing;
