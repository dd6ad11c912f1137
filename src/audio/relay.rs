//! Byte stream adapter over a capture session
//! The transport requests byte counts that are not aligned to the device's
//! frame size; whole frames are buffered and exact slices handed out

use bytes::BytesMut;

use super::capture::CaptureSession;
use super::pcm::samples_to_s16le;

/// Ordered byte producer wrapping an open capture session.
///
/// `read` never blocks the caller forever, never under-delivers, and never
/// returns a truncated slice: it accumulates whole frames until the request
/// can be satisfied exactly, keeping the remainder buffered for the next
/// call. After the session is released (explicitly or because a read
/// failed) the stream is inert and returns empty data instead of erroring.
pub struct RelayStream {
    session: Option<Box<dyn CaptureSession>>,
    buffer: BytesMut,
    frame_samples: usize,
}

impl RelayStream {
    pub fn new(session: Box<dyn CaptureSession>, frame_samples: usize) -> Self {
        Self {
            session: Some(session),
            buffer: BytesMut::new(),
            frame_samples,
        }
    }

    /// Read exactly `len` bytes, pulling frames from the device as needed.
    /// Returns an empty vec once the stream has gone inert.
    pub fn read(&mut self, len: usize) -> Vec<u8> {
        loop {
            if self.buffer.len() >= len {
                return self.buffer.split_to(len).to_vec();
            }

            let session = match self.session.as_mut() {
                Some(session) => session,
                None => return Vec::new(),
            };

            match session.read_frame(self.frame_samples) {
                Ok(samples) => {
                    self.buffer.extend_from_slice(&samples_to_s16le(&samples));
                }
                Err(e) => {
                    // Degrade to silence: the caller keeps running, the
                    // connection stays up
                    tracing::warn!("Capture read failed, releasing audio resources: {}", e);
                    self.release();
                    return Vec::new();
                }
            }
        }
    }

    /// Drop the capture session and any buffered audio. Subsequent reads
    /// return empty data.
    pub fn release(&mut self) {
        self.session = None;
        self.buffer.clear();
    }

    /// Whether the underlying capture session is still held
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::testing::ScriptedSession;
    use crate::audio::{samples_to_s16le, CHANNELS, FRAME_SAMPLES};
    use std::sync::atomic::Ordering;

    fn ramp_frames(count: usize) -> Vec<Vec<f32>> {
        let total = FRAME_SAMPLES * CHANNELS as usize;
        (0..count)
            .map(|f| {
                (0..total)
                    .map(|i| ((f * total + i) % 2000) as f32 / 2000.0 - 0.5)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn arbitrary_read_sizes_conserve_bytes() {
        let frames = ramp_frames(4);
        let expected: Vec<u8> = frames
            .iter()
            .flat_map(|f| samples_to_s16le(f))
            .collect();

        let session = ScriptedSession::new(frames, CHANNELS);
        let mut stream = RelayStream::new(Box::new(session), FRAME_SAMPLES);

        let mut collected = Vec::new();
        for len in [1usize, 7, 500, 3840, 2000, 1337, 999] {
            let chunk = stream.read(len);
            if chunk.is_empty() {
                break;
            }
            assert_eq!(chunk.len(), len);
            collected.extend(chunk);
        }

        assert_eq!(collected, expected[..collected.len()]);
    }

    #[test]
    fn request_smaller_than_frame_retains_remainder() {
        // 2000 bytes out of a 3840-byte stereo frame: one device read,
        // exactly 2000 returned, 1840 left buffered
        let session = ScriptedSession::new(ramp_frames(2), CHANNELS);
        let reads = session.reads.clone();
        let mut stream = RelayStream::new(Box::new(session), FRAME_SAMPLES);

        let first = stream.read(2000);
        assert_eq!(first.len(), 2000);
        assert_eq!(reads.load(Ordering::SeqCst), 1);

        // The remainder satisfies the next request without touching the device
        let second = stream.read(1840);
        assert_eq!(second.len(), 1840);
        assert_eq!(reads.load(Ordering::SeqCst), 1);

        let expected = samples_to_s16le(&ramp_frames(1)[0]);
        let mut combined = first;
        combined.extend(second);
        assert_eq!(combined, expected);
    }

    #[test]
    fn capture_failure_turns_stream_inert() {
        // One good frame, then the script runs dry
        let session = ScriptedSession::new(ramp_frames(1), CHANNELS);
        let mut stream = RelayStream::new(Box::new(session), FRAME_SAMPLES);

        assert_eq!(stream.read(3840).len(), 3840);
        assert!(stream.is_active());

        // Next read hits the failure: resources released, empty data out
        assert!(stream.read(100).is_empty());
        assert!(!stream.is_active());

        // Inert stream keeps returning empty instead of failing the caller
        assert!(stream.read(100).is_empty());
    }

    #[test]
    fn release_is_idempotent() {
        let session = ScriptedSession::new(ramp_frames(1), CHANNELS);
        let mut stream = RelayStream::new(Box::new(session), FRAME_SAMPLES);

        stream.release();
        stream.release();
        assert!(stream.read(64).is_empty());
    }
}
