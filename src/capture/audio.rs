//! Audio pull path
//!
//! [`AudioSource`] pulls fixed-size chunks from an [`AudioDevice`] on demand
//! and runs them through the [`MuteRamp`], which suppresses the shutter/signal
//! tone a camera plays at recording start: audio is fully muted for an initial
//! window, then gain rises linearly to unity so the transition is not audible
//! as a click.

use crate::capture::traits::{AudioDevice, AudioRead};
use crate::utils::{RecorderError, RecorderResult};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Largest audio chunk handed to the encoder, in bytes.
pub const MAX_AUDIO_CHUNK_BYTES: usize = 2048;

/// Initial fully-muted window after recording start, in microseconds.
pub const AUTO_RAMP_START_US: i64 = 700_000;

/// Length of the linear gain ramp that follows the muted window.
pub const AUTO_RAMP_DURATION_US: i64 = 300_000;

/// One pulled, gain-adjusted audio chunk.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub data: Vec<u8>,
    pub timestamp_us: i64,
}

/// Start-of-recording attenuation envelope.
#[derive(Debug, Clone, Copy)]
pub struct MuteRamp {
    mute_us: i64,
    ramp_us: i64,
}

impl MuteRamp {
    pub fn new(mute_us: i64, ramp_us: i64) -> Self {
        Self { mute_us, ramp_us }
    }

    /// Gain for a chunk starting `t_us` after recording start, in `[0, 1]`.
    pub fn gain(&self, t_us: i64) -> f32 {
        if t_us < self.mute_us {
            0.0
        } else if t_us >= self.mute_us + self.ramp_us {
            1.0
        } else {
            (t_us - self.mute_us) as f32 / self.ramp_us as f32
        }
    }
}

impl Default for MuteRamp {
    fn default() -> Self {
        Self::new(AUTO_RAMP_START_US, AUTO_RAMP_DURATION_US)
    }
}

/// Pull-side audio producer for one recording.
///
/// Owns the capture device exclusively; the recorder's audio thread is the
/// only caller. The ramp epoch is the timestamp of the first chunk ever pulled
/// and survives pause/resume, so a resumed recording does not mute again.
pub struct AudioSource {
    device: Box<dyn AudioDevice>,
    ramp: MuteRamp,
    epoch_us: Option<i64>,
    max_amplitude: Arc<AtomicI32>,
}

impl AudioSource {
    pub fn new(device: Box<dyn AudioDevice>, ramp: MuteRamp) -> Self {
        Self {
            device,
            ramp,
            epoch_us: None,
            max_amplitude: Arc::new(AtomicI32::new(0)),
        }
    }

    /// Shared handle to the running peak-amplitude tracker.
    pub fn amplitude_handle(&self) -> Arc<AtomicI32> {
        self.max_amplitude.clone()
    }

    /// Give the device back, e.g. when a failed start rolls back.
    pub fn into_device(self) -> Box<dyn AudioDevice> {
        self.device
    }

    pub fn start(&mut self) -> RecorderResult<()> {
        self.device.start()
    }

    pub fn stop(&mut self) {
        self.device.stop();
    }

    /// Pull one chunk from the device.
    ///
    /// Returns `Ok(None)` for an empty read (absorbed locally, the caller just
    /// pulls again); propagates device errors for the recorder to handle as a
    /// runtime failure.
    pub fn pull(&mut self) -> RecorderResult<Option<AudioChunk>> {
        let mut buf = [0u8; MAX_AUDIO_CHUNK_BYTES];
        let AudioRead {
            bytes,
            timestamp_us,
        } = self.device.read(&mut buf)?;

        if bytes == 0 {
            return Ok(None);
        }
        if bytes > MAX_AUDIO_CHUNK_BYTES {
            return Err(RecorderError::Runtime(format!(
                "audio device reported {} bytes for a {}-byte buffer",
                bytes, MAX_AUDIO_CHUNK_BYTES
            )));
        }

        let mut data = buf[..bytes].to_vec();
        self.track_amplitude(&data);

        let epoch = *self.epoch_us.get_or_insert(timestamp_us);
        let gain = self.ramp.gain(timestamp_us - epoch);
        if gain < 1.0 {
            apply_gain(&mut data, gain);
        }

        Ok(Some(AudioChunk {
            data,
            timestamp_us,
        }))
    }

    // Peak tracking happens before the ramp so the meter reflects what the
    // microphone heard, not what the encoder received.
    fn track_amplitude(&self, data: &[u8]) {
        let mut peak = self.max_amplitude.load(Ordering::Relaxed);
        for sample in data.chunks_exact(2) {
            let value = i16::from_le_bytes([sample[0], sample[1]]).unsigned_abs() as i32;
            if value > peak {
                peak = value;
            }
        }
        self.max_amplitude.store(peak, Ordering::Relaxed);
    }
}

/// Scale i16 little-endian PCM in place.
fn apply_gain(data: &mut [u8], gain: f32) {
    for sample in data.chunks_exact_mut(2) {
        let value = i16::from_le_bytes([sample[0], sample[1]]);
        let scaled = (value as f32 * gain) as i16;
        sample.copy_from_slice(&scaled.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ramp_defaults() {
        let ramp = MuteRamp::default();
        assert_eq!(ramp.gain(0), 0.0);
        assert_eq!(ramp.gain(699_999), 0.0);
        assert_eq!(ramp.gain(1_000_000), 1.0);
        assert_eq!(ramp.gain(5_000_000), 1.0);

        let mid = ramp.gain(850_000);
        assert!((mid - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_ramp_is_monotonic() {
        let ramp = MuteRamp::default();
        let mut last = -1.0f32;
        for t in (0..1_200_000).step_by(10_000) {
            let g = ramp.gain(t);
            assert!(g >= last);
            assert!((0.0..=1.0).contains(&g));
            last = g;
        }
    }

    #[test]
    fn test_apply_gain_scales_samples() {
        let mut data = Vec::new();
        data.extend_from_slice(&1000i16.to_le_bytes());
        data.extend_from_slice(&(-2000i16).to_le_bytes());

        apply_gain(&mut data, 0.5);

        assert_eq!(i16::from_le_bytes([data[0], data[1]]), 500);
        assert_eq!(i16::from_le_bytes([data[2], data[3]]), -1000);
    }

    struct ScriptedDevice {
        reads: Vec<(Vec<u8>, i64)>,
    }

    impl AudioDevice for ScriptedDevice {
        fn start(&mut self) -> RecorderResult<()> {
            Ok(())
        }
        fn stop(&mut self) {}
        fn read(&mut self, buf: &mut [u8]) -> RecorderResult<AudioRead> {
            let (data, timestamp_us) = self.reads.remove(0);
            buf[..data.len()].copy_from_slice(&data);
            Ok(AudioRead {
                bytes: data.len(),
                timestamp_us,
            })
        }
    }

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_pull_mutes_then_passes_audio() {
        let device = ScriptedDevice {
            reads: vec![
                (pcm(&[4000, -4000]), 0),
                (pcm(&[4000, -4000]), 1_500_000),
            ],
        };
        let mut source = AudioSource::new(Box::new(device), MuteRamp::default());

        // First chunk falls inside the mute window relative to its own epoch.
        let muted = source.pull().unwrap().unwrap();
        assert_eq!(muted.data, pcm(&[0, 0]));

        // 1.5s after the epoch the ramp is done.
        let open = source.pull().unwrap().unwrap();
        assert_eq!(open.data, pcm(&[4000, -4000]));
        assert_eq!(open.timestamp_us, 1_500_000);
    }

    #[test]
    fn test_amplitude_tracked_before_gain() {
        let device = ScriptedDevice {
            reads: vec![(pcm(&[123, -9000, 42]), 0)],
        };
        let mut source = AudioSource::new(Box::new(device), MuteRamp::default());
        let amplitude = source.amplitude_handle();

        source.pull().unwrap();
        assert_eq!(amplitude.load(Ordering::Relaxed), 9000);
    }

    #[test]
    fn test_empty_read_absorbed() {
        let device = ScriptedDevice {
            reads: vec![(Vec::new(), 0)],
        };
        let mut source = AudioSource::new(Box::new(device), MuteRamp::default());
        assert!(source.pull().unwrap().is_none());
    }
}
