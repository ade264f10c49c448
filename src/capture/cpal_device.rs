//! cpal-backed audio capture device
//!
//! Bridges cpal's push-style input stream to the pull-style [`AudioDevice`]
//! contract: the stream callback appends i16 LE PCM to a bounded ring, and
//! `read` takes from the ring with a bounded wait. The cpal stream is not
//! `Send`, so it is created, played, and dropped on a dedicated thread that
//! stays alive for the duration of the capture.

use crate::capture::traits::{AudioDevice, AudioRead};
use crate::utils::{RecorderError, RecorderResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Longest a single `read` will wait for captured data.
const READ_TIMEOUT: Duration = Duration::from_millis(700);

/// Ring capacity: one second of audio. Overruns drop the oldest data.
fn ring_capacity(sample_rate: u32, channels: u16) -> usize {
    sample_rate as usize * channels as usize * 2
}

#[derive(Default)]
struct Ring {
    queue: Mutex<VecDeque<u8>>,
    data_ready: Condvar,
}

impl Ring {
    fn push(&self, bytes: &[u8], capacity: usize) {
        let mut queue = self.queue.lock();
        queue.extend(bytes.iter().copied());
        let excess = queue.len().saturating_sub(capacity);
        if excess > 0 {
            queue.drain(..excess);
        }
        self.data_ready.notify_one();
    }
}

/// Default-host microphone capture.
pub struct CpalAudioDevice {
    sample_rate: u32,
    channels: u16,
    ring: Arc<Ring>,
    capacity: usize,
    running: Arc<AtomicBool>,
    stream_thread: Option<JoinHandle<()>>,
    /// Total bytes handed out, for deriving capture timestamps.
    consumed_bytes: u64,
}

impl CpalAudioDevice {
    /// Open the default input device at the requested format.
    pub fn open(sample_rate: u32, channels: u16) -> RecorderResult<Self> {
        let host = cpal::default_host();
        host.default_input_device()
            .ok_or_else(|| RecorderError::Resource("no default audio input device".into()))?;

        Ok(Self {
            sample_rate,
            channels,
            ring: Arc::new(Ring::default()),
            capacity: ring_capacity(sample_rate, channels),
            running: Arc::new(AtomicBool::new(false)),
            stream_thread: None,
            consumed_bytes: 0,
        })
    }

}

/// Position of `bytes` of consumed i16 PCM on the capture clock.
fn bytes_to_us(bytes: u64, sample_rate: u32, channels: u16) -> i64 {
    let bytes_per_second = sample_rate as u64 * channels as u64 * 2;
    (bytes * 1_000_000 / bytes_per_second) as i64
}

impl AudioDevice for CpalAudioDevice {
    fn start(&mut self) -> RecorderResult<()> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.running.store(true, Ordering::SeqCst);

        let ring = self.ring.clone();
        let capacity = self.capacity;
        let running = self.running.clone();
        let config = cpal::StreamConfig {
            channels: self.channels,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        // The stream must be created and dropped on the same thread.
        let handle = std::thread::spawn(move || {
            let device = match cpal::default_host().default_input_device() {
                Some(d) => d,
                None => {
                    tracing::error!("audio input device disappeared before start");
                    return;
                }
            };
            let sample_format = match device.default_input_config() {
                Ok(c) => c.sample_format(),
                Err(e) => {
                    tracing::error!("failed to query input config: {}", e);
                    return;
                }
            };

            let err_fn = |err| tracing::error!("audio input stream error: {}", err);
            let stream = match sample_format {
                SampleFormat::I16 => device.build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let bytes: Vec<u8> =
                            data.iter().flat_map(|s| s.to_le_bytes()).collect();
                        ring.push(&bytes, capacity);
                    },
                    err_fn,
                    None,
                ),
                _ => device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let bytes: Vec<u8> = data
                            .iter()
                            .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                            .flat_map(|s| s.to_le_bytes())
                            .collect();
                        ring.push(&bytes, capacity);
                    },
                    err_fn,
                    None,
                ),
            };

            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!("failed to build audio input stream: {}", e);
                    return;
                }
            };
            if let Err(e) = stream.play() {
                tracing::error!("failed to start audio input stream: {}", e);
                return;
            }

            while running.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(50));
            }
        });

        self.stream_thread = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.stream_thread.take() {
            let _ = handle.join();
        }
        self.ring.queue.lock().clear();
    }

    fn read(&mut self, buf: &mut [u8]) -> RecorderResult<AudioRead> {
        let timestamp_us = bytes_to_us(self.consumed_bytes, self.sample_rate, self.channels);

        let mut queue = self.ring.queue.lock();
        if queue.is_empty() {
            self.ring.data_ready.wait_for(&mut queue, READ_TIMEOUT);
        }

        // Whole samples only.
        let take = queue.len().min(buf.len()) & !1;
        for byte in buf.iter_mut().take(take) {
            *byte = queue.pop_front().unwrap_or(0);
        }
        drop(queue);

        self.consumed_bytes += take as u64;
        Ok(AudioRead {
            bytes: take,
            timestamp_us,
        })
    }
}

impl Drop for CpalAudioDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_drops_oldest_on_overrun() {
        let ring = Ring::default();
        ring.push(&[1, 2, 3, 4], 4);
        ring.push(&[5, 6], 4);

        let queue = ring.queue.lock();
        assert_eq!(queue.iter().copied().collect::<Vec<u8>>(), vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_timestamp_derivation() {
        // 44.1 kHz mono: one second of bytes maps to one second of time.
        assert_eq!(bytes_to_us(44_100 * 2, 44_100, 1), 1_000_000);
        // Stereo halves the per-channel time.
        assert_eq!(bytes_to_us(44_100 * 2, 44_100, 2), 500_000);
        assert_eq!(bytes_to_us(0, 48_000, 2), 0);
    }
}
