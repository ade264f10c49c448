//! Collaborator trait definitions
//!
//! The recorder core never talks to hardware or codecs directly. Cameras,
//! audio capture devices, and the encoder/muxer are reached through the traits
//! here; production code wires in real device handles, tests wire in mocks.

use crate::utils::RecorderResult;
use std::sync::Arc;

/// A video frame borrowed from the camera producer.
///
/// The payload references camera-owned memory and is never copied; cloning the
/// frame only clones the reference. The `slot` is the producer-assigned index
/// used to return the buffer via
/// [`CameraSession::release_recording_frame`]. Every frame delivered to the
/// core is released exactly once, whether it was admitted, dropped, or caught
/// by a teardown.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Producer-assigned buffer slot, the release token.
    pub slot: u32,

    /// Monotonic capture timestamp in microseconds.
    pub timestamp_us: i64,

    /// Reference to the camera-owned pixel data.
    pub payload: Arc<[u8]>,
}

/// Result of one audio device read.
#[derive(Debug, Clone, Copy)]
pub struct AudioRead {
    /// Bytes actually written into the caller's buffer. May be short or zero.
    pub bytes: usize,

    /// Capture timestamp of the first sample, in microseconds.
    pub timestamp_us: i64,
}

/// Destination for camera frame-ready notifications.
///
/// Implemented by the core ([`VideoFrameIntake`](crate::capture::VideoFrameIntake));
/// camera sessions call it from their own callback thread. Implementations
/// must return quickly and never block on encoder I/O.
pub trait FrameSink: Send + Sync {
    fn on_frame_ready(&self, frame: VideoFrame);
}

/// Handle to a camera recording session.
///
/// Methods may be invoked during teardown after the camera process has died;
/// implementations must treat them as idempotent no-ops in that case rather
/// than faulting.
pub trait CameraSession: Send + Sync {
    /// Id of the backing camera, checked against the configured id at bind time.
    fn camera_id(&self) -> i32;

    /// Begin delivering frames to `sink`.
    fn start_recording(&self, sink: Arc<dyn FrameSink>) -> RecorderResult<()>;

    /// Stop frame delivery. The camera itself keeps running.
    fn stop_recording(&self);

    /// Tear the camera down entirely. Called only for cold-bound cameras.
    fn disconnect(&self);

    /// Return a borrowed frame buffer so the producer can reuse the slot.
    /// Releasing an already-released slot must be a no-op.
    fn release_recording_frame(&self, slot: u32);
}

/// Handle to an audio capture device.
///
/// `read` blocks until data is available, but only up to a bounded latency
/// (hundreds of milliseconds); after that it returns a short or empty read
/// rather than hanging.
pub trait AudioDevice: Send {
    /// Begin capturing.
    fn start(&mut self) -> RecorderResult<()>;

    /// Release the capture stream. The device object itself stays usable and
    /// can be started again; stopping a stopped device is a no-op.
    fn stop(&mut self);

    /// Pull captured bytes into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> RecorderResult<AudioRead>;
}

/// The downstream encoder/muxer.
///
/// Video writes hand over a borrowed frame; the encoder signals completion
/// later through [`Recorder::release_frame`](crate::recorder::Recorder::release_frame),
/// at which point the buffer goes back to the camera. Audio chunks are owned
/// by the caller and copied or consumed synchronously.
pub trait EncoderSink: Send + Sync {
    fn write_video(&self, output_timestamp_us: i64, frame: &VideoFrame) -> RecorderResult<()>;

    fn write_audio(&self, timestamp_us: i64, data: &[u8]) -> RecorderResult<()>;

    /// Cumulative bytes written to the output so far.
    fn bytes_written(&self) -> u64;
}
