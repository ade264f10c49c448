//! camrec - camera/audio recording synchronization core.
//!
//! Coordinates two independently clocked producers, a camera pushing video
//! frame callbacks and an audio device pulled on a capture thread, into one
//! consistent, timestamped encode input stream. Handles time-lapse
//! subsampling, the start-of-recording mute ramp, output size/duration
//! budgets, the borrowed-frame-buffer lifecycle, and abrupt death of the
//! camera producer.
//!
//! Hardware encoders/muxers, container I/O, and camera control stay outside
//! the crate behind the traits in [`capture::traits`].

pub mod capture;
pub mod recorder;
pub mod utils;

pub use capture::{AudioDevice, CameraSession, EncoderSink, FrameSink, VideoFrame};
pub use recorder::{LifecyclePhase, Recorder, RecorderConfig, RecorderEvent};
pub use utils::{RecorderError, RecorderResult};
