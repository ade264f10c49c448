//! Capture-side components
//!
//! Everything between the producers and the encoder: frame intake and buffer
//! accounting for the camera path, chunk pulling and the mute ramp for the
//! audio path, and the collaborator traits both are wired through.

pub mod audio;
pub mod frame_pool;
pub mod timelapse;
pub mod traits;
pub mod video;

#[cfg(feature = "cpal-backend")]
pub mod cpal_device;

pub use audio::{AudioChunk, AudioSource, MuteRamp};
pub use frame_pool::FrameBufferPool;
pub use timelapse::{GateDecision, TimeLapseGate};
pub use traits::{AudioDevice, AudioRead, CameraSession, EncoderSink, FrameSink, VideoFrame};
pub use video::VideoFrameIntake;

#[cfg(feature = "cpal-backend")]
pub use cpal_device::CpalAudioDevice;
