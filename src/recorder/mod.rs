//! Recording state machine module
//!
//! - `machine`: the top-level [`Recorder`] controller
//! - `state`: lifecycle phases, configuration, events, session records
//! - `budget`: output size/duration bounding

pub mod budget;
pub mod machine;
pub mod state;

pub use budget::{BudgetBreach, OutputBudgetMonitor};
pub use machine::Recorder;
pub use state::{
    AudioEncoderKind, AudioSourceKind, CameraOwnership, LifecyclePhase, OutputFormat,
    RecorderConfig, RecorderEvent, RecordingSession, VideoEncoderKind, VideoSourceKind,
    MAX_FILE_SIZE_BYTES,
};
