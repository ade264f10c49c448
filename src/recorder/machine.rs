//! Recorder state machine
//!
//! Top-level controller that owns the capture components and drives the
//! recording lifecycle. Two independently clocked producers feed it: the
//! camera pushes frame callbacks on its own thread, and a dedicated audio
//! thread pulls chunks from the capture device. Both report encoder progress
//! to the output budget; a budget breach or a producer failure is delivered as
//! a control signal to a small control thread, which performs the stop so that
//! no producer thread ever has to join itself.
//!
//! A single state lock (`inner`) guards phase transitions and resource
//! acquisition/release. Frame admission decisions and payload handling happen
//! on the worker threads without that lock held.

use crate::capture::audio::{AudioSource, MuteRamp};
use crate::capture::timelapse::TimeLapseGate;
use crate::capture::traits::{AudioDevice, CameraSession, EncoderSink, FrameSink};
use crate::capture::video::{VideoFrameIntake, FRAME_DRAIN_TIMEOUT};
use crate::recorder::budget::{BudgetBreach, OutputBudgetMonitor};
use crate::recorder::state::{
    CameraOwnership, LifecyclePhase, RecorderConfig, RecorderEvent, RecordingSession,
};
use crate::utils::{RecorderError, RecorderResult};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{broadcast, mpsc};

/// Signals delivered to the control thread by the producer paths.
#[derive(Debug)]
pub(crate) enum ControlSignal {
    BudgetExceeded(BudgetBreach),
    CameraLost,
    AudioFailed(String),
    VideoFailed(String),
}

/// A bound camera with its explicit release responsibility.
struct CameraBinding {
    session: Arc<dyn CameraSession>,
    ownership: CameraOwnership,
}

/// Handle to the running audio pull thread.
struct AudioLoop {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    /// The loop parks its `AudioSource` here on exit so pause can resume it.
    returned: Arc<Mutex<Option<AudioSource>>>,
}

#[derive(Default)]
struct Inner {
    config: RecorderConfig,
    camera: Option<CameraBinding>,
    encoder: Option<Arc<dyn EncoderSink>>,
    /// Audio device parked between configuration and start.
    audio_device: Option<Box<dyn AudioDevice>>,
    /// Audio source parked while Paused (keeps its ramp epoch).
    audio_parked: Option<AudioSource>,
    audio_loop: Option<AudioLoop>,
    budget: Option<Arc<OutputBudgetMonitor>>,
    amplitude: Option<Arc<AtomicI32>>,
    control_tx: Option<mpsc::UnboundedSender<ControlSignal>>,
    control_thread: Option<JoinHandle<()>>,
    sessions: Vec<RecordingSession>,
}

struct Shared {
    phase: RwLock<LifecyclePhase>,
    /// The single state lock.
    inner: Mutex<Inner>,
    /// Live intake, kept outside the state lock so encoder completions and
    /// camera callbacks never contend with lifecycle operations.
    intake: Mutex<Option<Arc<VideoFrameIntake>>>,
    event_tx: broadcast::Sender<RecorderEvent>,
}

/// The recorder state machine.
///
/// Cheap to clone through `Arc` internally; all methods take `&self` and are
/// safe to call concurrently with producer callbacks.
pub struct Recorder {
    shared: Arc<Shared>,
}

impl Recorder {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                phase: RwLock::new(LifecyclePhase::Initialized),
                inner: Mutex::new(Inner::default()),
                intake: Mutex::new(None),
                event_tx,
            }),
        }
    }

    /// Subscribe to asynchronous status notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> LifecyclePhase {
        *self.shared.phase.read()
    }

    /// Replace the configuration surface. Allowed only before `start`.
    ///
    /// Returns the phase to Initialized: the new configuration has not been
    /// validated, so `prepare` must run again before `start`.
    pub fn configure(&self, config: RecorderConfig) -> RecorderResult<()> {
        let mut inner = self.shared.inner.lock();
        self.require_config_phase("configure")?;
        inner.config = config;
        *self.shared.phase.write() = LifecyclePhase::Initialized;
        Ok(())
    }

    /// Bind a camera session with an explicit ownership tag.
    ///
    /// The session's backing camera id must match the configured id; a
    /// mismatch is an error, never a silent rebind.
    pub fn set_camera(
        &self,
        session: Arc<dyn CameraSession>,
        ownership: CameraOwnership,
    ) -> RecorderResult<()> {
        let mut inner = self.shared.inner.lock();
        self.require_config_phase("set_camera")?;

        if inner.camera.is_some() {
            return Err(RecorderError::Resource(
                "a camera is already bound; reset first".into(),
            ));
        }
        let backing_id = session.camera_id();
        if backing_id != inner.config.camera_id {
            return Err(RecorderError::Resource(format!(
                "recording proxy is backed by camera {}, expected {}",
                backing_id, inner.config.camera_id
            )));
        }

        tracing::info!("camera {} bound ({:?})", backing_id, ownership);
        inner.camera = Some(CameraBinding { session, ownership });
        Ok(())
    }

    /// Install the audio capture device.
    pub fn set_audio_device(&self, device: Box<dyn AudioDevice>) -> RecorderResult<()> {
        let mut inner = self.shared.inner.lock();
        self.require_config_phase("set_audio_device")?;
        inner.audio_device = Some(device);
        Ok(())
    }

    /// Install the downstream encoder/muxer.
    pub fn set_encoder(&self, encoder: Arc<dyn EncoderSink>) -> RecorderResult<()> {
        let mut inner = self.shared.inner.lock();
        self.require_config_phase("set_encoder")?;
        inner.encoder = Some(encoder);
        Ok(())
    }

    /// Validate the configuration and collaborators; fail fast rather than at
    /// `start`. Transitions Initialized -> Configured.
    pub fn prepare(&self) -> RecorderResult<()> {
        let inner = self.shared.inner.lock();
        self.require_config_phase("prepare")?;

        inner.config.validate()?;
        if inner.camera.is_none() {
            return Err(RecorderError::Resource("no camera bound".into()));
        }
        if inner.audio_device.is_none() {
            return Err(RecorderError::Resource("no audio device installed".into()));
        }
        if inner.encoder.is_none() {
            return Err(RecorderError::Configuration(
                "no encoder sink installed".into(),
            ));
        }

        *self.shared.phase.write() = LifecyclePhase::Configured;
        tracing::debug!(
            "prepared: {}x{}@{}fps, time-lapse {}",
            inner.config.width,
            inner.config.height,
            inner.config.frame_rate,
            inner.config.time_lapse_enabled,
        );
        Ok(())
    }

    /// Begin recording. Transitions Configured -> Recording.
    ///
    /// Calling `start` while already Recording reports an error and acquires
    /// nothing twice.
    pub fn start(&self) -> RecorderResult<()> {
        let mut inner = self.shared.inner.lock();
        let phase = *self.shared.phase.read();
        if phase != LifecyclePhase::Configured {
            return Err(RecorderError::InvalidState {
                operation: "start",
                phase,
            });
        }

        let encoder = inner
            .encoder
            .clone()
            .ok_or_else(|| RecorderError::Configuration("no encoder sink installed".into()))?;
        let camera = inner
            .camera
            .as_ref()
            .map(|b| b.session.clone())
            .ok_or_else(|| RecorderError::Resource("no camera bound".into()))?;
        let device = inner
            .audio_device
            .take()
            .ok_or_else(|| RecorderError::Resource("no audio device installed".into()))?;

        // Fallible acquisitions first, with rollback, so a failed start leaves
        // the machine exactly where it was.
        let mut source = AudioSource::new(device, MuteRamp::default());
        if let Err(e) = source.start() {
            inner.audio_device = Some(source.into_device());
            return Err(e);
        }

        let gate = if inner.config.time_lapse_enabled {
            TimeLapseGate::time_lapse(
                inner.config.time_between_capture_us,
                inner.config.time_between_frames_us(),
            )
        } else {
            TimeLapseGate::passthrough()
        };

        let budget = Arc::new(OutputBudgetMonitor::new(
            inner.config.max_file_size_bytes,
            inner.config.max_duration_us,
        ));
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let intake = VideoFrameIntake::start(
            camera.clone(),
            gate,
            encoder.clone(),
            budget.clone(),
            control_tx.clone(),
        );

        let sink: Arc<dyn FrameSink> = intake.clone();
        if let Err(e) = camera.start_recording(sink) {
            intake.shutdown(FRAME_DRAIN_TIMEOUT);
            source.stop();
            inner.audio_device = Some(source.into_device());
            return Err(e);
        }

        // Past the point of failure: wire everything up.
        inner.amplitude = Some(source.amplitude_handle());
        budget.start();
        inner.audio_loop = Some(spawn_audio_loop(
            source,
            encoder,
            budget.clone(),
            control_tx.clone(),
        ));
        inner.control_thread = Some(spawn_control_thread(self.shared.clone(), control_rx));
        inner.control_tx = Some(control_tx);
        inner.budget = Some(budget);
        inner.sessions.clear();
        inner.sessions.push(RecordingSession::begin(0));
        *self.shared.intake.lock() = Some(intake);

        *self.shared.phase.write() = LifecyclePhase::Recording;
        let _ = self.shared.event_tx.send(RecorderEvent::Started);
        tracing::info!("recording started");
        Ok(())
    }

    /// Suspend capture. Transitions Recording -> Paused.
    ///
    /// The audio capture device is released (the device object is retained for
    /// resume) and incoming video frames are returned to the camera untouched.
    pub fn pause(&self) -> RecorderResult<()> {
        let mut inner = self.shared.inner.lock();
        let phase = *self.shared.phase.read();
        if phase != LifecyclePhase::Recording {
            return Err(RecorderError::InvalidState {
                operation: "pause",
                phase,
            });
        }

        if let Some(intake) = self.shared.intake.lock().as_ref() {
            intake.suspend();
        }
        if let Some(source) = stop_audio_loop(&mut inner) {
            inner.audio_parked = Some(source);
        }
        if let Some(budget) = inner.budget.clone() {
            budget.pause();
            close_last_session(&mut inner, &budget);
        }

        *self.shared.phase.write() = LifecyclePhase::Paused;
        let _ = self.shared.event_tx.send(RecorderEvent::Paused);
        tracing::info!("recording paused");
        Ok(())
    }

    /// Resume capture. Transitions Paused -> Recording.
    pub fn resume(&self) -> RecorderResult<()> {
        let mut inner = self.shared.inner.lock();
        let phase = *self.shared.phase.read();
        if phase != LifecyclePhase::Paused {
            return Err(RecorderError::InvalidState {
                operation: "resume",
                phase,
            });
        }

        let mut source = inner
            .audio_parked
            .take()
            .ok_or_else(|| RecorderError::Resource("no parked audio source".into()))?;
        if let Err(e) = source.start() {
            inner.audio_parked = Some(source);
            return Err(e);
        }

        let encoder = inner
            .encoder
            .clone()
            .ok_or_else(|| RecorderError::Configuration("no encoder sink installed".into()))?;
        let budget = inner
            .budget
            .clone()
            .ok_or_else(|| RecorderError::Runtime("no active budget monitor".into()))?;
        let control_tx = inner
            .control_tx
            .clone()
            .ok_or_else(|| RecorderError::Runtime("no active control channel".into()))?;

        budget.resume();
        inner.audio_loop = Some(spawn_audio_loop(source, encoder, budget, control_tx));
        let index = inner.sessions.len();
        inner.sessions.push(RecordingSession::begin(index));
        if let Some(intake) = self.shared.intake.lock().as_ref() {
            intake.resume();
        }

        *self.shared.phase.write() = LifecyclePhase::Recording;
        let _ = self.shared.event_tx.send(RecorderEvent::Resumed);
        tracing::info!("recording resumed");
        Ok(())
    }

    /// Stop recording, draining and releasing every in-flight buffer.
    ///
    /// Safe to call concurrently with `on_frame_ready` and with the
    /// budget-triggered stop; a stop that loses the race is a no-op.
    pub fn stop(&self) -> RecorderResult<()> {
        let control = {
            let mut inner = self.shared.inner.lock();
            let phase = *self.shared.phase.read();
            match phase {
                LifecyclePhase::Recording | LifecyclePhase::Paused => {
                    let control = teardown(&self.shared, &mut inner, LifecyclePhase::Stopped);
                    let _ = self.shared.event_tx.send(RecorderEvent::Stopped);
                    tracing::info!("recording stopped");
                    control
                }
                // Racing teardown paths are tolerated.
                LifecyclePhase::Stopped => None,
                _ => {
                    return Err(RecorderError::InvalidState {
                        operation: "stop",
                        phase,
                    })
                }
            }
        };
        join_control(control);
        Ok(())
    }

    /// Forcibly return to Initialized from any phase, releasing everything.
    /// Used both for normal teardown and for error recovery.
    pub fn reset(&self) {
        let control = {
            let mut inner = self.shared.inner.lock();
            let phase = *self.shared.phase.read();
            let control = match phase {
                LifecyclePhase::Recording | LifecyclePhase::Paused => {
                    teardown(&self.shared, &mut inner, LifecyclePhase::Initialized)
                }
                _ => inner.control_thread.take(),
            };

            let released = inner.camera.take();
            if let Some(binding) = released {
                if binding.ownership == CameraOwnership::Cold {
                    binding.session.disconnect();
                }
            }
            inner.encoder = None;
            inner.audio_device = None;
            inner.audio_parked = None;
            inner.budget = None;
            inner.amplitude = None;
            inner.control_tx = None;
            inner.sessions.clear();
            inner.config = RecorderConfig::default();
            *self.shared.intake.lock() = None;

            *self.shared.phase.write() = LifecyclePhase::Initialized;
            control
        };
        join_control(control);
        tracing::info!("recorder reset");
    }

    /// Encoder completion signal for an admitted video frame. The buffer goes
    /// back to the camera; signaling an unknown slot is a no-op.
    pub fn release_frame(&self, slot: u32) {
        match self.shared.intake.lock().as_ref() {
            Some(intake) => intake.release_frame(slot),
            None => tracing::debug!("release_frame({}) with no active intake", slot),
        }
    }

    /// Camera producer death notification.
    ///
    /// Any transport (binder death recipient, process-exit watch, heartbeat
    /// timeout) may deliver this. The recorder transitions to Error, releases
    /// everything it owns, and processes no further frame callbacks. Never
    /// propagated as a panic.
    pub fn on_camera_lost(&self) {
        // Cut frame processing immediately, before the control thread gets to
        // the full teardown.
        if let Some(intake) = self.shared.intake.lock().as_ref() {
            intake.suspend();
        }

        let tx = self.shared.inner.lock().control_tx.clone();
        match tx {
            Some(tx) => {
                tracing::warn!("camera recording proxy died");
                let _ = tx.send(ControlSignal::CameraLost);
            }
            None => tracing::debug!("camera death notification outside a recording"),
        }
    }

    /// Recorded duration so far (paused time excluded), in microseconds.
    pub fn duration_us(&self) -> i64 {
        self.shared
            .inner
            .lock()
            .budget
            .as_ref()
            .map(|b| b.elapsed_us())
            .unwrap_or(0)
    }

    /// Cumulative bytes the encoder reported for this recording.
    pub fn bytes_emitted(&self) -> u64 {
        self.shared
            .inner
            .lock()
            .budget
            .as_ref()
            .map(|b| b.bytes())
            .unwrap_or(0)
    }

    /// Video buffers currently held (queued or with the encoder).
    pub fn pending_frames(&self) -> usize {
        self.shared
            .intake
            .lock()
            .as_ref()
            .map(|i| i.pending_frames())
            .unwrap_or(0)
    }

    /// Peak audio amplitude since the last call. Resets on read.
    pub fn max_amplitude(&self) -> i32 {
        self.shared
            .inner
            .lock()
            .amplitude
            .as_ref()
            .map(|a| a.swap(0, Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Per-segment records of the current/last recording.
    pub fn sessions(&self) -> Vec<RecordingSession> {
        self.shared.inner.lock().sessions.clone()
    }

    fn require_config_phase(&self, operation: &'static str) -> RecorderResult<()> {
        let phase = *self.shared.phase.read();
        match phase {
            LifecyclePhase::Initialized | LifecyclePhase::Configured => Ok(()),
            _ => Err(RecorderError::InvalidState { operation, phase }),
        }
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Full teardown of a live recording. Caller holds the state lock and decides
/// the target phase and the events to emit. Returns the control thread handle
/// so the caller can join it outside the lock.
fn teardown(
    shared: &Arc<Shared>,
    inner: &mut Inner,
    target: LifecyclePhase,
) -> Option<JoinHandle<()>> {
    let was_recording = *shared.phase.read() == LifecyclePhase::Recording;

    // Audio first: the pull loop exits within one bounded device read.
    if let Some(source) = stop_audio_loop(inner) {
        drop(source); // capture device released with it
    }
    inner.audio_parked = None;

    // Stop frame delivery, then drain the intake. The encoder can still
    // signal completions during the bounded drain because the live intake
    // handle stays published until the drain is done.
    if let Some(binding) = inner.camera.as_ref() {
        binding.session.stop_recording();
    }
    let intake = shared.intake.lock().clone();
    if let Some(intake) = intake {
        intake.shutdown(FRAME_DRAIN_TIMEOUT);
    }
    *shared.intake.lock() = None;

    if let Some(budget) = inner.budget.clone() {
        if was_recording {
            budget.pause();
            close_last_session(inner, &budget);
        }
    }

    // Release the camera binding; only a cold-bound camera is torn down.
    if let Some(binding) = inner.camera.take() {
        match binding.ownership {
            CameraOwnership::Cold => binding.session.disconnect(),
            CameraOwnership::Hot => {
                tracing::debug!("hot camera returned to caller still running")
            }
        }
    }

    // Dropping the last control sender lets the control thread run out.
    inner.control_tx = None;
    *shared.phase.write() = target;
    inner.control_thread.take()
}

fn join_control(handle: Option<JoinHandle<()>>) {
    if let Some(handle) = handle {
        if handle.join().is_err() {
            tracing::error!("control thread panicked");
        }
    }
}

fn close_last_session(inner: &mut Inner, budget: &OutputBudgetMonitor) {
    let prior: i64 = inner
        .sessions
        .iter()
        .take(inner.sessions.len().saturating_sub(1))
        .map(|s| s.duration_us)
        .sum();
    let total = budget.elapsed_us();
    if let Some(session) = inner.sessions.last_mut() {
        session.end(total - prior);
    }
}

fn stop_audio_loop(inner: &mut Inner) -> Option<AudioSource> {
    let audio = inner.audio_loop.take()?;
    audio.running.store(false, Ordering::Release);
    if audio.handle.join().is_err() {
        tracing::error!("audio pull thread panicked");
    }
    let mut returned = audio.returned.lock();
    returned.take()
}

fn spawn_audio_loop(
    mut source: AudioSource,
    encoder: Arc<dyn EncoderSink>,
    budget: Arc<OutputBudgetMonitor>,
    control_tx: mpsc::UnboundedSender<ControlSignal>,
) -> AudioLoop {
    let running = Arc::new(AtomicBool::new(true));
    let returned: Arc<Mutex<Option<AudioSource>>> = Arc::new(Mutex::new(None));

    let handle = {
        let running = running.clone();
        let returned = returned.clone();
        std::thread::spawn(move || {
            while running.load(Ordering::Acquire) {
                match source.pull() {
                    Ok(Some(chunk)) => {
                        if let Err(e) = encoder.write_audio(chunk.timestamp_us, &chunk.data) {
                            let _ = control_tx.send(ControlSignal::AudioFailed(e.to_string()));
                            break;
                        }
                        if let Some(breach) = budget.observe_bytes(encoder.bytes_written()) {
                            let _ = control_tx.send(ControlSignal::BudgetExceeded(breach));
                        }
                    }
                    // A short or empty read is absorbed; pull again.
                    Ok(None) => continue,
                    Err(e) => {
                        let _ = control_tx.send(ControlSignal::AudioFailed(e.to_string()));
                        break;
                    }
                }
            }
            source.stop();
            *returned.lock() = Some(source);
        })
    };

    AudioLoop {
        running,
        handle,
        returned,
    }
}

/// Consumes control signals and performs asynchronous stops. A terminal
/// signal tears the recording down and ends the thread; otherwise the thread
/// runs out when the last sender is dropped during a normal stop.
fn spawn_control_thread(
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<ControlSignal>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while let Some(signal) = rx.blocking_recv() {
            let (target, events) = match signal {
                ControlSignal::BudgetExceeded(breach) => {
                    let event = match breach {
                        BudgetBreach::FileSize => RecorderEvent::MaxFileSizeReached,
                        BudgetBreach::Duration => RecorderEvent::MaxDurationReached,
                    };
                    (LifecyclePhase::Stopped, vec![event, RecorderEvent::Stopped])
                }
                ControlSignal::CameraLost => {
                    (LifecyclePhase::Error, vec![RecorderEvent::CameraLost])
                }
                ControlSignal::AudioFailed(msg) | ControlSignal::VideoFailed(msg) => {
                    tracing::error!("runtime failure: {}", msg);
                    (LifecyclePhase::Error, vec![RecorderEvent::Error(msg)])
                }
            };

            {
                let mut inner = shared.inner.lock();
                let phase = *shared.phase.read();
                if !matches!(phase, LifecyclePhase::Recording | LifecyclePhase::Paused) {
                    // A user stop won the race; nothing left to do.
                    continue;
                }
                // Detach our own handle; this thread cannot join itself.
                let _ = teardown(&shared, &mut inner, target);
            }
            for event in events {
                let _ = shared.event_tx.send(event);
            }
            break;
        }
    })
}
