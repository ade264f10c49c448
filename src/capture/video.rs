//! Video frame intake
//!
//! Receives frame-ready callbacks from the camera's own thread and keeps that
//! path non-blocking: the callback only registers the buffer and pushes the
//! frame into a bounded queue. A dedicated worker thread drains the queue,
//! runs the time-lapse gate, and hands admitted frames to the encoder. Frames
//! refused at any point are released back to the camera immediately; admitted
//! frames stay registered in the [`FrameBufferPool`] until the encoder signals
//! completion.

use crate::capture::frame_pool::FrameBufferPool;
use crate::capture::timelapse::{GateDecision, TimeLapseGate};
use crate::capture::traits::{CameraSession, EncoderSink, FrameSink, VideoFrame};
use crate::recorder::budget::OutputBudgetMonitor;
use crate::recorder::machine::ControlSignal;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;

/// Depth of the intake queue. Matches the handful of buffer slots a camera
/// typically rotates through; a full queue means the worker is behind and the
/// frame is dropped rather than the callback blocked.
const INTAKE_QUEUE_DEPTH: usize = 8;

/// Bounded wait for the encoder to return admitted frames during teardown.
pub const FRAME_DRAIN_TIMEOUT: Duration = Duration::from_millis(700);

/// Intake front-end for one recording.
pub struct VideoFrameIntake {
    camera: Arc<dyn CameraSession>,
    pool: Arc<FrameBufferPool>,
    accepting: AtomicBool,
    dropped: AtomicU64,
    tx: Mutex<Option<mpsc::Sender<VideoFrame>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl VideoFrameIntake {
    /// Spawn the intake worker and return the sink to hand to the camera.
    pub(crate) fn start(
        camera: Arc<dyn CameraSession>,
        gate: TimeLapseGate,
        encoder: Arc<dyn EncoderSink>,
        budget: Arc<OutputBudgetMonitor>,
        control_tx: mpsc::UnboundedSender<ControlSignal>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(INTAKE_QUEUE_DEPTH);
        let pool = Arc::new(FrameBufferPool::new(camera.clone()));

        let worker = {
            let pool = pool.clone();
            std::thread::spawn(move || {
                worker_loop(rx, gate, encoder, budget, pool, control_tx);
            })
        };

        Arc::new(Self {
            camera,
            pool,
            accepting: AtomicBool::new(true),
            dropped: AtomicU64::new(0),
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Stop admitting new frames. Already-queued frames still flush.
    pub fn suspend(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    pub fn resume(&self) {
        self.accepting.store(true, Ordering::Release);
    }

    /// Encoder completion signal: the buffer goes back to the camera.
    pub fn release_frame(&self, slot: u32) {
        self.pool.release(slot);
    }

    /// Buffers currently held (queued or with the encoder).
    pub fn pending_frames(&self) -> usize {
        self.pool.pending()
    }

    /// Frames refused at the intake because the recorder was suspended or the
    /// queue was full. Gate drops are not counted here.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drain and terminate the intake.
    ///
    /// Stops accepting, closes the queue so the worker flushes what is already
    /// buffered, then waits up to `timeout` for the encoder to return admitted
    /// frames before force-releasing the remainder. After this returns, every
    /// buffer ever registered has reached its release.
    pub fn shutdown(&self, timeout: Duration) {
        self.accepting.store(false, Ordering::Release);
        *self.tx.lock() = None;

        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!("video intake worker panicked");
            }
        }

        if !self.pool.wait_empty(timeout) {
            self.pool.force_release_all();
        }
    }
}

impl FrameSink for VideoFrameIntake {
    /// Camera-thread entry point. Must not block.
    fn on_frame_ready(&self, frame: VideoFrame) {
        if !self.accepting.load(Ordering::Acquire) {
            // Not ours to keep; hand the buffer straight back.
            self.camera.release_recording_frame(frame.slot);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if !self.pool.register(frame.slot, frame.timestamp_us) {
            // Producer handed out a slot it never got back. Do not touch it.
            return;
        }

        let slot = frame.slot;
        let refused = match self.tx.lock().as_ref() {
            Some(tx) => tx.try_send(frame).is_err(),
            None => true,
        };
        if refused {
            self.pool.release(slot);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("intake queue unavailable, dropped frame in slot {}", slot);
        }
    }
}

fn worker_loop(
    mut rx: mpsc::Receiver<VideoFrame>,
    mut gate: TimeLapseGate,
    encoder: Arc<dyn EncoderSink>,
    budget: Arc<OutputBudgetMonitor>,
    pool: Arc<FrameBufferPool>,
    control_tx: mpsc::UnboundedSender<ControlSignal>,
) {
    // Ends when the sender side is dropped and the queue is drained.
    while let Some(frame) = rx.blocking_recv() {
        match gate.admit(frame.timestamp_us) {
            GateDecision::Drop => pool.release(frame.slot),
            GateDecision::Admit {
                output_timestamp_us,
            } => match encoder.write_video(output_timestamp_us, &frame) {
                Ok(()) => {
                    if let Some(breach) = budget.observe_bytes(encoder.bytes_written()) {
                        let _ = control_tx.send(ControlSignal::BudgetExceeded(breach));
                    }
                }
                Err(e) => {
                    pool.release(frame.slot);
                    let _ = control_tx.send(ControlSignal::VideoFailed(e.to_string()));
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::RecorderResult;
    use std::collections::HashSet;

    struct TestCamera {
        released: Mutex<Vec<u32>>,
    }

    impl TestCamera {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                released: Mutex::new(Vec::new()),
            })
        }
    }

    impl CameraSession for TestCamera {
        fn camera_id(&self) -> i32 {
            0
        }
        fn start_recording(&self, _sink: Arc<dyn FrameSink>) -> RecorderResult<()> {
            Ok(())
        }
        fn stop_recording(&self) {}
        fn disconnect(&self) {}
        fn release_recording_frame(&self, slot: u32) {
            self.released.lock().push(slot);
        }
    }

    #[derive(Default)]
    struct TestEncoder {
        frames: Mutex<Vec<(i64, u32)>>,
        bytes: AtomicU64,
    }

    impl EncoderSink for TestEncoder {
        fn write_video(&self, output_timestamp_us: i64, frame: &VideoFrame) -> RecorderResult<()> {
            self.frames.lock().push((output_timestamp_us, frame.slot));
            self.bytes
                .fetch_add(frame.payload.len() as u64, Ordering::Relaxed);
            Ok(())
        }
        fn write_audio(&self, _timestamp_us: i64, data: &[u8]) -> RecorderResult<()> {
            self.bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
            Ok(())
        }
        fn bytes_written(&self) -> u64 {
            self.bytes.load(Ordering::Relaxed)
        }
    }

    fn frame(slot: u32, timestamp_us: i64) -> VideoFrame {
        VideoFrame {
            slot,
            timestamp_us,
            payload: Arc::from(vec![0u8; 64].into_boxed_slice()),
        }
    }

    fn intake_with(
        camera: Arc<TestCamera>,
        encoder: Arc<TestEncoder>,
        gate: TimeLapseGate,
    ) -> Arc<VideoFrameIntake> {
        let budget = Arc::new(OutputBudgetMonitor::new(u64::MAX, 0));
        budget.start();
        let (control_tx, _control_rx) = mpsc::unbounded_channel();
        VideoFrameIntake::start(camera, gate, encoder, budget, control_tx)
    }

    #[test]
    fn test_every_frame_released_exactly_once() {
        let camera = TestCamera::new();
        let encoder = Arc::new(TestEncoder::default());
        let intake = intake_with(camera.clone(), encoder.clone(), TimeLapseGate::passthrough());

        for slot in 0..20 {
            intake.on_frame_ready(frame(slot, slot as i64 * 33_000));
        }

        // Nothing returned the admitted frames, so shutdown force-releases.
        intake.shutdown(Duration::from_millis(50));

        let released = camera.released.lock();
        let unique: HashSet<u32> = released.iter().copied().collect();
        assert_eq!(released.len(), 20);
        assert_eq!(unique.len(), 20);
    }

    #[test]
    fn test_gate_dropped_frames_released_immediately() {
        let camera = TestCamera::new();
        let encoder = Arc::new(TestEncoder::default());
        let gate = TimeLapseGate::time_lapse(1_000_000, 33_333);
        let intake = intake_with(camera.clone(), encoder.clone(), gate);

        intake.on_frame_ready(frame(0, 0));
        intake.on_frame_ready(frame(1, 300_000));
        intake.on_frame_ready(frame(2, 1_100_000));

        // Let the worker drain, then return the admitted frames.
        std::thread::sleep(Duration::from_millis(50));
        let admitted: Vec<(i64, u32)> = encoder.frames.lock().clone();
        assert_eq!(admitted, vec![(0, 0), (33_333, 2)]);

        for (_, slot) in &admitted {
            intake.release_frame(*slot);
        }
        intake.shutdown(Duration::from_millis(50));

        let mut released = camera.released.lock().clone();
        released.sort_unstable();
        assert_eq!(released, vec![0, 1, 2]);
    }

    #[test]
    fn test_suspended_intake_returns_frames_untouched() {
        let camera = TestCamera::new();
        let encoder = Arc::new(TestEncoder::default());
        let intake = intake_with(camera.clone(), encoder.clone(), TimeLapseGate::passthrough());

        intake.suspend();
        intake.on_frame_ready(frame(7, 0));

        assert_eq!(camera.released.lock().clone(), vec![7]);
        assert_eq!(intake.dropped_frames(), 1);
        assert!(encoder.frames.lock().is_empty());
        intake.shutdown(Duration::from_millis(10));
    }

    #[test]
    fn test_no_processing_after_shutdown() {
        let camera = TestCamera::new();
        let encoder = Arc::new(TestEncoder::default());
        let intake = intake_with(camera.clone(), encoder.clone(), TimeLapseGate::passthrough());

        intake.shutdown(Duration::from_millis(10));
        intake.on_frame_ready(frame(5, 0));

        assert_eq!(camera.released.lock().clone(), vec![5]);
        assert!(encoder.frames.lock().is_empty());
    }

    #[test]
    fn test_concurrent_stop_leaves_no_frame_unreleased() {
        let camera = TestCamera::new();
        let encoder = Arc::new(TestEncoder::default());
        let intake = intake_with(camera.clone(), encoder.clone(), TimeLapseGate::passthrough());

        let producer = {
            let intake = intake.clone();
            std::thread::spawn(move || {
                for slot in 0..200u32 {
                    intake.on_frame_ready(frame(slot, slot as i64 * 1_000));
                    std::thread::yield_now();
                }
            })
        };

        // Return admitted frames while the producer is still pushing.
        let releaser = {
            let intake = intake.clone();
            let encoder = encoder.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let admitted: Vec<(i64, u32)> = encoder.frames.lock().clone();
                    for (_, slot) in admitted {
                        intake.release_frame(slot);
                    }
                    std::thread::yield_now();
                }
            })
        };

        std::thread::sleep(Duration::from_millis(5));
        intake.shutdown(Duration::from_millis(100));
        producer.join().unwrap();
        releaser.join().unwrap();

        // Every slot delivered was released exactly once.
        let released = camera.released.lock();
        let unique: HashSet<u32> = released.iter().copied().collect();
        assert_eq!(released.len(), 200);
        assert_eq!(unique.len(), 200);
        assert_eq!(intake.pending_frames(), 0);
    }

    struct FailingEncoder;

    impl EncoderSink for FailingEncoder {
        fn write_video(&self, _ts: i64, _frame: &VideoFrame) -> RecorderResult<()> {
            Err(crate::utils::RecorderError::Runtime("encoder gone".into()))
        }
        fn write_audio(&self, _ts: i64, _data: &[u8]) -> RecorderResult<()> {
            Ok(())
        }
        fn bytes_written(&self) -> u64 {
            0
        }
    }

    #[test]
    fn test_encoder_failure_releases_frame_and_signals() {
        let camera = TestCamera::new();
        let budget = Arc::new(OutputBudgetMonitor::new(u64::MAX, 0));
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let intake = VideoFrameIntake::start(
            camera.clone(),
            TimeLapseGate::passthrough(),
            Arc::new(FailingEncoder),
            budget,
            control_tx,
        );

        intake.on_frame_ready(frame(0, 0));
        intake.shutdown(Duration::from_millis(50));

        assert_eq!(camera.released.lock().clone(), vec![0]);
        assert!(matches!(
            control_rx.try_recv(),
            Ok(ControlSignal::VideoFailed(_))
        ));
    }
}
