//! Frame buffer accounting
//!
//! Tracks which camera-owned buffer slots are currently held by the recorder
//! and guarantees each one is returned to the camera exactly once. Removal
//! from the pending set under the lock elects the single releaser, so racing
//! teardown paths (encoder completion, drop path, stop) cannot double-release.

use crate::capture::traits::CameraSession;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Accounting for buffers borrowed from one camera session.
pub struct FrameBufferPool {
    camera: Arc<dyn CameraSession>,
    /// Slot -> capture timestamp of the frame occupying it.
    pending: Mutex<HashMap<u32, i64>>,
    emptied: Condvar,
}

impl FrameBufferPool {
    pub fn new(camera: Arc<dyn CameraSession>) -> Self {
        Self {
            camera,
            pending: Mutex::new(HashMap::new()),
            emptied: Condvar::new(),
        }
    }

    /// Record that `slot` is now held by the recorder.
    ///
    /// Returns false if the slot is already pending, which means the producer
    /// handed out the same buffer twice; the caller must not process the frame.
    pub fn register(&self, slot: u32, timestamp_us: i64) -> bool {
        let mut pending = self.pending.lock();
        if pending.contains_key(&slot) {
            tracing::warn!("frame slot {} registered while still pending", slot);
            return false;
        }
        pending.insert(slot, timestamp_us);
        true
    }

    /// Return `slot` to the camera, exactly once.
    ///
    /// Releasing a slot that is not pending is a no-op; racing release paths
    /// are expected and tolerated.
    pub fn release(&self, slot: u32) {
        let removed = {
            let mut pending = self.pending.lock();
            let removed = pending.remove(&slot).is_some();
            if removed && pending.is_empty() {
                self.emptied.notify_all();
            }
            removed
        };

        if removed {
            // Outside the lock: the camera call may cross a process boundary.
            self.camera.release_recording_frame(slot);
        } else {
            tracing::debug!("ignoring release of non-pending slot {}", slot);
        }
    }

    /// Number of buffers currently held.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Block until every held buffer has been released, or `timeout` elapses.
    /// Returns true if the pool drained.
    pub fn wait_empty(&self, timeout: Duration) -> bool {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return true;
        }
        self.emptied.wait_for(&mut pending, timeout);
        pending.is_empty()
    }

    /// Forcibly return every still-held buffer. Teardown backstop for frames
    /// whose consumer never signaled completion.
    pub fn force_release_all(&self) {
        let slots: Vec<u32> = {
            let mut pending = self.pending.lock();
            let slots = pending.keys().copied().collect();
            pending.clear();
            self.emptied.notify_all();
            slots
        };

        if !slots.is_empty() {
            tracing::warn!("force-releasing {} unreturned frame(s)", slots.len());
        }
        for slot in slots {
            self.camera.release_recording_frame(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCamera {
        releases: AtomicUsize,
    }

    impl CountingCamera {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                releases: AtomicUsize::new(0),
            })
        }
    }

    impl CameraSession for CountingCamera {
        fn camera_id(&self) -> i32 {
            0
        }
        fn start_recording(
            &self,
            _sink: Arc<dyn crate::capture::traits::FrameSink>,
        ) -> crate::utils::RecorderResult<()> {
            Ok(())
        }
        fn stop_recording(&self) {}
        fn disconnect(&self) {}
        fn release_recording_frame(&self, _slot: u32) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_release_is_exactly_once() {
        let camera = CountingCamera::new();
        let pool = FrameBufferPool::new(camera.clone());

        assert!(pool.register(3, 1_000));
        pool.release(3);
        pool.release(3);
        pool.release(99);

        assert_eq!(camera.releases.load(Ordering::SeqCst), 1);
        assert_eq!(pool.pending(), 0);
    }

    #[test]
    fn test_duplicate_registration_refused() {
        let camera = CountingCamera::new();
        let pool = FrameBufferPool::new(camera);

        assert!(pool.register(1, 0));
        assert!(!pool.register(1, 10));
        assert_eq!(pool.pending(), 1);
    }

    #[test]
    fn test_force_release_drains_everything() {
        let camera = CountingCamera::new();
        let pool = FrameBufferPool::new(camera.clone());

        for slot in 0..4 {
            pool.register(slot, slot as i64);
        }
        pool.release(2);
        pool.force_release_all();

        assert_eq!(camera.releases.load(Ordering::SeqCst), 4);
        assert!(pool.wait_empty(Duration::from_millis(1)));
    }

    #[test]
    fn test_wait_empty_times_out_with_pending_frames() {
        let camera = CountingCamera::new();
        let pool = FrameBufferPool::new(camera);

        pool.register(0, 0);
        assert!(!pool.wait_empty(Duration::from_millis(10)));
    }
}
