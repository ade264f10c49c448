//! Time-lapse frame admission
//!
//! Decides which captured frames enter the encode stream and what output
//! timestamp they carry. With time-lapse off every frame passes through with
//! its capture timestamp. With time-lapse on, frames are admitted only when at
//! least `time_between_capture_us` of real time has elapsed since the last
//! admitted frame, and admitted frames are re-stamped at a constant synthetic
//! spacing so sparse captures play back as a smooth constant-rate stream.

/// Outcome of a single admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Forward the frame to the encoder with this output timestamp.
    Admit { output_timestamp_us: i64 },
    /// Discard (and release) the frame.
    Drop,
}

/// Admission gate for one recording session.
///
/// Not thread-safe by itself; the intake worker is its only caller.
#[derive(Debug)]
pub struct TimeLapseGate {
    enabled: bool,
    /// Minimum real time between two admitted captures.
    time_between_capture_us: i64,
    /// Spacing of admitted frames in the output stream (1s / frame rate).
    time_between_frames_us: i64,
    /// Real timestamp of the last admitted frame.
    last_real_us: Option<i64>,
    /// Output timestamp assigned to the last admitted frame.
    last_output_us: i64,
}

impl TimeLapseGate {
    /// Gate with time-lapse disabled: admit everything, timestamps untouched.
    pub fn passthrough() -> Self {
        Self {
            enabled: false,
            time_between_capture_us: 0,
            time_between_frames_us: 0,
            last_real_us: None,
            last_output_us: 0,
        }
    }

    /// Gate with time-lapse enabled.
    ///
    /// `time_between_capture_us` is the configured inter-capture interval,
    /// `time_between_frames_us` the output spacing derived from the configured
    /// frame rate. Both are fixed for the session.
    pub fn time_lapse(time_between_capture_us: i64, time_between_frames_us: i64) -> Self {
        Self {
            enabled: true,
            time_between_capture_us,
            time_between_frames_us,
            last_real_us: None,
            last_output_us: 0,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Decide whether the frame captured at `timestamp_us` enters the stream.
    pub fn admit(&mut self, timestamp_us: i64) -> GateDecision {
        if !self.enabled {
            return GateDecision::Admit {
                output_timestamp_us: timestamp_us,
            };
        }

        let output_timestamp_us = match self.last_real_us {
            // First frame is always admitted and anchors the output clock.
            None => timestamp_us,
            Some(last_real) => {
                if timestamp_us - last_real < self.time_between_capture_us {
                    return GateDecision::Drop;
                }
                self.last_output_us + self.time_between_frames_us
            }
        };

        self.last_real_us = Some(timestamp_us);
        self.last_output_us = output_timestamp_us;
        GateDecision::Admit {
            output_timestamp_us,
        }
    }
}
