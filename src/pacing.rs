//! Fixed-interval frame pacing on top of a [`CaptureSession`].
//!
//! The session itself never sleeps; this module layers the classic
//! "enqueue, sleep one interval, poll" loop above it.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::session::{CaptureSession, FrameReadiness, FrameView};
use crate::traits::{CameraDevice, CameraError};

/// Sleeps out the remainder of a fixed frame interval.
#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Duration,
    frame_start: Instant,
}

impl FramePacer {
    /// Pace at one frame per `interval`.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            frame_start: Instant::now(),
        }
    }

    /// Pace at `fps` frames per second. `None` unless `fps` is positive and
    /// finite.
    #[must_use]
    pub fn from_fps(fps: f64) -> Option<Self> {
        if !fps.is_finite() || fps <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(fps.recip()).ok().map(Self::new)
    }

    /// Target frame interval.
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Target rate in frames per second, or 0 for an unpaced loop.
    pub fn frames_per_second(&self) -> f64 {
        if self.interval.is_zero() {
            0.0
        } else {
            self.interval.as_secs_f64().recip()
        }
    }

    /// Time left in the current interval.
    pub fn remaining(&self) -> Duration {
        self.interval.saturating_sub(self.frame_start.elapsed())
    }

    /// Sleep until the current interval ends, then start the next one.
    pub fn wait(&mut self) {
        let remaining = self.remaining();
        if !remaining.is_zero() {
            thread::sleep(remaining);
        }
        self.frame_start = Instant::now();
    }
}

/// Counters collected by [`run_capture_loop`].
#[derive(Debug, Clone)]
pub struct PacingStats {
    /// Polls made for a frame.
    pub attempted: u64,
    /// Polls that produced a frame.
    pub delivered: u64,
    /// Polls that found the frame not ready yet.
    pub dropped: u64,
    /// Wall time spent in the loop.
    pub elapsed: Duration,
    /// Target rate the loop was paced at.
    pub target_fps: f64,
}

impl PacingStats {
    fn new(target_fps: f64) -> Self {
        Self {
            attempted: 0,
            delivered: 0,
            dropped: 0,
            elapsed: Duration::ZERO,
            target_fps,
        }
    }

    /// Delivered frames per second of elapsed time.
    #[allow(clippy::cast_precision_loss)]
    pub fn achieved_fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.delivered as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for PacingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Attempted to display {} frames in {:.2} seconds (wanted {} FPS). Dropped {}.",
            self.attempted,
            self.elapsed.as_secs_f64(),
            self.target_fps,
            self.dropped
        )
    }
}

/// What the frame callback wants the loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    /// Queue the buffer again and keep going.
    Continue,
    /// Leave the loop without queueing the buffer again.
    Stop,
}

/// Capture frames at the pacer's rate until `stop` or `on_frame` ends it.
///
/// Queues the buffer once and sleeps one interval, then on every iteration
/// polls for the frame. A frame that is not ready yet counts as dropped; a
/// ready frame is passed to `on_frame` and the buffer is queued again
/// afterwards. Each iteration ends by sleeping out the interval.
///
/// `stop` is checked before every poll. Errors from the session or from
/// `on_frame` end the loop and are returned.
pub fn run_capture_loop<D, S, F, E>(
    session: &mut CaptureSession<D>,
    pacer: &mut FramePacer,
    mut stop: S,
    mut on_frame: F,
) -> Result<PacingStats, E>
where
    D: CameraDevice,
    S: FnMut() -> bool,
    F: FnMut(FrameView<'_>) -> Result<LoopControl, E>,
    E: From<CameraError>,
{
    let mut stats = PacingStats::new(pacer.frames_per_second());
    session.begin_loading_next_frame()?;
    pacer.wait();

    let started = Instant::now();
    while !stop() {
        stats.attempted += 1;
        let readiness = session.frame_buffer()?;
        let control = match readiness {
            FrameReadiness::NotReady => {
                stats.dropped += 1;
                trace!(attempted = stats.attempted, "Frame not ready");
                LoopControl::Continue
            }
            FrameReadiness::Ready(frame) => {
                stats.delivered += 1;
                let control = on_frame(frame)?;
                if control == LoopControl::Continue {
                    session.begin_loading_next_frame()?;
                }
                control
            }
        };
        if control == LoopControl::Stop {
            break;
        }
        pacer.wait();
    }
    stats.elapsed = started.elapsed();

    debug!(
        attempted = stats.attempted,
        delivered = stats.delivered,
        dropped = stats.dropped,
        "Capture loop finished"
    );
    Ok(stats)
}
