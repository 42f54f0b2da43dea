//! Pointer motion filters.
//!
//! A filter sits between the accumulated relative motion of a frame and the
//! outgoing pointer-motion notification. It may rescale the deltas or zero
//! them entirely to suppress the event; it never fails.

use std::fmt;

/// A pointer motion being prepared for delivery, in device units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionDelta {
    /// Delta on the x axis.
    pub dx: f64,
    /// Delta on the y axis.
    pub dy: f64,
}

impl MotionDelta {
    /// Whether both deltas are zero, i.e. nothing would be delivered.
    pub fn is_zero(&self) -> bool {
        self.dx == 0.0 && self.dy == 0.0
    }
}

/// Transforms pointer motion before delivery.
///
/// A device without a filter delivers motion unchanged.
pub trait MotionFilter: fmt::Debug {
    /// Rewrites `motion` in place. `time` is the event time in
    /// milliseconds.
    fn apply(&mut self, motion: &mut MotionDelta, time: u64);
}

/// Multiplies every motion by a constant speed factor.
#[derive(Debug)]
pub struct LinearAccelerator {
    speed: f64,
}

impl LinearAccelerator {
    /// Creates a linear accelerator with the given factor.
    pub fn new(speed: f64) -> LinearAccelerator {
        LinearAccelerator { speed }
    }
}

impl MotionFilter for LinearAccelerator {
    fn apply(&mut self, motion: &mut MotionDelta, _time: u64) {
        motion.dx *= self.speed;
        motion.dy *= self.speed;
    }
}

const NUM_MOTION_TRACKERS: usize = 16;
/// Trackers older than this no longer contribute to the velocity estimate.
const MOTION_TIMEOUT: u64 = 300; // ms
/// Trackers whose velocity strays further than this from the newest sample
/// end the estimation run.
const MAX_VELOCITY_DIFF: f64 = 1.0; // units/ms

/// Resolution the acceleration curve is tuned for.
const CANONICAL_DPI: f64 = 400.0;

const DEFAULT_THRESHOLD: f64 = 0.4; // units/ms at canonical resolution
const DEFAULT_ACCELERATION: f64 = 2.0; // unitless factor
/// Deceleration floor, keeps very slow motion from stalling entirely.
const MIN_ACCEL_FACTOR: f64 = 0.3;

const DIR_POS_X: u8 = 1 << 0;
const DIR_NEG_X: u8 = 1 << 1;
const DIR_POS_Y: u8 = 1 << 2;
const DIR_NEG_Y: u8 = 1 << 3;

fn direction(dx: f64, dy: f64) -> u8 {
    if dx == 0.0 && dy == 0.0 {
        // stationary, compatible with any direction
        return DIR_POS_X | DIR_NEG_X | DIR_POS_Y | DIR_NEG_Y;
    }
    let mut dir = 0;
    if dx > 0.0 {
        dir |= DIR_POS_X;
    } else if dx < 0.0 {
        dir |= DIR_NEG_X;
    }
    if dy > 0.0 {
        dir |= DIR_POS_Y;
    } else if dy < 0.0 {
        dir |= DIR_NEG_Y;
    }
    dir
}

#[derive(Debug, Clone, Copy, Default)]
struct MotionTracker {
    dx: f64,
    dy: f64,
    time: u64,
    dir: u8,
}

impl MotionTracker {
    fn velocity(&self, time: u64) -> f64 {
        let tdelta = time.saturating_sub(self.time) + 1;
        self.dx.hypot(self.dy) / tdelta as f64
    }
}

/// Adaptive pointer accelerator.
///
/// Keeps a short history of motion samples, estimates a smoothed velocity
/// from the samples that agree in direction and magnitude with the newest
/// one, and maps the estimate through an acceleration curve: a smoothed
/// ramp below the threshold, unity around it and a tail flattening out at
/// the maximum acceleration factor.
pub struct SmoothAccelerator {
    trackers: [MotionTracker; NUM_MOTION_TRACKERS],
    cur_tracker: usize,
    last_velocity: f64,
    threshold: f64,
    accel: f64,
    unit_scale: f64,
}

impl fmt::Debug for SmoothAccelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmoothAccelerator")
            .field("threshold", &self.threshold)
            .field("accel", &self.accel)
            .field("unit_scale", &self.unit_scale)
            .finish_non_exhaustive()
    }
}

impl Default for SmoothAccelerator {
    fn default() -> Self {
        SmoothAccelerator::new()
    }
}

impl SmoothAccelerator {
    /// Creates an accelerator for a device at the canonical resolution.
    pub fn new() -> SmoothAccelerator {
        SmoothAccelerator::with_dpi(CANONICAL_DPI)
    }

    /// Creates an accelerator for a device with the given resolution,
    /// scaling its units into the canonical space the curve is tuned for.
    pub fn with_dpi(dpi: f64) -> SmoothAccelerator {
        SmoothAccelerator {
            trackers: [MotionTracker::default(); NUM_MOTION_TRACKERS],
            cur_tracker: 0,
            last_velocity: 0.0,
            threshold: DEFAULT_THRESHOLD,
            accel: DEFAULT_ACCELERATION,
            unit_scale: if dpi > 0.0 { CANONICAL_DPI / dpi } else { 1.0 },
        }
    }

    fn feed(&mut self, dx: f64, dy: f64, time: u64) {
        self.cur_tracker = (self.cur_tracker + 1) % NUM_MOTION_TRACKERS;
        self.trackers[self.cur_tracker] = MotionTracker {
            dx,
            dy,
            time,
            dir: direction(dx, dy),
        };
    }

    fn tracker(&self, offset: usize) -> &MotionTracker {
        let index = (self.cur_tracker + NUM_MOTION_TRACKERS - offset) % NUM_MOTION_TRACKERS;
        &self.trackers[index]
    }

    /// Velocity estimate in units/ms over the run of older samples that
    /// agree with the newest one in direction and magnitude. The newest
    /// sample only contributes its direction; its own time delta is too
    /// small to give a stable velocity.
    fn velocity(&self, time: u64) -> f64 {
        let mut result = 0.0;
        let mut initial = None;
        let mut dir = self.tracker(0).dir;

        for offset in 1..NUM_MOTION_TRACKERS {
            let tracker = self.tracker(offset);
            if tracker.time > time || time - tracker.time > MOTION_TIMEOUT {
                break;
            }
            dir &= tracker.dir;
            if dir == 0 {
                break;
            }

            let velocity = tracker.velocity(time);
            match initial {
                None => initial = Some(velocity),
                Some(first) if (first - velocity).abs() > MAX_VELOCITY_DIFF => break,
                Some(_) => {}
            }
            result = velocity;
        }

        result
    }

    fn profile(&self, velocity: f64) -> f64 {
        let threshold = self.threshold.max(0.1);
        let accel = self.accel.max(1.0);

        if velocity < threshold / 2.0 {
            return (penumbral_gradient(0.5 + velocity / threshold) * 2.0 - 1.0)
                .max(MIN_ACCEL_FACTOR);
        }
        if velocity <= threshold {
            return 1.0;
        }
        let velocity = velocity / threshold;
        if velocity >= accel {
            return accel;
        }
        1.0 + penumbral_gradient(velocity / accel) * (accel - 1.0)
    }

    /// Windowed average of the curve between the previous and the current
    /// velocity estimate, so a single outlier sample cannot make the factor
    /// jump.
    fn acceleration(&self, velocity: f64) -> f64 {
        (self.profile(velocity)
            + self.profile(self.last_velocity)
            + 4.0 * self.profile((velocity + self.last_velocity) / 2.0))
            / 6.0
    }
}

impl MotionFilter for SmoothAccelerator {
    fn apply(&mut self, motion: &mut MotionDelta, time: u64) {
        self.feed(motion.dx * self.unit_scale, motion.dy * self.unit_scale, time);

        let velocity = self.velocity(time);
        let factor = self.acceleration(velocity);

        motion.dx *= factor;
        motion.dy *= factor;
        self.last_velocity = velocity;
    }
}

/// Profile of the penumbra of a circular light source, used as an
/// S-shaped interpolant on `[0, 1]`.
fn penumbral_gradient(x: f64) -> f64 {
    let x = x * 2.0 - 1.0;
    0.5 + (x * (1.0 - x * x).sqrt() + x.asin()) / std::f64::consts::PI
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_scales_both_axes() {
        let mut filter = LinearAccelerator::new(2.5);
        let mut motion = MotionDelta { dx: 4.0, dy: -2.0 };
        filter.apply(&mut motion, 0);
        assert_eq!(motion, MotionDelta { dx: 10.0, dy: -5.0 });
    }

    #[test]
    fn gradient_endpoints() {
        assert!(penumbral_gradient(0.0).abs() < 1e-9);
        assert!((penumbral_gradient(1.0) - 1.0).abs() < 1e-9);
        assert!((penumbral_gradient(0.5) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn zero_motion_stays_zero() {
        let mut filter = SmoothAccelerator::new();
        let mut motion = MotionDelta { dx: 0.0, dy: 0.0 };
        filter.apply(&mut motion, 100);
        assert!(motion.is_zero());
    }

    #[test]
    fn slow_motion_is_decelerated() {
        let mut filter = SmoothAccelerator::new();
        let mut last = MotionDelta { dx: 0.0, dy: 0.0 };
        for i in 0..6u64 {
            last = MotionDelta { dx: 1.0, dy: 0.0 };
            filter.apply(&mut last, i * 10);
        }
        assert!(last.dx < 1.0, "slow motion factor was {}", last.dx);
        assert!(last.dx >= MIN_ACCEL_FACTOR);
    }

    #[test]
    fn fast_motion_saturates_at_max_factor() {
        let mut filter = SmoothAccelerator::new();
        let mut last = MotionDelta { dx: 0.0, dy: 0.0 };
        for i in 0..6u64 {
            last = MotionDelta { dx: 50.0, dy: 0.0 };
            filter.apply(&mut last, i * 10);
        }
        let factor = last.dx / 50.0;
        assert!(factor > 1.5, "fast motion factor was {factor}");
        assert!(factor <= DEFAULT_ACCELERATION + 1e-9);
    }

    #[test]
    fn direction_reversal_resets_the_estimate() {
        let mut filter = SmoothAccelerator::new();
        for i in 0..4u64 {
            let mut motion = MotionDelta { dx: 50.0, dy: 0.0 };
            filter.apply(&mut motion, i * 10);
        }
        // reversing direction must not inherit the fast estimate: one
        // event later the factor is back in the deceleration region
        let mut motion = MotionDelta { dx: -1.0, dy: 0.0 };
        filter.apply(&mut motion, 40);
        let mut motion = MotionDelta { dx: -1.0, dy: 0.0 };
        filter.apply(&mut motion, 50);
        assert!(motion.dx.abs() < 1.0, "factor was {}", motion.dx.abs());
    }
}
