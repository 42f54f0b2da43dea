//! Monotonic time for input event timestamps.

use rustix::time::{ClockId, Timespec};
use std::marker::PhantomData;

/// Id for a clock according to unix clockid_t
pub trait ClockSource {
    /// Gets the id of the clock source
    const ID: ClockId;
}

/// Monotonic clock
#[derive(Debug)]
pub struct Monotonic;

impl ClockSource for Monotonic {
    const ID: ClockId = ClockId::Monotonic;
}

/// Defines a clock with a specific kind
#[derive(Debug)]
pub struct Clock<Kind: ClockSource> {
    _kind: PhantomData<Kind>,
}

impl<Kind: ClockSource> Clock<Kind> {
    /// Initialize a new clock
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Clock { _kind: PhantomData }
    }

    /// Returns the current time
    pub fn now(&self) -> Time<Kind> {
        rustix::time::clock_gettime(Kind::ID).into()
    }
}

/// A point in time for a clock with a specific kind
#[derive(Debug, Clone, Copy)]
pub struct Time<Kind> {
    tp: Timespec,
    _kind: PhantomData<Kind>,
}

impl Time<Monotonic> {
    /// Returns the time in milliseconds
    ///
    /// This matches the timestamps attached to input events: milliseconds
    /// since an arbitrary (but fixed) monotonic origin.
    pub fn as_millis(&self) -> u64 {
        debug_assert!(self.tp.tv_sec >= 0);
        debug_assert!(self.tp.tv_nsec >= 0);

        self.tp.tv_sec as u64 * 1000 + self.tp.tv_nsec as u64 / 1_000_000
    }
}

impl<Kind> From<Timespec> for Time<Kind> {
    #[inline]
    fn from(tp: Timespec) -> Self {
        Time {
            tp,
            _kind: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_millis() {
        let clock: Clock<Monotonic> = Clock::new();
        let a = clock.now().as_millis();
        let b = clock.now().as_millis();
        assert!(b >= a);
    }

    #[test]
    fn millis_conversion() {
        let t: Time<Monotonic> = Timespec {
            tv_sec: 3,
            tv_nsec: 5_400_000,
        }
        .into();
        assert_eq!(t.as_millis(), 3005);
    }
}
