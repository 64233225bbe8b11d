//! Virtual time for the link simulation.
//!
//! One tick is one nanosecond of simulated time. Time advances only when the
//! scheduler dispatches events, never from wall-clock observation.

use serde::{Deserialize, Serialize};

/// A logical timestamp in simulation time.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct VirtualTime(u64);

impl VirtualTime {
    /// The zero-point of simulation time.
    pub const ZERO: VirtualTime = VirtualTime(0);

    /// Create a new `VirtualTime` from a raw tick value.
    #[inline]
    pub fn new(ticks: u64) -> Self {
        VirtualTime(ticks)
    }

    /// Return the raw tick value.
    #[inline]
    pub fn ticks(self) -> u64 {
        self.0
    }

    /// The absolute time `delay` ticks after `self`.
    /// Returns `None` on overflow.
    #[inline]
    pub fn plus(self, delay: u64) -> Option<VirtualTime> {
        self.0.checked_add(delay).map(VirtualTime)
    }

    /// The first multiple of `step` strictly after `self`.
    ///
    /// This is the cadence boundary `step * (1 + floor(now / step))`.
    /// Returns `None` if `step` is zero or the boundary overflows.
    #[inline]
    pub fn next_boundary(self, step: u64) -> Option<VirtualTime> {
        if step == 0 {
            return None;
        }
        (self.0 / step)
            .checked_add(1)
            .and_then(|n| n.checked_mul(step))
            .map(VirtualTime)
    }

    /// Returns `true` if `self` is strictly before `other`.
    #[inline]
    pub fn is_before(self, other: VirtualTime) -> bool {
        self.0 < other.0
    }

    /// Ticks elapsed since `earlier`, or `None` if `earlier` is after `self`.
    #[inline]
    pub fn duration_since(self, earlier: VirtualTime) -> Option<u64> {
        self.0.checked_sub(earlier.0)
    }
}

impl std::fmt::Display for VirtualTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T={}", self.0)
    }
}
