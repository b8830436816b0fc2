//! Rational media time
//!
//! Timestamps are carried as `value / timescale` so that sums and
//! differences of sample times stay exact across tracks recorded at
//! different clock rates.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::ops::{Add, Sub};

/// Default timescale used when converting from seconds
pub const DEFAULT_TIMESCALE: i32 = 600;

/// A point (or span) on a media timeline
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaTime {
    pub value: i64,
    pub timescale: i32,
}

impl MediaTime {
    pub const ZERO: MediaTime = MediaTime {
        value: 0,
        timescale: 1,
    };

    /// Create a media time. A non-positive timescale is treated as 1.
    pub fn new(value: i64, timescale: i32) -> Self {
        Self {
            value,
            timescale: timescale.max(1),
        }
    }

    /// Convert seconds to a media time, rounding to the nearest tick
    pub fn from_seconds(seconds: f64, timescale: i32) -> Self {
        let timescale = timescale.max(1);
        if !seconds.is_finite() {
            return Self::new(0, timescale);
        }
        Self::new((seconds * timescale as f64).round() as i64, timescale)
    }

    /// Time in seconds
    pub fn seconds(&self) -> f64 {
        self.value as f64 / self.timescale as f64
    }

    /// Re-express this time at another timescale (rounded)
    pub fn convert_scale(&self, timescale: i32) -> Self {
        let timescale = timescale.max(1);
        if timescale == self.timescale {
            return *self;
        }
        let scaled = (self.value as i128 * timescale as i128) as f64 / self.timescale as f64;
        Self::new(scaled.round() as i64, timescale)
    }

    pub fn is_positive(&self) -> bool {
        self.value > 0
    }

    fn common_scale(a: &MediaTime, b: &MediaTime) -> i64 {
        let (x, y) = (a.timescale as i64, b.timescale as i64);
        x / gcd(x, y) * y
    }

    fn ticks_at(&self, scale: i64) -> i64 {
        self.value * (scale / self.timescale as i64)
    }
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.abs().max(1)
}

/// Narrow an lcm scale back into the `i32` range, losing precision only
/// when the two timescales have no usable common multiple.
fn narrow(value: i64, scale: i64) -> MediaTime {
    if scale <= i32::MAX as i64 {
        MediaTime::new(value, scale as i32)
    } else {
        MediaTime::from_seconds(value as f64 / scale as f64, DEFAULT_TIMESCALE)
    }
}

impl Add for MediaTime {
    type Output = MediaTime;

    fn add(self, rhs: MediaTime) -> MediaTime {
        let scale = MediaTime::common_scale(&self, &rhs);
        narrow(self.ticks_at(scale) + rhs.ticks_at(scale), scale)
    }
}

impl Sub for MediaTime {
    type Output = MediaTime;

    fn sub(self, rhs: MediaTime) -> MediaTime {
        let scale = MediaTime::common_scale(&self, &rhs);
        narrow(self.ticks_at(scale) - rhs.ticks_at(scale), scale)
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.value as i128 * other.timescale as i128;
        let rhs = other.value as i128 * self.timescale as i128;
        lhs.cmp(&rhs)
    }
}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MediaTime {}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

/// A span of a media timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start: MediaTime,
    pub duration: MediaTime,
}

impl TimeRange {
    pub fn new(start: MediaTime, duration: MediaTime) -> Self {
        Self { start, duration }
    }

    /// Range covering `[start, end)`
    pub fn from_start_end(start: MediaTime, end: MediaTime) -> Self {
        Self {
            start,
            duration: end - start,
        }
    }

    pub fn end(&self) -> MediaTime {
        self.start + self.duration
    }

    pub fn is_empty(&self) -> bool {
        !self.duration.is_positive()
    }
}
