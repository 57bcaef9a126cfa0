//! Time and unit conversions.
//!
//! The canonical unit everywhere in this crate is the millisecond, because
//! that is the only unit the relay board understands. A [`TimeBase`] carries
//! the milliseconds-per-second factor; shrinking it below the real-time
//! value of 1000 compresses every derived duration proportionally, which is
//! how accelerated test runs are built. All duration math downstream of the
//! configuration goes through a single `TimeBase` so a compressed run stays
//! internally consistent.

use crate::constants::{
    HOURS_PER_DAY, MILLISECONDS_PER_SECOND, MINUTES_PER_HOUR, SECONDS_PER_MINUTE,
};
use crate::error::{AssayError, Result};

/// Conversion base between wall-clock units and board milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeBase {
    milliseconds_per_second: f64,
}

impl TimeBase {
    /// Real-time base: 1000 milliseconds per second.
    pub fn real_time() -> Self {
        Self {
            milliseconds_per_second: MILLISECONDS_PER_SECOND as f64,
        }
    }

    /// Base with a custom milliseconds-per-second factor.
    ///
    /// `with_scale(1.0)` makes one simulated second last one real
    /// millisecond, compressing a simulated day into 86.4 real seconds.
    pub fn with_scale(milliseconds_per_second: f64) -> Self {
        Self {
            milliseconds_per_second,
        }
    }

    /// Milliseconds per (possibly scaled) second.
    pub fn ms_per_second(&self) -> f64 {
        self.milliseconds_per_second
    }

    /// Milliseconds per minute.
    pub fn ms_per_minute(&self) -> f64 {
        self.milliseconds_per_second * SECONDS_PER_MINUTE as f64
    }

    /// Milliseconds per hour.
    pub fn ms_per_hour(&self) -> f64 {
        self.ms_per_minute() * MINUTES_PER_HOUR as f64
    }

    /// Milliseconds per day.
    pub fn ms_per_day(&self) -> f64 {
        self.ms_per_hour() * HOURS_PER_DAY as f64
    }

    /// Convert hours to milliseconds.
    pub fn hours_to_ms(&self, hours: f64) -> Result<f64> {
        Ok(non_negative(hours)? * self.ms_per_hour())
    }

    /// Convert days to milliseconds.
    pub fn days_to_ms(&self, days: f64) -> Result<f64> {
        Ok(non_negative(days)? * self.ms_per_day())
    }

    /// Convert milliseconds back to days.
    pub fn ms_to_days(&self, ms: f64) -> Result<f64> {
        Ok(non_negative(ms)? / self.ms_per_day())
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::real_time()
    }
}

fn non_negative(duration: f64) -> Result<f64> {
    if duration < 0.0 {
        Err(AssayError::InvalidDuration(duration))
    } else {
        Ok(duration)
    }
}
