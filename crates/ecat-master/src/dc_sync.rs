//! EtherCAT Distributed Clocks (DC) synchronization.
//!
//! Aligns the master cycle to the DC reference clock. Each call to
//! [`DcController::sync`] measures where inside the cycle the reference
//! clock currently is and returns a PI-style correction to apply to the
//! next cycle start.

use serde::Serialize;
use std::time::Duration;
use tracing::trace;

/// Result of one clock synchronization step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClockSync {
    /// Position of the reference clock inside the cycle, folded into (-cycle/2, cycle/2].
    pub delta_ns: i64,
    /// Correction to add to the next cycle start.
    pub compensation_ns: i64,
}

/// DC synchronization statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DcSyncStats {
    /// Number of sync cycles.
    pub sync_cycles: u64,
    /// Minimum observed deviation in nanoseconds.
    pub min_deviation_ns: i64,
    /// Maximum observed deviation in nanoseconds.
    pub max_deviation_ns: i64,
    /// Sum of deviations for mean calculation.
    pub sum_deviation_ns: i64,
    /// Number of sync errors (deviation > threshold).
    pub sync_errors: u64,
    /// Error threshold in nanoseconds.
    pub error_threshold_ns: i64,
}

impl DcSyncStats {
    /// Create new stats with the given error threshold.
    pub fn new(error_threshold_ns: i64) -> Self {
        Self {
            min_deviation_ns: i64::MAX,
            max_deviation_ns: i64::MIN,
            error_threshold_ns,
            ..Default::default()
        }
    }

    /// Record a deviation measurement.
    pub fn record(&mut self, deviation_ns: i64) {
        self.sync_cycles += 1;
        self.min_deviation_ns = self.min_deviation_ns.min(deviation_ns);
        self.max_deviation_ns = self.max_deviation_ns.max(deviation_ns);
        self.sum_deviation_ns = self.sum_deviation_ns.wrapping_add(deviation_ns);

        if deviation_ns.abs() > self.error_threshold_ns {
            self.sync_errors += 1;
        }
    }

    /// Get the mean deviation.
    pub fn mean_deviation_ns(&self) -> Option<i64> {
        let cycles = i64::try_from(self.sync_cycles).ok()?;
        (cycles > 0).then(|| self.sum_deviation_ns / cycles)
    }

    /// Get the peak-to-peak jitter.
    pub fn jitter_ns(&self) -> Option<i64> {
        (self.sync_cycles > 0).then(|| self.max_deviation_ns - self.min_deviation_ns)
    }

    /// Reset statistics.
    pub fn reset(&mut self) {
        *self = Self::new(self.error_threshold_ns);
    }
}

/// Master-side DC offset compensation.
#[derive(Debug, Clone)]
pub struct DcController {
    integral: i64,
    stats: DcSyncStats,
}

impl Default for DcController {
    fn default() -> Self {
        Self::new()
    }
}

impl DcController {
    /// Create a controller with a 1 µs sync error threshold.
    pub fn new() -> Self {
        Self {
            integral: 0,
            stats: DcSyncStats::new(1000),
        }
    }

    /// Compute the correction for the next cycle.
    ///
    /// `dc_time_ns` is the reference clock time, `offset_ns` the desired
    /// position of the cycle start relative to the DC cycle.
    pub fn sync(&mut self, dc_time_ns: i64, cycle_time: Duration, offset_ns: i64) -> ClockSync {
        let cycle_ns = i64::try_from(cycle_time.as_nanos()).unwrap_or(i64::MAX);
        if cycle_ns == 0 {
            return ClockSync::default();
        }

        let mut delta = dc_time_ns.wrapping_sub(offset_ns).rem_euclid(cycle_ns);
        if delta > cycle_ns / 2 {
            delta -= cycle_ns;
        }

        self.integral += delta.signum();
        let compensation = -(delta / 100) - (self.integral / 20);

        self.stats.record(delta);
        trace!(delta, integral = self.integral, compensation, "DC sync");

        ClockSync {
            delta_ns: delta,
            compensation_ns: compensation,
        }
    }

    /// Accumulated integral term.
    pub fn integral(&self) -> i64 {
        self.integral
    }

    /// Sync statistics.
    pub fn stats(&self) -> &DcSyncStats {
        &self.stats
    }

    /// Forget the integral term and statistics.
    pub fn reset(&mut self) {
        self.integral = 0;
        self.stats.reset();
    }
}
