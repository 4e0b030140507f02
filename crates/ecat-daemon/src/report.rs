//! Periodic bus health reports.

use ecat_common::SlaveDiagnostic;
use ecat_master::{EthercatMaster, FrameStats, RecoveryStats, SlaveState};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Snapshot of bus health between two reports.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    /// Slaves on the bus.
    pub slaves: usize,
    /// Slaves not marked lost.
    pub online: usize,
    /// Expected work counter.
    pub expected_wkc: i32,
    /// Work counter of the last frame.
    pub actual_wkc: i32,
    /// Frames exchanged since the previous report.
    pub cycles: u64,
    /// Mismatching frames since the previous report.
    pub wkc_mismatches: u64,
    /// Frames per second since the previous report.
    pub cycle_rate: f64,
    /// Worst round trip of the session in microseconds.
    pub max_rtt_us: u32,
    /// Recovery passes since the previous report.
    pub recovery_passes: u64,
    /// The recovery loop still sees a slave outside Operational.
    pub recovery_pending: bool,
    /// Slaves reporting anything but Operational.
    pub faulted: Vec<SlaveDiagnostic>,
}

impl HealthReport {
    /// Returns true if the bus looked healthy over the whole interval.
    pub fn is_healthy(&self) -> bool {
        self.online == self.slaves
            && self.wkc_mismatches == 0
            && !self.recovery_pending
            && self.actual_wkc == self.expected_wkc
            && self.faulted.is_empty()
    }
}

/// Builds [`HealthReport`]s as deltas to the previous one.
#[derive(Debug)]
pub struct Reporter {
    last_at: Instant,
    last_frames: FrameStats,
    last_recovery: RecoveryStats,
}

impl Reporter {
    /// Start counting from now.
    pub fn new() -> Self {
        Self {
            last_at: Instant::now(),
            last_frames: FrameStats::default(),
            last_recovery: RecoveryStats::default(),
        }
    }

    /// Take a snapshot of `master`.
    pub fn collect(&mut self, master: &EthercatMaster) -> HealthReport {
        let frames = master.frame_stats();
        let recovery = master.recovery_stats();
        let elapsed = self.last_at.elapsed();
        let slaves = master.slave_count();
        let faulted = (1..=u16::try_from(slaves).unwrap_or(u16::MAX))
            .filter_map(|i| master.slave_diagnostic(i))
            .filter(|d| SlaveState::from_raw(d.state) != SlaveState::OPERATIONAL)
            .collect();

        let report = HealthReport {
            slaves,
            online: (0..slaves).filter(|&i| master.is_online(i)).count(),
            expected_wkc: master.expected_wkc(),
            actual_wkc: master.actual_wkc(),
            cycles: frames.cycles.saturating_sub(self.last_frames.cycles),
            wkc_mismatches: frames.wkc_mismatches.saturating_sub(self.last_frames.wkc_mismatches),
            cycle_rate: rate(frames.cycles.saturating_sub(self.last_frames.cycles), elapsed),
            max_rtt_us: frames.max_rtt_us,
            recovery_passes: recovery.passes.saturating_sub(self.last_recovery.passes),
            recovery_pending: master.recovery_pending(),
            faulted,
        };

        self.last_at = Instant::now();
        self.last_frames = frames;
        self.last_recovery = recovery;
        report
    }

    /// Collect and log a report.
    pub fn log(&mut self, master: &EthercatMaster) -> HealthReport {
        let r = self.collect(master);
        if r.is_healthy() {
            info!(
                slaves = r.slaves,
                wkc = r.actual_wkc,
                cycles = r.cycles,
                rate_hz = format!("{:.0}", r.cycle_rate),
                max_rtt_us = r.max_rtt_us,
                "Bus healthy"
            );
        } else {
            warn!(
                slaves = r.slaves,
                online = r.online,
                expected = r.expected_wkc,
                actual = r.actual_wkc,
                wkc_mismatches = r.wkc_mismatches,
                recovery_passes = r.recovery_passes,
                recovery_pending = r.recovery_pending,
                "Bus degraded"
            );
            for diagnostic in &r.faulted {
                warn!(%diagnostic, "Slave not operational");
            }
        }
        r
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::cast_precision_loss)]
fn rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}
