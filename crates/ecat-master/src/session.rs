//! State shared by the caller, the process data loop and the recovery loop.
//!
//! Every field is an atomic with a single writer. The process data thread
//! writes the actual work counter and frame statistics, the recovery thread
//! writes the check-state flag and recovery statistics, and the initializer
//! (caller thread) writes everything else before the loops are spawned.

use crossbeam_utils::CachePadded;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU16, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::state::SlaveState;

/// Process data loop statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    /// Completed process data cycles.
    pub cycles: u64,
    /// Cycles whose work counter differed from the expected value.
    pub wkc_mismatches: u64,
    /// Last round-trip time in microseconds.
    pub last_rtt_us: u32,
    /// Minimum round-trip time.
    pub min_rtt_us: u32,
    /// Maximum round-trip time.
    pub max_rtt_us: u32,
}

/// Error recovery loop statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryStats {
    /// Diagnostic passes run.
    pub passes: u64,
    /// SafeOp+Error acknowledgements written.
    pub acknowledged: u64,
    /// Slaves pushed from SafeOp back to Op.
    pub safe_op_pushes: u64,
    /// Reconfiguration attempts.
    pub reconfigurations: u64,
    /// Recovery attempts for lost slaves.
    pub recoveries: u64,
    /// Slaves marked lost.
    pub lost: u64,
    /// Lost slaves found again.
    pub found: u64,
}

#[derive(Debug, Default)]
struct FrameCounters {
    cycles: AtomicU64,
    wkc_mismatches: AtomicU64,
    last_rtt_us: AtomicU32,
    min_rtt_us: AtomicU32,
    max_rtt_us: AtomicU32,
}

#[derive(Debug, Default)]
pub(crate) struct RecoveryCounters {
    pub(crate) passes: AtomicU64,
    pub(crate) acknowledged: AtomicU64,
    pub(crate) safe_op_pushes: AtomicU64,
    pub(crate) reconfigurations: AtomicU64,
    pub(crate) recoveries: AtomicU64,
    pub(crate) lost: AtomicU64,
    pub(crate) found: AtomicU64,
}

impl RecoveryCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// One bus session, from `start()` to `stop()`.
#[derive(Debug)]
pub struct BusSession {
    name: String,
    adapter: String,
    slave_count: AtomicUsize,
    expected_wkc: AtomicI32,
    actual_wkc: CachePadded<AtomicI32>,
    operational: AtomicBool,
    check_state: AtomicBool,
    bus_state: AtomicU16,
    frames: FrameCounters,
    pub(crate) recovery: RecoveryCounters,
}

impl BusSession {
    /// Create a session for `adapter`; `name` is the master name used in logs.
    pub fn new(name: impl Into<String>, adapter: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            adapter: adapter.into(),
            slave_count: AtomicUsize::new(0),
            expected_wkc: AtomicI32::new(0),
            actual_wkc: CachePadded::new(AtomicI32::new(0)),
            operational: AtomicBool::new(false),
            check_state: AtomicBool::new(false),
            bus_state: AtomicU16::new(SlaveState::NONE.raw()),
            frames: FrameCounters::default(),
            recovery: RecoveryCounters::default(),
        }
    }

    /// Master name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adapter the session runs on.
    pub fn adapter(&self) -> &str {
        &self.adapter
    }

    /// Number of enumerated slaves.
    pub fn slave_count(&self) -> usize {
        self.slave_count.load(Ordering::Acquire)
    }

    pub(crate) fn set_slave_count(&self, count: usize) {
        self.slave_count.store(count, Ordering::Release);
    }

    /// Expected work counter of the primary group.
    pub fn expected_wkc(&self) -> i32 {
        self.expected_wkc.load(Ordering::Acquire)
    }

    pub(crate) fn set_expected_wkc(&self, wkc: i32) {
        self.expected_wkc.store(wkc, Ordering::Release);
    }

    /// Work counter of the last received process data frame.
    #[inline]
    pub fn actual_wkc(&self) -> i32 {
        self.actual_wkc.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_actual_wkc(&self, wkc: i32) {
        self.actual_wkc.store(wkc, Ordering::Release);
    }

    /// Returns true once every slave was confirmed Operational.
    #[inline]
    pub fn is_operational(&self) -> bool {
        self.operational.load(Ordering::Acquire)
    }

    pub(crate) fn set_operational(&self, operational: bool) {
        self.operational.store(operational, Ordering::Release);
    }

    /// Sticky flag: a slave was found outside Operational during the last pass.
    pub fn check_state(&self) -> bool {
        self.check_state.load(Ordering::Acquire)
    }

    pub(crate) fn set_check_state(&self, pending: bool) {
        self.check_state.store(pending, Ordering::Release);
    }

    /// Last recorded aggregate bus state.
    pub fn bus_state(&self) -> SlaveState {
        SlaveState::from_raw(self.bus_state.load(Ordering::Acquire))
    }

    pub(crate) fn set_bus_state(&self, state: SlaveState) {
        self.bus_state.store(state.raw(), Ordering::Release);
    }

    /// Returns true if the bus needs a diagnostic pass.
    pub fn needs_attention(&self) -> bool {
        self.is_operational() && (self.actual_wkc() != self.expected_wkc() || self.check_state())
    }

    /// Record one completed process data cycle.
    pub(crate) fn record_cycle(&self, wkc: i32, rtt: Duration) {
        self.set_actual_wkc(wkc);

        let frames = &self.frames;
        frames.cycles.fetch_add(1, Ordering::Relaxed);
        if wkc != self.expected_wkc() {
            frames.wkc_mismatches.fetch_add(1, Ordering::Relaxed);
        }

        let rtt_us = u32::try_from(rtt.as_micros()).unwrap_or(u32::MAX);
        frames.last_rtt_us.store(rtt_us, Ordering::Relaxed);
        let min = frames.min_rtt_us.load(Ordering::Relaxed);
        if min == 0 || rtt_us < min {
            frames.min_rtt_us.store(rtt_us, Ordering::Relaxed);
        }
        if rtt_us > frames.max_rtt_us.load(Ordering::Relaxed) {
            frames.max_rtt_us.store(rtt_us, Ordering::Relaxed);
        }
    }

    /// Snapshot of the process data loop statistics.
    pub fn frame_stats(&self) -> FrameStats {
        let f = &self.frames;
        FrameStats {
            cycles: f.cycles.load(Ordering::Relaxed),
            wkc_mismatches: f.wkc_mismatches.load(Ordering::Relaxed),
            last_rtt_us: f.last_rtt_us.load(Ordering::Relaxed),
            min_rtt_us: f.min_rtt_us.load(Ordering::Relaxed),
            max_rtt_us: f.max_rtt_us.load(Ordering::Relaxed),
        }
    }

    /// Snapshot of the recovery loop statistics.
    pub fn recovery_stats(&self) -> RecoveryStats {
        let r = &self.recovery;
        RecoveryStats {
            passes: r.passes.load(Ordering::Relaxed),
            acknowledged: r.acknowledged.load(Ordering::Relaxed),
            safe_op_pushes: r.safe_op_pushes.load(Ordering::Relaxed),
            reconfigurations: r.reconfigurations.load(Ordering::Relaxed),
            recoveries: r.recoveries.load(Ordering::Relaxed),
            lost: r.lost.load(Ordering::Relaxed),
            found: r.found.load(Ordering::Relaxed),
        }
    }
}
