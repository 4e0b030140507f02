//! Thin state access layer over the driver.
//!
//! The tracker reads and requests slave states and answers health questions.
//! It holds no policy: deciding what to do about a slave that left
//! Operational is the recovery loop's job.

use crate::driver::EthercatDriver;
use crate::session::BusSession;
use crate::state::SlaveState;
use crate::task::StopFlag;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Longest single driver poll inside a cancellable state check.
const CHECK_SLICE: Duration = Duration::from_millis(10);

/// Reads and forces slave and bus states.
#[derive(Clone)]
pub struct SlaveStateTracker {
    driver: Arc<dyn EthercatDriver>,
    session: Arc<BusSession>,
}

impl SlaveStateTracker {
    /// Create a tracker for one bus session.
    pub fn new(driver: Arc<dyn EthercatDriver>, session: Arc<BusSession>) -> Self {
        Self { driver, session }
    }

    /// Last known state of a slave, with everything above Operational reported as `ERROR`.
    pub fn state(&self, index: u16) -> SlaveState {
        self.driver.slave_state(index).clamped()
    }

    /// Last known state of a slave, unclamped.
    pub fn raw_state(&self, index: u16) -> SlaveState {
        self.driver.slave_state(index)
    }

    /// Lost flag of a slave.
    pub fn is_lost(&self, index: u16) -> bool {
        self.driver.is_lost(index)
    }

    /// Set or clear the lost flag of a slave.
    pub fn set_lost(&self, index: u16, lost: bool) {
        self.driver.set_lost(index, lost);
    }

    /// Refresh all slave states; returns and records the lowest one.
    pub fn read_states(&self) -> SlaveState {
        let lowest = self.driver.read_states();
        self.session.set_bus_state(lowest);
        lowest
    }

    /// Request `state` for one slave (0 = all). Does not wait.
    pub fn write_state(&self, index: u16, state: SlaveState) {
        trace!(slave = index, %state, "Requesting state");
        self.driver.write_state(index, state);
    }

    /// Wait until `index` reaches `state` or `timeout` elapsed.
    ///
    /// Returns `state` on success, otherwise the last observed state.
    pub fn check_state(&self, index: u16, state: SlaveState, timeout: Duration) -> SlaveState {
        self.driver.check_state(index, state, timeout)
    }

    /// Like [`SlaveStateTracker::check_state`], but gives up as soon as `stop` is raised.
    pub fn check_state_until(
        &self,
        index: u16,
        state: SlaveState,
        timeout: Duration,
        stop: &StopFlag,
    ) -> SlaveState {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let observed = self
                .driver
                .check_state(index, state, remaining.min(CHECK_SLICE));
            if observed == state || remaining <= CHECK_SLICE || stop.is_raised() {
                return observed;
            }
        }
    }

    /// Request `state` for all slaves and wait for it.
    ///
    /// Records and returns the aggregate state reached.
    pub fn request_state(&self, state: SlaveState, timeout: Duration) -> SlaveState {
        self.write_state(0, state);
        let reached = self.check_state(0, state, timeout);
        self.session.set_bus_state(reached);
        reached
    }

    /// Last recorded aggregate bus state.
    pub fn bus_state(&self) -> SlaveState {
        self.session.bus_state()
    }

    /// Request `state` for all slaves, waiting only for slaves that answer.
    ///
    /// Lost slaves and slaves reporting no state are not waited for. Returns
    /// the indices that did not confirm `state` within `timeout`.
    pub fn settle_state(&self, state: SlaveState, timeout: Duration) -> Vec<u16> {
        self.write_state(0, state);
        let deadline = Instant::now() + timeout;
        let mut unconfirmed = Vec::new();
        for index in 1..=self.slave_count() {
            if self.is_lost(index) || self.raw_state(index) == SlaveState::NONE {
                unconfirmed.push(index);
                continue;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if self.check_state(index, state, remaining) != state {
                unconfirmed.push(index);
            }
        }
        self.read_states();
        unconfirmed
    }

    /// Indices of slaves not in `state`.
    pub fn slaves_not_in(&self, state: SlaveState) -> Vec<u16> {
        (1..=self.slave_count())
            .filter(|&i| self.raw_state(i) != state)
            .collect()
    }

    /// Number of enumerated slaves, as `u16` slave indices.
    pub fn slave_count(&self) -> u16 {
        u16::try_from(self.driver.slave_count()).unwrap_or(u16::MAX)
    }

    /// The driver behind this tracker.
    pub fn driver(&self) -> &Arc<dyn EthercatDriver> {
        &self.driver
    }

    /// The session this tracker records into.
    pub fn session(&self) -> &Arc<BusSession> {
        &self.session
    }
}

impl std::fmt::Debug for SlaveStateTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlaveStateTracker")
            .field("adapter", &self.session.adapter())
            .field("bus_state", &self.session.bus_state())
            .finish()
    }
}
