//! Background slave healing.
//!
//! Every error cycle the loop compares the actual work counter with the
//! expected one. On a mismatch, or while a previous pass still found a slave
//! outside Operational, it walks all slaves of the primary group and applies
//! the mildest action that can bring each one back:
//!
//! | observed state     | action                                   |
//! |--------------------|------------------------------------------|
//! | SafeOp + Error     | acknowledge the error                    |
//! | SafeOp             | request Operational                      |
//! | any other answer   | reconfigure the slave                    |
//! | no answer          | mark lost, then try to recover it        |
//!
//! The loop is level-triggered: each pass looks at the current state only,
//! so a pass interrupted by shutdown leaves nothing half-done.

use crate::hooks::{MasterHooks, SlaveHandle};
use crate::session::{BusSession, RecoveryCounters};
use crate::state::SlaveState;
use crate::task::StopFlag;
use crate::tracker::SlaveStateTracker;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Timings used by the recovery loop.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryTimings {
    /// Polling interval.
    pub error_cycle_time: Duration,
    /// Bound of a single reconfigure or recover call.
    pub recovery_timeout: Duration,
    /// Wait before a silent slave is considered lost.
    pub lost_check_timeout: Duration,
    /// Wait for a slave pushed from SafeOp to Op.
    pub state_check_timeout: Duration,
    /// Mailbox timeout handed to hooks.
    pub sdo_timeout: Duration,
}

/// Watches bus health and heals individual slaves without stopping the bus.
pub struct ErrorRecoveryLoop {
    tracker: SlaveStateTracker,
    hooks: Arc<dyn MasterHooks>,
    timings: RecoveryTimings,
}

impl ErrorRecoveryLoop {
    /// Create the loop for one session.
    pub fn new(tracker: SlaveStateTracker, hooks: Arc<dyn MasterHooks>, timings: RecoveryTimings) -> Self {
        Self {
            tracker,
            hooks,
            timings,
        }
    }

    fn session(&self) -> &BusSession {
        self.tracker.session()
    }

    /// Run until `stop` is raised.
    pub fn run(self, stop: &StopFlag) {
        debug!(
            master = %self.session().name(),
            interval_ms = self.timings.error_cycle_time.as_millis(),
            "Error recovery loop running"
        );

        while !stop.is_raised() {
            if self.session().needs_attention() {
                self.pass(stop);
            }
            stop.sleep(self.timings.error_cycle_time);
        }

        debug!(master = %self.session().name(), "Error recovery loop stopped");
    }

    /// One diagnostic sweep over all slaves.
    pub fn pass(&self, stop: &StopFlag) {
        let session = self.session();
        RecoveryCounters::bump(&session.recovery.passes);
        debug!(
            master = %session.name(),
            expected = session.expected_wkc(),
            actual = session.actual_wkc(),
            "Checking slave states"
        );

        session.set_check_state(false);
        self.tracker.read_states();

        for index in 1..=self.tracker.slave_count() {
            if stop.is_raised() {
                return;
            }
            self.check_slave(index, stop);
        }

        if !session.check_state() {
            info!(master = %session.name(), "All slaves resumed operational");
        }
    }

    fn check_slave(&self, index: u16, stop: &StopFlag) {
        let session = self.session();
        let counters = &session.recovery;
        let name = session.name();
        let in_primary_group = self
            .tracker
            .driver()
            .slave_info(index)
            .is_some_and(|info| info.in_primary_group());
        let state = self.tracker.raw_state(index);

        if in_primary_group && state != SlaveState::OPERATIONAL {
            session.set_check_state(true);

            if state == SlaveState::SAFE_OPERATIONAL | SlaveState::ERROR {
                error!(master = %name, slave = index, "Slave is in SAFE_OP + ERROR, attempting ack");
                self.tracker
                    .write_state(index, SlaveState::SAFE_OPERATIONAL | SlaveState::ACK);
                RecoveryCounters::bump(&counters.acknowledged);
            } else if state == SlaveState::SAFE_OPERATIONAL {
                warn!(master = %name, slave = index, "Slave is in SAFE_OP, change to OPERATIONAL");
                RecoveryCounters::bump(&counters.safe_op_pushes);
                self.notify(index, |hooks, slave| hooks.on_safe_operational(slave));
                self.tracker.write_state(index, SlaveState::OPERATIONAL);
                let reached = self.tracker.check_state_until(
                    index,
                    SlaveState::OPERATIONAL,
                    self.timings.state_check_timeout,
                    stop,
                );
                if reached == SlaveState::OPERATIONAL {
                    self.notify(index, |hooks, slave| hooks.on_operational(slave));
                }
            } else if state > SlaveState::NONE {
                RecoveryCounters::bump(&counters.reconfigurations);
                if self
                    .tracker
                    .driver()
                    .reconfigure_slave(index, self.timings.recovery_timeout)
                {
                    self.tracker.set_lost(index, false);
                    info!(master = %name, slave = index, "Slave reconfigured");
                }
            } else if !self.tracker.is_lost(index) {
                let reached = self.tracker.check_state_until(
                    index,
                    SlaveState::OPERATIONAL,
                    self.timings.lost_check_timeout,
                    stop,
                );
                if reached == SlaveState::NONE {
                    self.tracker.set_lost(index, true);
                    RecoveryCounters::bump(&counters.lost);
                    error!(master = %name, slave = index, "Slave lost");
                }
            }
        }

        if self.tracker.is_lost(index) {
            if self.tracker.raw_state(index) == SlaveState::NONE {
                RecoveryCounters::bump(&counters.recoveries);
                if self
                    .tracker
                    .driver()
                    .recover_slave(index, self.timings.recovery_timeout)
                {
                    self.tracker.set_lost(index, false);
                    info!(master = %name, slave = index, "Slave recovered");
                }
            } else {
                self.tracker.set_lost(index, false);
                RecoveryCounters::bump(&counters.found);
                info!(master = %name, slave = index, "Slave found");
            }
        }
    }

    fn notify<F>(&self, index: u16, hook: F)
    where
        F: Fn(&dyn MasterHooks, &SlaveHandle<'_>),
    {
        let driver = self.tracker.driver();
        if let Some(info) = driver.slave_info(index) {
            let handle = SlaveHandle::new(index, info, &**driver, self.timings.sdo_timeout);
            hook(self.hooks.as_ref(), &handle);
        }
    }
}

#[cfg(all(test, feature = "simulated"))]
mod tests {
    use super::*;
    use crate::driver::EthercatDriver;
    use crate::hooks::NoHooks;
    use crate::simulated::{SimulatedDriver, SimulatedSlave};

    fn timings() -> RecoveryTimings {
        RecoveryTimings {
            error_cycle_time: Duration::from_millis(10),
            recovery_timeout: Duration::from_millis(50),
            lost_check_timeout: Duration::from_millis(2),
            state_check_timeout: Duration::from_millis(200),
            sdo_timeout: Duration::from_millis(100),
        }
    }

    fn operational_bus() -> (Arc<SimulatedDriver>, ErrorRecoveryLoop) {
        let driver = Arc::new(SimulatedDriver::new(vec![
            SimulatedSlave::new("A").with_io(1, 1).with_delay(Duration::ZERO),
            SimulatedSlave::new("B").with_io(2, 2).with_delay(Duration::ZERO),
        ]));
        driver.init_adapter("sim0").unwrap();
        driver.configure_slaves();
        driver.map_process_data();
        driver.write_state(0, SlaveState::OPERATIONAL);

        let session = Arc::new(BusSession::new("test", "sim0"));
        session.set_slave_count(2);
        session.set_expected_wkc(6);
        session.set_operational(true);
        let tracker = SlaveStateTracker::new(driver.clone(), session);
        (driver, ErrorRecoveryLoop::new(tracker, Arc::new(NoHooks), timings()))
    }

    #[test]
    fn test_healthy_pass_clears_check_state() {
        let (_driver, recovery) = operational_bus();
        recovery.session().set_check_state(true);

        recovery.pass(&StopFlag::new());
        assert!(!recovery.session().check_state());
        assert_eq!(recovery.session().recovery_stats().passes, 1);
    }

    #[test]
    fn test_safe_op_error_is_acknowledged_then_pushed() {
        let (driver, recovery) = operational_bus();
        driver.set_error(2, 0x001B);
        let stop = StopFlag::new();

        recovery.pass(&stop);
        assert!(recovery.session().check_state());
        assert_eq!(driver.current_state(2), SlaveState::SAFE_OPERATIONAL);

        recovery.pass(&stop);
        assert!(recovery.session().check_state());
        assert_eq!(driver.current_state(2), SlaveState::OPERATIONAL);

        recovery.pass(&stop);
        assert!(!recovery.session().check_state());

        let stats = recovery.session().recovery_stats();
        assert_eq!(stats.acknowledged, 1);
        assert_eq!(stats.safe_op_pushes, 1);
        assert_eq!(stats.reconfigurations, 0);
    }

    #[test]
    fn test_init_slave_is_reconfigured() {
        let (driver, recovery) = operational_bus();
        driver.force_state(1, SlaveState::INIT);

        recovery.pass(&StopFlag::new());
        assert_eq!(driver.reconfigure_calls(), 1);
        assert_eq!(driver.current_state(1), SlaveState::SAFE_OPERATIONAL);
    }

    #[test]
    fn test_silent_slave_is_lost_then_found() {
        let (driver, recovery) = operational_bus();
        let stop = StopFlag::new();
        driver.disconnect(2);

        recovery.pass(&stop);
        assert!(driver.is_lost(2));
        assert_eq!(driver.recover_calls(), 1);
        assert_eq!(recovery.session().recovery_stats().lost, 1);

        driver.reconnect(2, SlaveState::SAFE_OPERATIONAL);
        recovery.pass(&stop);
        assert!(!driver.is_lost(2));
        assert_eq!(driver.current_state(2), SlaveState::OPERATIONAL);
        assert_eq!(driver.recover_calls(), 1);
        assert_eq!(driver.reconfigure_calls(), 0);
        assert_eq!(recovery.session().recovery_stats().found, 1);
    }

    #[test]
    fn test_other_groups_are_ignored() {
        let driver = Arc::new(SimulatedDriver::new(vec![
            SimulatedSlave::new("secondary").with_group(1).with_delay(Duration::ZERO),
        ]));
        driver.init_adapter("sim0").unwrap();
        driver.configure_slaves();

        let session = Arc::new(BusSession::new("test", "sim0"));
        let tracker = SlaveStateTracker::new(driver.clone(), session);
        let recovery = ErrorRecoveryLoop::new(tracker, Arc::new(NoHooks), timings());

        recovery.pass(&StopFlag::new());
        assert!(!recovery.session().check_state());
        assert_eq!(driver.reconfigure_calls(), 0);
    }

    #[test]
    fn test_raised_stop_skips_remaining_slaves() {
        let (driver, recovery) = operational_bus();
        driver.force_state(1, SlaveState::INIT);
        driver.force_state(2, SlaveState::INIT);
        let stop = StopFlag::new();
        stop.raise();

        recovery.pass(&stop);
        assert_eq!(driver.reconfigure_calls(), 0);
    }
}
