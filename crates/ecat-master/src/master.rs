//! Public lifecycle facade.

use crate::dc_sync::{ClockSync, DcController, DcSyncStats};
use crate::driver::EthercatDriver;
use crate::hooks::{MasterHooks, NoHooks};
use crate::init::BusInitializer;
use crate::process::ProcessDataLoop;
use crate::recovery::{ErrorRecoveryLoop, RecoveryTimings};
use crate::session::{BusSession, FrameStats, RecoveryStats};
use crate::slave::SlaveInfo;
use crate::state::{al_status_message, SlaveState};
use crate::task::LoopHandle;
use crate::tracker::SlaveStateTracker;
use ecat_common::{MasterConfig, MasterError, MasterResult, SlaveDiagnostic};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Name of the process data thread.
pub const PROCESS_THREAD: &str = "ecat-process";
/// Name of the error recovery thread.
pub const RECOVERY_THREAD: &str = "ecat-recovery";

/// EtherCAT master.
///
/// Owns the bus session and the two background loops. `start()` brings every
/// slave to Operational before any loop runs; `stop()` joins both loops before
/// the slaves are returned to Init and the adapter is closed.
///
/// # Example
///
/// ```
/// use ecat_common::MasterConfig;
/// use ecat_master::{EthercatMaster, SimulatedDriver, SimulatedSlave};
/// use std::sync::Arc;
///
/// let driver = Arc::new(SimulatedDriver::new(vec![
///     SimulatedSlave::new("EL1008").with_io(1, 0),
/// ]));
/// let mut master = EthercatMaster::new(MasterConfig::for_adapter("sim0"), driver);
/// master.start().unwrap();
/// assert!(master.is_running());
/// master.stop();
/// ```
pub struct EthercatMaster {
    config: MasterConfig,
    driver: Arc<dyn EthercatDriver>,
    hooks: Arc<dyn MasterHooks>,
    session: Option<Arc<BusSession>>,
    process: Option<LoopHandle>,
    recovery: Option<LoopHandle>,
    dc: DcController,
}

impl EthercatMaster {
    /// Create a stopped master.
    pub fn new(config: MasterConfig, driver: Arc<dyn EthercatDriver>) -> Self {
        Self {
            config,
            driver,
            hooks: Arc::new(NoHooks),
            session: None,
            process: None,
            recovery: None,
            dc: DcController::new(),
        }
    }

    /// Install application hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn MasterHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Master configuration.
    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    /// Bring all slaves to Operational and start the background loops.
    ///
    /// # Errors
    ///
    /// - [`MasterError::AlreadyStarted`] if a session is active; the bus is not touched
    /// - [`MasterError::Config`] for an invalid configuration
    /// - [`MasterError::AdapterOpen`] if the adapter cannot be opened
    /// - [`MasterError::NotOperational`] if a slave did not reach Operational
    /// - [`MasterError::Spawn`] if a loop thread cannot be created
    ///
    /// Apart from `AlreadyStarted`, a failed start leaves the adapter closed.
    pub fn start(&mut self) -> MasterResult<()> {
        if self.session.is_some() {
            return Err(MasterError::AlreadyStarted);
        }
        self.config.validate()?;

        let adapter = self.config.adapter.clone().unwrap_or_default();
        let session = Arc::new(BusSession::new(self.config.name.clone(), adapter));
        let tracker = SlaveStateTracker::new(Arc::clone(&self.driver), Arc::clone(&session));

        let count = BusInitializer::new(&self.config, &tracker, self.hooks.as_ref()).run()?;
        self.session = Some(Arc::clone(&session));
        if count == 0 {
            return Ok(());
        }
        self.dc.reset();

        if let Err(e) = self.spawn_loops(&tracker) {
            warn!(master = %self.config.name, error = %e, "Rolling back start");
            self.stop();
            return Err(e);
        }

        info!(master = %self.config.name, slaves = count, "EtherCAT master running");
        Ok(())
    }

    fn spawn_loops(&mut self, tracker: &SlaveStateTracker) -> MasterResult<()> {
        let process = ProcessDataLoop::new(
            Arc::clone(&self.driver),
            Arc::clone(tracker.session()),
            Arc::clone(&self.hooks),
            self.config.cycle_time,
            self.config.receive_timeout,
        );
        self.process = Some(LoopHandle::spawn(PROCESS_THREAD, move |stop| {
            process.run(&stop);
        })?);

        let timings = RecoveryTimings {
            error_cycle_time: self.config.error_cycle_time,
            recovery_timeout: self.config.recovery_timeout,
            lost_check_timeout: self.config.lost_check_timeout,
            state_check_timeout: self.config.timeouts.state_check,
            sdo_timeout: self.config.sdo_timeout,
        };
        let recovery = ErrorRecoveryLoop::new(tracker.clone(), Arc::clone(&self.hooks), timings);
        self.recovery = Some(LoopHandle::spawn(RECOVERY_THREAD, move |stop| {
            recovery.run(&stop);
        })?);

        Ok(())
    }

    /// Stop the loops, return all slaves to Init and close the adapter.
    ///
    /// Idempotent, and a no-op on a master that was never started. Init is
    /// confirmed only for slaves that still answer, for at most the shorter of
    /// the Init and recovery timeouts. Failures are logged only.
    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        info!(master = %self.config.name, "Stopping EtherCAT master");

        session.set_operational(false);
        if let Some(mut recovery) = self.recovery.take() {
            recovery.stop();
        }
        if let Some(mut process) = self.process.take() {
            process.stop();
        }

        if session.slave_count() > 0 {
            self.hooks.on_stop();

            let tracker = SlaveStateTracker::new(Arc::clone(&self.driver), Arc::clone(&session));
            let wait = self.config.timeouts.init.min(self.config.recovery_timeout);
            let unconfirmed = tracker.settle_state(SlaveState::INIT, wait);
            if !unconfirmed.is_empty() {
                warn!(
                    master = %self.config.name,
                    slaves = ?unconfirmed,
                    "Not all slaves returned to init state"
                );
            }
        }
        self.driver.close();

        let frames = session.frame_stats();
        let recovery = session.recovery_stats();
        info!(
            master = %self.config.name,
            cycles = frames.cycles,
            wkc_mismatches = frames.wkc_mismatches,
            recovery_passes = recovery.passes,
            "EtherCAT master stopped"
        );
    }

    /// Returns true while all slaves are confirmed Operational and the loops run.
    pub fn is_running(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_operational())
    }

    /// Returns true while the adapter is open (also with zero slaves).
    pub fn is_started(&self) -> bool {
        self.session.is_some()
    }

    /// Returns true unless the slave at 0-based `index` is lost or does not exist.
    pub fn is_online(&self, index: usize) -> bool {
        if index >= self.slave_count() {
            return false;
        }
        u16::try_from(index + 1).is_ok_and(|slave| !self.driver.is_lost(slave))
    }

    /// Number of slaves in the current session.
    pub fn slave_count(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.slave_count())
    }

    /// State of a slave (1-based, 0 = aggregate), everything above Operational reported as `ERROR`.
    pub fn slave_state(&self, index: u16) -> SlaveState {
        if self.session.is_none() {
            return SlaveState::NONE;
        }
        self.driver.slave_state(index).clamped()
    }

    /// Last aggregate state recorded by the master.
    pub fn bus_state(&self) -> SlaveState {
        self.session.as_ref().map_or(SlaveState::NONE, |s| s.bus_state())
    }

    /// Descriptor snapshot of a slave (1-based).
    pub fn slave_info(&self, index: u16) -> Option<SlaveInfo> {
        self.session.as_ref()?;
        self.driver.slave_info(index)
    }

    /// Device name of a slave (1-based).
    pub fn slave_name(&self, index: u16) -> Option<String> {
        self.slave_info(index).map(|info| info.name)
    }

    /// State, AL status code and decoded status of a slave (1-based).
    pub fn slave_diagnostic(&self, index: u16) -> Option<SlaveDiagnostic> {
        self.slave_info(index).map(|info| SlaveDiagnostic {
            index,
            state: info.state.raw(),
            status_code: info.al_status_code,
            status: al_status_message(info.al_status_code).to_string(),
        })
    }

    /// Expected work counter of the primary group.
    pub fn expected_wkc(&self) -> i32 {
        self.session.as_ref().map_or(0, |s| s.expected_wkc())
    }

    /// Work counter of the last process data frame.
    pub fn actual_wkc(&self) -> i32 {
        self.session.as_ref().map_or(0, |s| s.actual_wkc())
    }

    /// Returns true while the recovery loop still sees a slave outside Operational.
    pub fn recovery_pending(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.check_state())
    }

    /// Process data loop statistics of the current session.
    pub fn frame_stats(&self) -> FrameStats {
        self.session
            .as_ref()
            .map(|s| s.frame_stats())
            .unwrap_or_default()
    }

    /// Error recovery statistics of the current session.
    pub fn recovery_stats(&self) -> RecoveryStats {
        self.session
            .as_ref()
            .map(|s| s.recovery_stats())
            .unwrap_or_default()
    }

    /// Returns true if any slave supports distributed clocks.
    pub fn has_distributed_clock(&self) -> bool {
        let count = u16::try_from(self.slave_count()).unwrap_or(u16::MAX);
        (1..=count).any(|i| self.slave_has_distributed_clock(i))
    }

    /// Returns true if the slave (1-based) supports distributed clocks.
    pub fn slave_has_distributed_clock(&self, index: u16) -> bool {
        self.slave_info(index).is_some_and(|info| info.dc_supported)
    }

    /// System time of the DC reference clock in nanoseconds.
    pub fn distributed_clock(&self) -> i64 {
        self.driver.dc_time()
    }

    /// Compute the cycle start correction against the DC reference clock.
    pub fn sync_clock(&mut self, cycle_time: Duration, offset_ns: i64) -> ClockSync {
        let dc_time = self.driver.dc_time();
        self.dc.sync(dc_time, cycle_time, offset_ns)
    }

    /// DC synchronization statistics.
    pub fn dc_stats(&self) -> &DcSyncStats {
        self.dc.stats()
    }

    /// Read an object from a slave's dictionary (1-based slave index).
    ///
    /// Blocks for at most the configured SDO timeout. Mailbox traffic is not
    /// serialized against the process data loop; this is only safe while
    /// Operational if the driver serializes mailbox access itself.
    ///
    /// # Errors
    ///
    /// [`MasterError::NotStarted`], [`MasterError::SlaveIndex`] or [`MasterError::Sdo`].
    pub fn sdo_read(
        &self,
        slave: u16,
        index: u16,
        subindex: u8,
        complete_access: bool,
        buf: &mut [u8],
    ) -> MasterResult<usize> {
        self.check_slave(slave)?;
        self.driver
            .sdo_read(slave, index, subindex, complete_access, buf, self.config.sdo_timeout)
            .map_err(|reason| MasterError::Sdo {
                slave,
                index,
                subindex,
                reason,
            })
    }

    /// Write an object to a slave's dictionary (1-based slave index).
    ///
    /// Same blocking and concurrency caveats as [`EthercatMaster::sdo_read`].
    ///
    /// # Errors
    ///
    /// [`MasterError::NotStarted`], [`MasterError::SlaveIndex`] or [`MasterError::Sdo`].
    pub fn sdo_write(
        &self,
        slave: u16,
        index: u16,
        subindex: u8,
        complete_access: bool,
        data: &[u8],
    ) -> MasterResult<()> {
        self.check_slave(slave)?;
        self.driver
            .sdo_write(slave, index, subindex, complete_access, data, self.config.sdo_timeout)
            .map_err(|reason| MasterError::Sdo {
                slave,
                index,
                subindex,
                reason,
            })
    }

    fn check_slave(&self, slave: u16) -> MasterResult<()> {
        if self.session.is_none() {
            return Err(MasterError::NotStarted);
        }
        let count = self.slave_count();
        if slave == 0 || usize::from(slave) > count {
            return Err(MasterError::SlaveIndex { index: slave, count });
        }
        Ok(())
    }
}

impl Drop for EthercatMaster {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for EthercatMaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthercatMaster")
            .field("name", &self.config.name)
            .field("adapter", &self.config.adapter)
            .field("started", &self.is_started())
            .field("running", &self.is_running())
            .field("slaves", &self.slave_count())
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, feature = "simulated"))]
mod tests {
    use super::*;
    use crate::simulated::{SimulatedDriver, SimulatedSlave};

    fn config() -> MasterConfig {
        let mut config = MasterConfig::for_adapter("sim0");
        config.timeouts.operational = Duration::from_millis(300);
        config
    }

    fn two_slaves() -> Arc<SimulatedDriver> {
        Arc::new(SimulatedDriver::new(vec![
            SimulatedSlave::new("EL1008").with_io(1, 0),
            SimulatedSlave::new("EL2008").with_io(0, 1).with_dc(false),
        ]))
    }

    #[test]
    fn test_start_and_stop() {
        let driver = two_slaves();
        let mut master = EthercatMaster::new(config(), driver.clone());

        master.start().unwrap();
        assert!(master.is_running());
        assert!(master.is_started());
        assert_eq!(master.slave_count(), 2);
        assert_eq!(master.expected_wkc(), 3);
        assert_eq!(master.slave_state(1), SlaveState::OPERATIONAL);
        assert_eq!(master.slave_name(2).as_deref(), Some("EL2008"));
        assert!(master.has_distributed_clock());
        assert!(!master.slave_has_distributed_clock(2));

        master.stop();
        assert!(!master.is_running());
        assert!(!master.is_started());
        assert!(!driver.is_open());
        assert_eq!(driver.current_state(1), SlaveState::INIT);
    }

    #[test]
    fn test_second_start_is_rejected() {
        let driver = two_slaves();
        let mut master = EthercatMaster::new(config(), driver.clone());
        master.start().unwrap();
        let writes = driver.state_writes();

        assert_eq!(master.start(), Err(MasterError::AlreadyStarted));
        assert_eq!(driver.state_writes(), writes);
        assert!(master.is_running());
    }

    #[test]
    fn test_stop_without_start() {
        let driver = two_slaves();
        let mut master = EthercatMaster::new(config(), driver.clone());
        master.stop();
        master.stop();
        assert_eq!(driver.state_writes(), 0);
        assert!(!master.is_started());
    }

    #[test]
    fn test_no_slaves_leaves_adapter_open() {
        let driver = Arc::new(SimulatedDriver::new(vec![]));
        let mut master = EthercatMaster::new(config(), driver.clone());

        master.start().unwrap();
        assert!(master.is_started());
        assert!(!master.is_running());
        assert!(driver.is_open());

        master.stop();
        assert!(!driver.is_open());
    }

    #[derive(Default)]
    struct StopCounter {
        stops: std::sync::atomic::AtomicU32,
    }

    impl MasterHooks for StopCounter {
        fn on_stop(&self) {
            self.stops.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }

    #[test]
    fn test_on_stop_skipped_without_slaves() {
        let hooks = Arc::new(StopCounter::default());
        let driver = Arc::new(SimulatedDriver::new(vec![]));
        let mut master = EthercatMaster::new(config(), driver).with_hooks(hooks.clone());

        master.start().unwrap();
        master.stop();
        assert_eq!(hooks.stops.load(std::sync::atomic::Ordering::Relaxed), 0);
    }

    #[test]
    fn test_on_stop_runs_once_per_session() {
        let hooks = Arc::new(StopCounter::default());
        let mut master = EthercatMaster::new(config(), two_slaves()).with_hooks(hooks.clone());

        master.start().unwrap();
        master.stop();
        master.stop();
        assert_eq!(hooks.stops.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn test_slave_diagnostic_of_running_slave() {
        let driver = two_slaves();
        let mut master = EthercatMaster::new(config(), driver.clone());
        assert!(master.slave_diagnostic(1).is_none());

        master.start().unwrap();
        let diagnostic = master.slave_diagnostic(2).unwrap();
        assert_eq!(diagnostic.index, 2);
        assert_eq!(SlaveState::from_raw(diagnostic.state), SlaveState::OPERATIONAL);
        assert_eq!(diagnostic.status_code, 0);
        assert_eq!(diagnostic.status, al_status_message(0));
        assert!(master.slave_diagnostic(3).is_none());
        master.stop();
    }

    #[test]
    fn test_is_online_bounds() {
        let driver = two_slaves();
        let mut master = EthercatMaster::new(config(), driver.clone());
        assert!(!master.is_online(0));

        master.start().unwrap();
        assert!(master.is_online(0));
        assert!(master.is_online(1));
        assert!(!master.is_online(2));

        driver.set_lost(2, true);
        assert!(!master.is_online(1));
    }

    #[test]
    fn test_sdo_passthrough() {
        let driver = two_slaves();
        let mut master = EthercatMaster::new(config(), driver.clone());
        let mut buf = [0u8; 32];

        assert_eq!(
            master.sdo_read(1, 0x1008, 0, false, &mut buf),
            Err(MasterError::NotStarted)
        );

        master.start().unwrap();
        let n = master.sdo_read(1, 0x1008, 0, false, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"EL1008");

        assert!(matches!(
            master.sdo_read(3, 0x1008, 0, false, &mut buf),
            Err(MasterError::SlaveIndex { index: 3, count: 2 })
        ));
        assert!(matches!(
            master.sdo_write(2, 0x7777, 1, false, &[1]),
            Err(MasterError::Sdo { slave: 2, index: 0x7777, .. })
        ));
    }

    #[test]
    fn test_sync_clock_uses_driver_time() {
        let driver = two_slaves();
        let mut master = EthercatMaster::new(config(), driver);
        let sync = master.sync_clock(Duration::from_millis(1), 0);
        // Simulated reference clock starts on a cycle boundary
        assert_eq!(sync.delta_ns, 0);
        assert_eq!(master.dc_stats().sync_cycles, 1);
    }

    #[test]
    fn test_drop_stops_master() {
        let driver = two_slaves();
        {
            let mut master = EthercatMaster::new(config(), driver.clone());
            master.start().unwrap();
        }
        assert!(!driver.is_open());
        assert_eq!(driver.last_broadcast(), Some(SlaveState::INIT));
    }
}
