//! One-shot startup sequence: adapter, enumeration, mapping, Operational.
//!
//! Only the final Operational check decides success. Earlier stage timeouts
//! are logged and the sequence continues, because slaves that are merely slow
//! still get a chance to catch up while the bus is driven to Operational.

use crate::hooks::{MasterHooks, SlaveHandle};
use crate::state::{al_status_message, SlaveState};
use crate::tracker::SlaveStateTracker;
use ecat_common::{MasterConfig, MasterError, MasterResult, SlaveDiagnostic};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Poll slice of the Operational wait. One process data frame is exchanged per slice.
const OPERATIONAL_POLL: Duration = Duration::from_millis(50);

/// Progress of the startup sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitStage {
    /// Nothing opened yet.
    #[default]
    AdapterClosed,
    /// Network adapter opened.
    AdapterOpen,
    /// Slaves enumerated and configured.
    SlavesEnumerated,
    /// Pre-Operational reached (or timed out).
    PreOperational,
    /// Process data mapped.
    Mapped,
    /// Safe-Operational reached (or timed out).
    SafeOperational,
    /// Operational requested for all slaves.
    OperationalRequested,
    /// All slaves Operational.
    Operational,
    /// Startup failed; the bus was rolled back.
    Failed,
}

impl std::fmt::Display for InitStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AdapterClosed => "adapter closed",
            Self::AdapterOpen => "adapter open",
            Self::SlavesEnumerated => "slaves enumerated",
            Self::PreOperational => "pre-operational",
            Self::Mapped => "mapped",
            Self::SafeOperational => "safe-operational",
            Self::OperationalRequested => "operational requested",
            Self::Operational => "operational",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Drives the bus from a closed adapter to Operational.
pub struct BusInitializer<'a> {
    config: &'a MasterConfig,
    tracker: &'a SlaveStateTracker,
    hooks: &'a dyn MasterHooks,
    stage: InitStage,
}

impl<'a> BusInitializer<'a> {
    /// Create an initializer for one session.
    pub fn new(
        config: &'a MasterConfig,
        tracker: &'a SlaveStateTracker,
        hooks: &'a dyn MasterHooks,
    ) -> Self {
        Self {
            config,
            tracker,
            hooks,
            stage: InitStage::AdapterClosed,
        }
    }

    /// Current stage.
    pub fn stage(&self) -> InitStage {
        self.stage
    }

    fn advance(&mut self, stage: InitStage) {
        debug!(master = %self.config.name, from = %self.stage, to = %stage, "Startup stage");
        self.stage = stage;
    }

    /// Run the startup sequence.
    ///
    /// Returns the number of slaves. Zero slaves is a success with the adapter
    /// left open and the bus not operational.
    ///
    /// # Errors
    ///
    /// - [`MasterError::Config`] if no adapter is configured
    /// - [`MasterError::AdapterOpen`] if the driver refuses the adapter
    /// - [`MasterError::NotOperational`] if some slave did not reach
    ///   Operational; all slaves were commanded back to Init and the adapter
    ///   was closed
    pub fn run(&mut self) -> MasterResult<usize> {
        let adapter = self
            .config
            .adapter
            .as_deref()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| MasterError::Config("no network adapter configured".into()))?;
        let driver = self.tracker.driver();
        let session = self.tracker.session();
        let timeouts = &self.config.timeouts;

        info!(master = %self.config.name, adapter, "Starting EtherCAT master");
        if let Err(reason) = driver.init_adapter(adapter) {
            self.advance(InitStage::Failed);
            return Err(MasterError::AdapterOpen {
                adapter: adapter.to_string(),
                reason,
            });
        }
        self.advance(InitStage::AdapterOpen);

        let count = driver.configure_slaves();
        session.set_slave_count(count);
        if count == 0 {
            warn!(master = %self.config.name, adapter, "No slaves found");
            return Ok(0);
        }
        info!(master = %self.config.name, slaves = count, "Slaves found and configured");
        self.advance(InitStage::SlavesEnumerated);

        if self.config.dc_enabled {
            let reference = driver.configure_dc();
            debug!(master = %self.config.name, reference_clock = reference, "Distributed clocks configured");
        }
        self.hooks.on_start();

        if self.tracker.check_state(0, SlaveState::PRE_OPERATIONAL, timeouts.pre_operational)
            != SlaveState::PRE_OPERATIONAL
        {
            warn!(master = %self.config.name, "Not all slaves reached pre-operational state");
        }
        self.tracker.read_states();
        self.notify(SlaveState::PRE_OPERATIONAL, |hooks, slave| {
            hooks.on_pre_operational(slave);
        });
        self.advance(InitStage::PreOperational);

        let mapped = driver.map_process_data();
        info!(master = %self.config.name, mapped_bytes = mapped, "Process data mapped");
        self.advance(InitStage::Mapped);

        if self.tracker.check_state(0, SlaveState::SAFE_OPERATIONAL, timeouts.safe_operational)
            != SlaveState::SAFE_OPERATIONAL
        {
            warn!(master = %self.config.name, "Not all slaves reached safe-operational state");
        }

        driver.send_process_data();
        driver.receive_process_data(self.config.receive_timeout);
        self.tracker.read_states();
        self.log_slaves();
        self.notify(SlaveState::SAFE_OPERATIONAL, |hooks, slave| {
            hooks.on_safe_operational(slave);
        });
        self.advance(InitStage::SafeOperational);

        let (outputs_wkc, inputs_wkc) = driver.group_work_counters(0);
        let expected = 2 * i32::from(outputs_wkc) + i32::from(inputs_wkc);
        session.set_expected_wkc(expected);
        debug!(master = %self.config.name, expected, "Expected work counter");

        info!(master = %self.config.name, "Requesting operational state for all slaves");
        self.tracker.write_state(0, SlaveState::OPERATIONAL);
        self.advance(InitStage::OperationalRequested);
        let reached = self.wait_operational(timeouts.operational);

        if reached != SlaveState::OPERATIONAL {
            let diagnostics = self.diagnostics();
            for d in &diagnostics {
                warn!(master = %self.config.name, slave = d.index, state = d.state, "{d}");
            }
            self.rollback();
            self.advance(InitStage::Failed);
            return Err(MasterError::NotOperational { diagnostics });
        }

        self.tracker.read_states();
        self.notify(SlaveState::OPERATIONAL, |hooks, slave| {
            hooks.on_operational(slave);
        });
        session.set_operational(true);
        self.advance(InitStage::Operational);
        info!(master = %self.config.name, slaves = count, "Operational state reached for all slaves");

        Ok(count)
    }

    /// Keep process data flowing while the slaves move to Operational.
    fn wait_operational(&self, timeout: Duration) -> SlaveState {
        let driver = self.tracker.driver();
        let deadline = Instant::now() + timeout;
        loop {
            driver.send_process_data();
            driver.receive_process_data(self.config.receive_timeout);

            let remaining = deadline.saturating_duration_since(Instant::now());
            let state = self
                .tracker
                .check_state(0, SlaveState::OPERATIONAL, remaining.min(OPERATIONAL_POLL));
            if state == SlaveState::OPERATIONAL || remaining <= OPERATIONAL_POLL {
                self.tracker.session().set_bus_state(state);
                return state;
            }
        }
    }

    /// Invoke a per-slave hook for every slave currently in `state`.
    fn notify<F>(&self, state: SlaveState, hook: F)
    where
        F: Fn(&dyn MasterHooks, &SlaveHandle<'_>),
    {
        let driver = self.tracker.driver();
        for index in 1..=self.tracker.slave_count() {
            let observed = self.tracker.raw_state(index);
            if observed != state {
                debug!(master = %self.config.name, slave = index, %state, %observed, "Skipping hook");
                continue;
            }
            if let Some(info) = driver.slave_info(index) {
                let handle = SlaveHandle::new(index, info, &**driver, self.config.sdo_timeout);
                hook(self.hooks, &handle);
            }
        }
    }

    fn log_slaves(&self) {
        let driver = self.tracker.driver();
        for index in 1..=self.tracker.slave_count() {
            if let Some(info) = driver.slave_info(index) {
                info!(
                    master = %self.config.name,
                    slave = index,
                    name = %info.name,
                    output_bits = info.output_bits,
                    input_bits = info.input_bits,
                    state = %info.state,
                    dc = info.dc_supported,
                    "Slave"
                );
            }
        }
    }

    fn diagnostics(&self) -> Vec<SlaveDiagnostic> {
        self.tracker.read_states();
        let driver = self.tracker.driver();
        self.tracker
            .slaves_not_in(SlaveState::OPERATIONAL)
            .into_iter()
            .map(|index| {
                let status_code = driver.slave_info(index).map_or(0, |i| i.al_status_code);
                SlaveDiagnostic {
                    index,
                    state: self.tracker.raw_state(index).raw(),
                    status_code,
                    status: al_status_message(status_code).to_string(),
                }
            })
            .collect()
    }

    /// Return every slave to Init and release the adapter.
    fn rollback(&self) {
        self.hooks.on_stop();
        let reached = self.tracker.request_state(SlaveState::INIT, self.config.timeouts.init);
        if reached != SlaveState::INIT {
            warn!(master = %self.config.name, state = %reached, "Not all slaves returned to init state");
        }
        self.tracker.driver().close();
        self.tracker.session().set_slave_count(0);
    }
}
