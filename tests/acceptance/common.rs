//! Common utilities for acceptance tests.
//!
//! Provides helpers for:
//! - Building simulated buses from TOML snippets
//! - Short-timeout master configurations
//! - Polling for asynchronous conditions

#![allow(dead_code)] // Not every helper is used by every test module

use ecat_common::{MasterConfig, RuntimeConfig};
use ecat_master::{EthercatMaster, SimulatedDriver, SimulatedSlave};
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// A master together with the simulated bus it drives.
pub struct Bench {
    /// The simulated bus, for fault injection and observation.
    pub driver: Arc<SimulatedDriver>,
    /// The master under test.
    pub master: EthercatMaster,
}

impl Bench {
    /// Build a bench from a full runtime configuration.
    pub fn from_runtime(config: &RuntimeConfig) -> Self {
        let driver = Arc::new(SimulatedDriver::from_config(&config.simulation));
        let mut master_config = config.master.clone();
        if master_config.adapter.is_none() {
            master_config.adapter = Some(config.simulation.adapter.clone());
        }
        let master = EthercatMaster::new(master_config, driver.clone());
        Self { driver, master }
    }

    /// Build a bench from explicit slaves and timings.
    pub fn new(config: MasterConfig, slaves: Vec<SimulatedSlave>) -> Self {
        let driver = Arc::new(SimulatedDriver::new(slaves).with_adapter("sim0"));
        let master = EthercatMaster::new(config, driver.clone());
        Self { driver, master }
    }
}

/// Short timeouts so failing cases finish quickly.
pub fn fast_config() -> MasterConfig {
    let mut config = MasterConfig::for_adapter("sim0");
    config.name = "acceptance".into();
    config.error_cycle_time = Duration::from_millis(20);
    config.recovery_timeout = Duration::from_millis(200);
    config.timeouts.pre_operational = Duration::from_millis(500);
    config.timeouts.safe_operational = Duration::from_millis(500);
    config.timeouts.operational = Duration::from_secs(1);
    config.timeouts.init = Duration::from_millis(500);
    config.timeouts.state_check = Duration::from_millis(500);
    config
}

/// A coupler followed by `terminals` alternating input/output terminals.
pub fn terminal_line(terminals: usize) -> Vec<SimulatedSlave> {
    let mut slaves = vec![SimulatedSlave::new("EK1100").with_dc(false)];
    for i in 0..terminals {
        let slave = if i % 2 == 0 {
            SimulatedSlave::new(format!("EL1008 #{i}")).with_io(1, 0)
        } else {
            SimulatedSlave::new(format!("EL2008 #{i}")).with_io(0, 1)
        };
        slaves.push(slave);
    }
    slaves
}

/// The expected work counter of [`terminal_line`].
pub fn terminal_line_wkc(terminals: usize) -> i32 {
    let inputs = terminals.div_ceil(2);
    let outputs = terminals / 2;
    i32::try_from(2 * outputs + inputs).unwrap()
}

/// Poll `condition` every millisecond until it holds or `timeout` elapsed.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Resident set size of this process in bytes (Linux only, 0 elsewhere).
pub fn memory_usage() -> u64 {
    fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| {
            status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok())
        })
        .map_or(0, |kb| kb * 1024)
}
