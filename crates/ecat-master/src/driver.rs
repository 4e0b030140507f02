//! Driver boundary to the low-level fieldbus stack.
//!
//! The master never encodes frames or touches sockets itself. Everything
//! below the slave state machine goes through [`EthercatDriver`], which a
//! binding to a real stack (or [`crate::simulated::SimulatedDriver`])
//! implements.
//!
//! # Concurrency
//!
//! The driver is shared between the caller thread, the process data thread
//! and the error recovery thread, so all methods take `&self`. Each call must
//! be atomic on its own; the master never holds a lock across calls. The
//! process data thread is the only caller of [`EthercatDriver::with_io_map`],
//! [`EthercatDriver::send_process_data`] and
//! [`EthercatDriver::receive_process_data`] while the bus is operational.
//!
//! Slave indices are 1-based; index 0 addresses the master pseudo-slave,
//! which aggregates (or broadcasts to) all slaves.

use crate::io_map::IoMap;
use crate::slave::SlaveInfo;
use crate::state::SlaveState;
use std::time::Duration;

/// Low-level EtherCAT stack consumed by the master.
pub trait EthercatDriver: Send + Sync {
    /// Open the network adapter by name.
    ///
    /// # Errors
    ///
    /// Returns a driver-specific reason if the adapter cannot be opened.
    fn init_adapter(&self, adapter: &str) -> Result<(), String>;

    /// Enumerate and configure slaves. Returns the number of slaves found.
    fn configure_slaves(&self) -> usize;

    /// Configure distributed clocks. Returns true if a reference clock was found.
    fn configure_dc(&self) -> bool;

    /// Build the process data image. Returns the number of mapped bytes.
    fn map_process_data(&self) -> usize;

    /// Queue one process data frame.
    fn send_process_data(&self);

    /// Wait for the process data frame and return the received work counter.
    fn receive_process_data(&self, timeout: Duration) -> i32;

    /// Refresh all slave states from the bus and return the lowest one.
    fn read_states(&self) -> SlaveState;

    /// Last known raw state of a slave (0 = aggregate).
    fn slave_state(&self, index: u16) -> SlaveState;

    /// Request a state for one slave (0 = broadcast). Does not wait.
    fn write_state(&self, index: u16, state: SlaveState);

    /// Poll until `state` is reached or `timeout` elapsed; returns the last observed state.
    fn check_state(&self, index: u16, state: SlaveState, timeout: Duration) -> SlaveState;

    /// Re-run the configuration of a slave that fell out of Operational.
    fn reconfigure_slave(&self, index: u16, timeout: Duration) -> bool;

    /// Re-address a slave that disappeared from the bus and came back.
    fn recover_slave(&self, index: u16, timeout: Duration) -> bool;

    /// Lost flag of a slave.
    fn is_lost(&self, index: u16) -> bool;

    /// Set or clear the lost flag of a slave.
    fn set_lost(&self, index: u16, lost: bool);

    /// Number of enumerated slaves.
    fn slave_count(&self) -> usize;

    /// Descriptor snapshot of a slave.
    fn slave_info(&self, index: u16) -> Option<SlaveInfo>;

    /// `(outputs_wkc, inputs_wkc)` of a process data group.
    fn group_work_counters(&self, group: u8) -> (u16, u16);

    /// Run `f` on the process data image.
    fn with_io_map(&self, f: &mut dyn FnMut(&mut IoMap));

    /// Read an object from a slave's object dictionary into `buf`.
    ///
    /// # Errors
    ///
    /// Returns the abort reason if the transfer failed.
    fn sdo_read(
        &self,
        slave: u16,
        index: u16,
        subindex: u8,
        complete_access: bool,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, String>;

    /// Write an object to a slave's object dictionary.
    ///
    /// # Errors
    ///
    /// Returns the abort reason if the transfer failed.
    fn sdo_write(
        &self,
        slave: u16,
        index: u16,
        subindex: u8,
        complete_access: bool,
        data: &[u8],
        timeout: Duration,
    ) -> Result<(), String>;

    /// System time of the DC reference clock in nanoseconds.
    fn dc_time(&self) -> i64;

    /// Close the adapter. Calling it on a closed adapter is a no-op.
    fn close(&self);
}
