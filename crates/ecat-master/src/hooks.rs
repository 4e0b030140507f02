//! Application hooks invoked by the master.

use crate::driver::EthercatDriver;
use crate::io_map::IoMap;
use crate::slave::SlaveInfo;
use ecat_common::{MasterError, MasterResult};
use std::time::Duration;

/// Callbacks for the application driving the bus.
///
/// All methods have empty default implementations. Apart from
/// [`MasterHooks::on_process`], hooks run on the thread that owns the state
/// transition: the caller of `start()`/`stop()` or the recovery thread.
pub trait MasterHooks: Send + Sync {
    /// Slaves were enumerated and distributed clocks configured.
    fn on_start(&self) {}

    /// A slave reached Pre-Operational. Mailbox (SDO) access is available.
    fn on_pre_operational(&self, _slave: &SlaveHandle<'_>) {}

    /// A slave reached Safe-Operational.
    fn on_safe_operational(&self, _slave: &SlaveHandle<'_>) {}

    /// A slave reached Operational.
    fn on_operational(&self, _slave: &SlaveHandle<'_>) {}

    /// Exchange process data, once per cycle.
    ///
    /// Runs on the process data thread and must not block.
    fn on_process(&self, _io: &mut IoMap) {}

    /// The bus is about to return to Init.
    fn on_stop(&self) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl MasterHooks for NoHooks {}

/// One slave, as offered to per-slave hooks.
pub struct SlaveHandle<'a> {
    index: u16,
    info: SlaveInfo,
    driver: &'a dyn EthercatDriver,
    sdo_timeout: Duration,
}

impl<'a> SlaveHandle<'a> {
    pub(crate) fn new(
        index: u16,
        info: SlaveInfo,
        driver: &'a dyn EthercatDriver,
        sdo_timeout: Duration,
    ) -> Self {
        Self {
            index,
            info,
            driver,
            sdo_timeout,
        }
    }

    /// Bus position (1-based).
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Descriptor snapshot taken when the hook was invoked.
    pub fn info(&self) -> &SlaveInfo {
        &self.info
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Read an object from this slave.
    ///
    /// # Errors
    ///
    /// Returns [`MasterError::Sdo`] if the transfer was aborted.
    pub fn sdo_read(&self, index: u16, subindex: u8, buf: &mut [u8]) -> MasterResult<usize> {
        self.driver
            .sdo_read(self.index, index, subindex, false, buf, self.sdo_timeout)
            .map_err(|reason| MasterError::Sdo {
                slave: self.index,
                index,
                subindex,
                reason,
            })
    }

    /// Write an object to this slave.
    ///
    /// # Errors
    ///
    /// Returns [`MasterError::Sdo`] if the transfer was aborted.
    pub fn sdo_write(&self, index: u16, subindex: u8, data: &[u8]) -> MasterResult<()> {
        self.driver
            .sdo_write(self.index, index, subindex, false, data, self.sdo_timeout)
            .map_err(|reason| MasterError::Sdo {
                slave: self.index,
                index,
                subindex,
                reason,
            })
    }
}

impl std::fmt::Debug for SlaveHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlaveHandle")
            .field("index", &self.index)
            .field("name", &self.info.name)
            .finish_non_exhaustive()
    }
}
