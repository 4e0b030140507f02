//! EtherCAT master: slave state machine, cyclic process data and background error recovery.
//!
//! This crate provides:
//! - [`EthercatMaster`], the public start/stop facade
//! - [`EthercatDriver`], the boundary to the low-level fieldbus stack
//! - [`MasterHooks`], application callbacks per state transition and per cycle
//! - [`SlaveStateTracker`], [`BusInitializer`], [`ProcessDataLoop`] and
//!   [`ErrorRecoveryLoop`], the building blocks the facade runs
//! - [`SimulatedDriver`], an in-memory bus (feature `simulated`)
//!
//! # Threads
//!
//! A running master uses three threads: the caller's, `ecat-process` (one
//! process data frame per cycle) and `ecat-recovery` (health polling every
//! error cycle). The two loops share no lock; they communicate through the
//! atomics of [`BusSession`].

pub mod dc_sync;
pub mod driver;
pub mod hooks;
pub mod init;
pub mod io_map;
pub mod master;
pub mod process;
pub mod recovery;
pub mod session;
pub mod slave;
#[cfg(feature = "simulated")]
pub mod simulated;
pub mod state;
pub mod task;
pub mod tracker;

pub use dc_sync::{ClockSync, DcController, DcSyncStats};
pub use driver::EthercatDriver;
pub use hooks::{MasterHooks, NoHooks, SlaveHandle};
pub use init::{BusInitializer, InitStage};
pub use io_map::{IoMap, IoRegion};
pub use master::EthercatMaster;
pub use process::ProcessDataLoop;
pub use recovery::{ErrorRecoveryLoop, RecoveryTimings};
pub use session::{BusSession, FrameStats, RecoveryStats};
#[cfg(feature = "simulated")]
pub use simulated::{SimulatedDriver, SimulatedSlave};
pub use slave::{sdo_addresses, SdoAddress, SlaveIdentity, SlaveInfo};
pub use state::{al_status_message, SlaveState};
pub use task::{LoopHandle, StopFlag};
pub use tracker::SlaveStateTracker;
