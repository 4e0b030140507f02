//! Workspace-level acceptance tests for the EtherCAT master.
//!
//! All tests use the in-memory driver and need no privileges. The soak tests
//! run for minutes and are ignored unless requested with `--ignored`.

mod common;
mod recovery_test;
mod shutdown_test;
mod soak_test;
mod startup_test;
