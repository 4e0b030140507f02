#![doc = "Common types shared across the EtherCAT master workspace."]

pub mod config;
pub mod error;

pub use config::*;
pub use error::*;
