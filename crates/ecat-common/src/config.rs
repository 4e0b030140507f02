//! Configuration structures for the EtherCAT master.
//!
//! Supports TOML deserialization with sensible defaults for
//! development and explicit values for production deployment.

use crate::error::{MasterError, MasterResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration used by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Master configuration.
    pub master: MasterConfig,

    /// Simulated bus used when no hardware driver is available.
    pub simulation: SimulationConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// EtherCAT master configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Name used in log output.
    pub name: String,

    /// Network adapter name (e.g., "enp3s0", "eth0").
    /// Must be explicitly configured - no default to avoid using wrong interface.
    pub adapter: Option<String>,

    /// Process data cycle time.
    #[serde(with = "humantime_serde")]
    pub cycle_time: Duration,

    /// Timeout for receiving one process data frame.
    #[serde(with = "humantime_serde")]
    pub receive_timeout: Duration,

    /// Polling interval of the error recovery loop.
    #[serde(with = "humantime_serde")]
    pub error_cycle_time: Duration,

    /// Timeout for a single slave reconfiguration or recovery attempt.
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,

    /// State check used to tell a transient glitch from a disconnected slave.
    #[serde(with = "humantime_serde")]
    pub lost_check_timeout: Duration,

    /// Timeout for mailbox (SDO) transfers.
    #[serde(with = "humantime_serde")]
    pub sdo_timeout: Duration,

    /// Configure distributed clocks during startup.
    pub dc_enabled: bool,

    /// State transition timeouts.
    pub timeouts: StateTimeouts,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            name: String::from("ethercat-master"),
            adapter: None, // Must be explicitly configured
            cycle_time: Duration::from_millis(1),
            receive_timeout: Duration::from_millis(2),
            error_cycle_time: Duration::from_millis(40),
            recovery_timeout: Duration::from_millis(500),
            lost_check_timeout: Duration::from_millis(2),
            sdo_timeout: Duration::from_millis(700),
            dc_enabled: true,
            timeouts: StateTimeouts::default(),
        }
    }
}

impl MasterConfig {
    /// Create a configuration for the given adapter with default timings.
    pub fn for_adapter(adapter: impl Into<String>) -> Self {
        Self {
            adapter: Some(adapter.into()),
            ..Self::default()
        }
    }

    /// Check that the configuration can drive a bus.
    ///
    /// # Errors
    ///
    /// Returns [`MasterError::Config`] if no adapter is set or a loop period is zero.
    pub fn validate(&self) -> MasterResult<()> {
        match self.adapter.as_deref() {
            None | Some("") => {
                return Err(MasterError::Config("no network adapter configured".into()));
            }
            Some(_) => {}
        }
        if self.cycle_time.is_zero() {
            return Err(MasterError::Config("cycle_time must be non-zero".into()));
        }
        if self.error_cycle_time.is_zero() {
            return Err(MasterError::Config(
                "error_cycle_time must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Bounded waits used while driving the slave state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateTimeouts {
    /// Wait for all slaves to reach PRE_OP after enumeration.
    #[serde(with = "humantime_serde")]
    pub pre_operational: Duration,

    /// Wait for all slaves to reach SAFE_OP after mapping.
    #[serde(with = "humantime_serde")]
    pub safe_operational: Duration,

    /// Wait for all slaves to reach OP. Devices may need to finish local
    /// initialization, so this is much longer than the other stages.
    #[serde(with = "humantime_serde")]
    pub operational: Duration,

    /// Wait for all slaves to return to INIT on shutdown.
    #[serde(with = "humantime_serde")]
    pub init: Duration,

    /// Wait for a single slave pushed from SAFE_OP back to OP.
    #[serde(with = "humantime_serde")]
    pub state_check: Duration,
}

impl Default for StateTimeouts {
    fn default() -> Self {
        Self {
            pre_operational: Duration::from_millis(2000),
            safe_operational: Duration::from_millis(2000),
            operational: Duration::from_millis(10_000),
            init: Duration::from_millis(2000),
            state_check: Duration::from_millis(2000),
        }
    }
}

/// Simulated bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Adapter name accepted by the simulated driver.
    pub adapter: String,

    /// Simulated slaves in bus order.
    pub slaves: Vec<SimulatedSlaveConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            adapter: String::from("sim0"),
            slaves: vec![
                SimulatedSlaveConfig {
                    name: String::from("EL1008+EL2008 DIO"),
                    input_bytes: 1,
                    output_bytes: 1,
                    ..SimulatedSlaveConfig::default()
                },
                SimulatedSlaveConfig {
                    name: String::from("EL3102+EL4102 AIO"),
                    input_bytes: 4,
                    output_bytes: 4,
                    ..SimulatedSlaveConfig::default()
                },
            ],
        }
    }
}

/// One simulated slave.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedSlaveConfig {
    /// Device name.
    pub name: String,

    /// Process data inputs (slave → master) in bytes.
    pub input_bytes: usize,

    /// Process data outputs (master → slave) in bytes.
    pub output_bytes: usize,

    /// Whether the slave supports distributed clocks.
    pub dc_supported: bool,

    /// Time the slave needs to complete a requested state transition.
    #[serde(with = "humantime_serde")]
    pub transition_delay: Duration,
}

impl Default for SimulatedSlaveConfig {
    fn default() -> Self {
        Self {
            name: String::from("simulated slave"),
            input_bytes: 0,
            output_bytes: 0,
            dc_supported: true,
            transition_delay: Duration::from_millis(10),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error).
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
