use std::fmt;
use thiserror::Error;

/// Diagnostic line for one slave that failed to reach the requested state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveDiagnostic {
    /// Slave index (1-based).
    pub index: u16,
    /// Raw AL state reported by the slave.
    pub state: u16,
    /// AL status code reported by the slave.
    pub status_code: u16,
    /// Decoded AL status code.
    pub status: String,
}

impl fmt::Display for SlaveDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "slave {} state={:#04x} status={:#06x}: {}",
            self.index, self.state, self.status_code, self.status
        )
    }
}

fn format_diagnostics(diagnostics: &[SlaveDiagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| format!("\n  {d}"))
        .collect::<String>()
}

/// Master error types covering configuration, startup and slave access failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MasterError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// `start()` called while a bus session is active.
    #[error("master already started")]
    AlreadyStarted,

    /// Operation requires an open adapter.
    #[error("master not started")]
    NotStarted,

    /// The network adapter could not be opened.
    #[error("no socket connection on adapter {adapter}: {reason}")]
    AdapterOpen {
        /// Adapter name.
        adapter: String,
        /// Reason reported by the driver.
        reason: String,
    },

    /// Not all slaves reached the operational state; the bus was rolled back.
    #[error("not all slaves reached operational state{}", format_diagnostics(.diagnostics))]
    NotOperational {
        /// One entry per slave that is not operational.
        diagnostics: Vec<SlaveDiagnostic>,
    },

    /// A background loop thread could not be spawned.
    #[error("failed to spawn {name} thread: {reason}")]
    Spawn {
        /// Thread name.
        name: String,
        /// OS error description.
        reason: String,
    },

    /// Slave index outside of the enumerated range.
    #[error("slave {index} out of range (slave count {count})")]
    SlaveIndex {
        /// Requested index.
        index: u16,
        /// Number of enumerated slaves.
        count: usize,
    },

    /// SDO transfer failed.
    #[error("SDO {index:#06x}:{subindex} on slave {slave} failed: {reason}")]
    Sdo {
        /// Slave index (1-based).
        slave: u16,
        /// Object index.
        index: u16,
        /// Object subindex.
        subindex: u8,
        /// Reason reported by the driver.
        reason: String,
    },
}

impl MasterError {
    /// Slave diagnostics attached to a failed operational transition.
    pub fn diagnostics(&self) -> &[SlaveDiagnostic] {
        match self {
            Self::NotOperational { diagnostics } => diagnostics,
            _ => &[],
        }
    }
}

/// Convenience type alias for master operations.
pub type MasterResult<T> = Result<T, MasterError>;
