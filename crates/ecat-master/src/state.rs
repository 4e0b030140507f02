//! EtherCAT application layer (AL) state encoding.
//!
//! States are bit flags as found in the AL status register. The aggregate
//! state of several slaves, or a state combined with the error bit, is the
//! bitwise OR of the individual values, so the type is a transparent wrapper
//! around the raw register value rather than a closed enum.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

/// Raw slave state as reported by (or requested from) a slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlaveState(u16);

impl SlaveState {
    /// No valid state, the slave did not answer.
    pub const NONE: Self = Self(0x00);
    /// Initial state after power-on.
    pub const INIT: Self = Self(0x01);
    /// Pre-operational: mailbox communication available.
    pub const PRE_OPERATIONAL: Self = Self(0x02);
    /// Bootstrap: firmware update mode.
    pub const BOOT: Self = Self(0x03);
    /// Safe-operational: inputs active, outputs safe.
    pub const SAFE_OPERATIONAL: Self = Self(0x04);
    /// Operational: full I/O active.
    pub const OPERATIONAL: Self = Self(0x08);
    /// Error indication bit, as read from a slave.
    pub const ERROR: Self = Self(0x10);
    /// Error acknowledge bit, as written to a slave.
    ///
    /// Same encoding as [`SlaveState::ERROR`]; the meaning depends on the direction.
    pub const ACK: Self = Self(0x10);

    /// Wrap a raw AL state value.
    #[must_use]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Raw AL state value.
    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Classify a raw value: anything above `OPERATIONAL` is an error state.
    #[must_use]
    pub const fn clamped(self) -> Self {
        if self.0 > Self::OPERATIONAL.0 {
            Self::ERROR
        } else {
            self
        }
    }

    /// Returns true if the error indication bit is set.
    #[must_use]
    pub const fn has_error(self) -> bool {
        self.0 & Self::ERROR.0 != 0
    }

    /// State with the error bit removed.
    #[must_use]
    pub const fn without_error(self) -> Self {
        Self(self.0 & !Self::ERROR.0)
    }

    /// Returns true if the slave is fully operational.
    #[must_use]
    pub const fn is_operational(self) -> bool {
        self.0 == Self::OPERATIONAL.0
    }
}

impl BitOr for SlaveState {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl From<u16> for SlaveState {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl From<SlaveState> for u16 {
    fn from(state: SlaveState) -> Self {
        state.0
    }
}

impl fmt::Display for SlaveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NONE => write!(f, "NONE"),
            Self::INIT => write!(f, "INIT"),
            Self::PRE_OPERATIONAL => write!(f, "PRE_OP"),
            Self::BOOT => write!(f, "BOOT"),
            Self::SAFE_OPERATIONAL => write!(f, "SAFE_OP"),
            Self::OPERATIONAL => write!(f, "OP"),
            Self::ERROR => write!(f, "ERROR"),
            s if s.has_error() => write!(f, "{} + ERROR", s.without_error()),
            Self(raw) => write!(f, "{raw:#04x}"),
        }
    }
}

/// Decode an AL status code (ETG.1000.6 table 11).
#[must_use]
pub fn al_status_message(code: u16) -> &'static str {
    match code {
        0x0000 => "No error",
        0x0001 => "Unspecified error",
        0x0002 => "No memory",
        0x0003 => "Invalid device setup",
        0x0011 => "Invalid requested state change",
        0x0012 => "Unknown requested state",
        0x0013 => "Bootstrap not supported",
        0x0014 => "No valid firmware",
        0x0015 => "Invalid mailbox configuration (BOOT)",
        0x0016 => "Invalid mailbox configuration (PREOP)",
        0x0017 => "Invalid sync manager configuration",
        0x0018 => "No valid inputs available",
        0x0019 => "No valid outputs",
        0x001A => "Synchronization error",
        0x001B => "Sync manager watchdog",
        0x001C => "Invalid sync manager types",
        0x001D => "Invalid output configuration",
        0x001E => "Invalid input configuration",
        0x001F => "Invalid watchdog configuration",
        0x0020 => "Slave needs cold start",
        0x0021 => "Slave needs INIT",
        0x0022 => "Slave needs PREOP",
        0x0023 => "Slave needs SAFEOP",
        0x0024 => "Invalid input mapping",
        0x0025 => "Invalid output mapping",
        0x0026 => "Inconsistent settings",
        0x0027 => "FreeRun not supported",
        0x0028 => "SyncMode not supported",
        0x0029 => "FreeRun needs 3 buffer mode",
        0x002A => "Background watchdog",
        0x002B => "No valid inputs and outputs",
        0x002C => "Fatal sync error",
        0x002D => "No sync error",
        0x0030 => "Invalid DC SYNC configuration",
        0x0031 => "Invalid DC latch configuration",
        0x0032 => "PLL error",
        0x0033 => "DC sync IO error",
        0x0034 => "DC sync timeout error",
        0x0035 => "DC invalid sync cycle time",
        0x0036 => "DC invalid sync0 cycle time",
        0x0037 => "DC invalid sync1 cycle time",
        0x0041 => "MBX_AOE",
        0x0042 => "MBX_EOE",
        0x0043 => "MBX_COE",
        0x0044 => "MBX_FOE",
        0x0045 => "MBX_SOE",
        0x004F => "MBX_VOE",
        0x0050 => "EEPROM no access",
        0x0051 => "EEPROM error",
        0x0060 => "Slave restarted locally",
        0x0061 => "Device identification value updated",
        0x00F0 => "Application controller available",
        _ => "Unknown AL status code",
    }
}
