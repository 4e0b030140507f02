//! Slave descriptors as seen by the master.
//!
//! The driver owns the slave table; the master only ever works on
//! [`SlaveInfo`] snapshots taken through the driver boundary.

use crate::state::SlaveState;
use serde::{Deserialize, Serialize};

/// EtherCAT slave identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SlaveIdentity {
    /// Vendor ID from ESC EEPROM.
    pub vendor_id: u32,
    /// Product code from ESC EEPROM.
    pub product_code: u32,
    /// Revision number.
    pub revision: u32,
}

impl SlaveIdentity {
    /// Create a new slave identity.
    pub const fn new(vendor_id: u32, product_code: u32, revision: u32) -> Self {
        Self {
            vendor_id,
            product_code,
            revision,
        }
    }
}

impl std::fmt::Display for SlaveIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "V:{:#010x} P:{:#010x} R:{:#010x}",
            self.vendor_id, self.product_code, self.revision
        )
    }
}

/// Snapshot of one slave descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveInfo {
    /// Position on the bus (1-based).
    pub index: u16,
    /// Device name read from the slave information interface.
    pub name: String,
    /// Vendor/product/revision.
    pub identity: SlaveIdentity,
    /// Configured station address.
    pub configured_address: u16,
    /// Process data group the slave is mapped into.
    pub group: u8,
    /// Output (master → slave) process data length in bits.
    pub output_bits: u32,
    /// Input (slave → master) process data length in bits.
    pub input_bits: u32,
    /// Whether the slave supports distributed clocks.
    pub dc_supported: bool,
    /// Propagation delay to this slave in nanoseconds.
    pub propagation_delay_ns: i32,
    /// Last known raw AL state.
    pub state: SlaveState,
    /// Last AL status code.
    pub al_status_code: u16,
    /// Whether the recovery loop considers the slave lost.
    pub lost: bool,
}

impl SlaveInfo {
    /// Create a descriptor for a slave at `index` with default fields.
    pub fn new(index: u16, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            identity: SlaveIdentity::default(),
            configured_address: 0x1000 + index,
            group: 0,
            output_bits: 0,
            input_bits: 0,
            dc_supported: false,
            propagation_delay_ns: 0,
            state: SlaveState::NONE,
            al_status_code: 0,
            lost: false,
        }
    }

    /// Returns true if the slave belongs to the primary process data group.
    pub fn in_primary_group(&self) -> bool {
        self.group == 0
    }

    /// Output length rounded up to whole bytes.
    pub fn output_bytes(&self) -> usize {
        (self.output_bits as usize).div_ceil(8)
    }

    /// Input length rounded up to whole bytes.
    pub fn input_bytes(&self) -> usize {
        (self.input_bits as usize).div_ceil(8)
    }
}

/// SDO (Service Data Object) address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SdoAddress {
    /// Object index.
    pub index: u16,
    /// Object subindex.
    pub subindex: u8,
}

impl SdoAddress {
    /// Create a new SDO address.
    pub const fn new(index: u16, subindex: u8) -> Self {
        Self { index, subindex }
    }
}

impl std::fmt::Display for SdoAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06x}:{}", self.index, self.subindex)
    }
}

/// Common SDO addresses for standard CoE objects.
pub mod sdo_addresses {
    use super::SdoAddress;

    /// Device type.
    pub const DEVICE_TYPE: SdoAddress = SdoAddress::new(0x1000, 0);
    /// Error register.
    pub const ERROR_REGISTER: SdoAddress = SdoAddress::new(0x1001, 0);
    /// Manufacturer device name.
    pub const DEVICE_NAME: SdoAddress = SdoAddress::new(0x1008, 0);
    /// Software version.
    pub const SW_VERSION: SdoAddress = SdoAddress::new(0x100A, 0);
    /// Identity object vendor ID.
    pub const VENDOR_ID: SdoAddress = SdoAddress::new(0x1018, 1);
    /// Identity object product code.
    pub const PRODUCT_CODE: SdoAddress = SdoAddress::new(0x1018, 2);
    /// SM2 PDO assignment (outputs).
    pub const SM2_PDO_ASSIGN: SdoAddress = SdoAddress::new(0x1C12, 0);
    /// SM3 PDO assignment (inputs).
    pub const SM3_PDO_ASSIGN: SdoAddress = SdoAddress::new(0x1C13, 0);
}
