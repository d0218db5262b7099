//! On-the-wire layouts (spec.md S6, S9 "Packed on-the-wire structs").
//!
//! Bit-packed control/status words use explicit masks and shifts rather
//! than native Rust bitfields, per the design note in spec.md S9: the wire
//! format is little-endian and bit-position-sensitive regardless of host
//! endianness. Byte-range framing that's read/written as whole little-endian
//! words (the CP0 MDT0 header) uses `zerocopy` the way the teacher's drv
//! crates do for wire structs, giving safe, alignment-free transmute to and
//! from `&[u8]`.

use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// The 32-bit `CommVersion` field written into MDT0 at CP0 (spec.md S3).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct CommVersion(pub u32);

impl CommVersion {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn with_address_allocation(mut self, on: bool) -> Self {
        self.set_bit(0, on);
        self
    }
    pub fn address_allocation(self) -> bool {
        self.bit(0)
    }

    pub fn with_telegram_count(mut self, count: crate::config::TelegramCount) -> Self {
        let bits: u32 = match count {
            crate::config::TelegramCount::Two => 0b00,
            crate::config::TelegramCount::Four => 0b01,
        };
        self.0 = (self.0 & !(0b11 << 16)) | (bits << 16);
        self
    }

    pub fn with_param_in_mdt0(mut self, on: bool) -> Self {
        self.set_bit(20, on);
        self
    }
    pub fn param_in_mdt0(self) -> bool {
        self.bit(20)
    }

    pub fn with_fast_phase_switch(mut self, on: bool) -> Self {
        self.set_bit(21, on);
        self
    }
    pub fn fast_phase_switch(self) -> bool {
        self.bit(21)
    }

    pub fn with_last_slave_no_forward(mut self, on: bool) -> Self {
        self.set_bit(22, on);
        self
    }

    fn bit(self, n: u32) -> bool {
        (self.0 >> n) & 1 != 0
    }
    fn set_bit(&mut self, n: u32, on: bool) {
        if on {
            self.0 |= 1 << n;
        } else {
            self.0 &= !(1 << n);
        }
    }
}

/// Number of payload bytes reserved for MDT0 at CP0 (spec.md S6).
pub const CP0_MDT_LENGTH: usize = 64;

/// The first 16 bytes of MDT0 in CP0, plus the optional UC-timing words
/// (spec.md S6). Laid out byte-for-byte, little-endian, regardless of host
/// endianness.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct Cp0Mdt0Header {
    comm_version: U32,
    t1_ns: U32,
    t6_ns: U32,
    t7_ns: U32,
}

impl Cp0Mdt0Header {
    pub fn new(comm_version: CommVersion) -> Self {
        Self {
            comm_version: U32::new(comm_version.0),
            t1_ns: U32::new(0),
            t6_ns: U32::new(0),
            t7_ns: U32::new(0),
        }
    }

    /// Sets the three UC-timing words; only written to the wire when
    /// `uc_mode != Fixed` (spec.md S4.3).
    pub fn with_uc_timing(mut self, t1_ns: u32, t6_ns: u32, t7_ns: u32) -> Self {
        self.t1_ns = U32::new(t1_ns);
        self.t6_ns = U32::new(t6_ns);
        self.t7_ns = U32::new(t7_ns);
        self
    }

    pub fn comm_version(&self) -> CommVersion {
        CommVersion(self.comm_version.get())
    }
}

/// A 2-bit topology command field value (spec.md S6 C-DEV word).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TopologyCommand {
    FastForwardBothPorts,
    LoopbackForwardPrimary,
    LoopbackForwardSecondary,
    Reserved,
}

impl TopologyCommand {
    fn from_bits(bits: u16) -> Self {
        match bits & 0b11 {
            0b00 => TopologyCommand::FastForwardBothPorts,
            0b01 => TopologyCommand::LoopbackForwardPrimary,
            0b10 => TopologyCommand::LoopbackForwardSecondary,
            _ => TopologyCommand::Reserved,
        }
    }
    fn to_bits(self) -> u16 {
        match self {
            TopologyCommand::FastForwardBothPorts => 0b00,
            TopologyCommand::LoopbackForwardPrimary => 0b01,
            TopologyCommand::LoopbackForwardSecondary => 0b10,
            TopologyCommand::Reserved => 0b11,
        }
    }
}

/// The C-DEV (master-written control) word embedded per slave in every MDT
/// (spec.md S6).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct CDevWord(pub u16);

impl CDevWord {
    const MASTER_VALID: u16 = 1 << 0;
    const TOPOLOGY_HS: u16 = 1 << 1;
    const TOPOLOGY_CMD_SHIFT: u16 = 2;

    pub fn master_valid(self) -> bool {
        self.0 & Self::MASTER_VALID != 0
    }
    pub fn with_master_valid(mut self, on: bool) -> Self {
        self.set(Self::MASTER_VALID, on);
        self
    }

    pub fn topology_hs(self) -> bool {
        self.0 & Self::TOPOLOGY_HS != 0
    }
    pub fn with_topology_hs(mut self, on: bool) -> Self {
        self.set(Self::TOPOLOGY_HS, on);
        self
    }

    pub fn topology_command(self) -> TopologyCommand {
        TopologyCommand::from_bits(self.0 >> Self::TOPOLOGY_CMD_SHIFT)
    }
    pub fn with_topology_command(mut self, cmd: TopologyCommand) -> Self {
        self.0 = (self.0 & !(0b11 << Self::TOPOLOGY_CMD_SHIFT))
            | (cmd.to_bits() << Self::TOPOLOGY_CMD_SHIFT);
        self
    }

    fn set(&mut self, mask: u16, on: bool) {
        if on {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }
}

/// The S-DEV (slave-written status) word embedded per slave in every AT
/// (spec.md S6).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct SDevWord(pub u16);

impl SDevWord {
    const SLAVE_VALID: u16 = 1 << 0;
    const TOPOLOGY_HS: u16 = 1 << 1;
    const TOPOLOGY_STATUS_SHIFT: u16 = 2;
    const INACTIVE_PORT_STATUS_SHIFT: u16 = 4;

    pub fn slave_valid(self) -> bool {
        self.0 & Self::SLAVE_VALID != 0
    }
    pub fn topology_hs(self) -> bool {
        self.0 & Self::TOPOLOGY_HS != 0
    }
    pub fn current_topology_status(self) -> u16 {
        (self.0 >> Self::TOPOLOGY_STATUS_SHIFT) & 0b11
    }
    pub fn inactive_port_status(self) -> u16 {
        (self.0 >> Self::INACTIVE_PORT_STATUS_SHIFT) & 0b11
    }
}

/// The service-channel control word, MDT side (spec.md S6).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct SvcControlWord(pub u16);

impl SvcControlWord {
    const MHS: u16 = 1 << 0;
    const WRITE: u16 = 1 << 1;
    const LAST_TRANSMISSION: u16 = 1 << 2;
    const ELEMENT_SHIFT: u16 = 3;
    const ELEMENT_MASK: u16 = 0b111;
    const BUSY: u16 = 1 << 6;

    pub fn mhs(self) -> bool {
        self.0 & Self::MHS != 0
    }
    pub fn with_mhs_toggled(mut self) -> Self {
        self.0 ^= Self::MHS;
        self
    }
    pub fn with_write(mut self, write: bool) -> Self {
        if write {
            self.0 |= Self::WRITE;
        } else {
            self.0 &= !Self::WRITE;
        }
        self
    }
    pub fn with_last_transmission(mut self, on: bool) -> Self {
        if on {
            self.0 |= Self::LAST_TRANSMISSION;
        } else {
            self.0 &= !Self::LAST_TRANSMISSION;
        }
        self
    }
    pub fn with_element(mut self, element: u8) -> Self {
        self.0 = (self.0 & !(Self::ELEMENT_MASK << Self::ELEMENT_SHIFT))
            | (((element as u16) & Self::ELEMENT_MASK) << Self::ELEMENT_SHIFT);
        self
    }
    pub fn busy(self) -> bool {
        self.0 & Self::BUSY != 0
    }
}

/// The service-channel status word, AT side (spec.md S6).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct SvcStatusWord(pub u16);

impl SvcStatusWord {
    const HANDSHAKE_ACK: u16 = 1 << 0;
    const BUSY: u16 = 1 << 1;
    const ERROR: u16 = 1 << 2;
    const VALID: u16 = 1 << 3;

    pub fn handshake_ack(self) -> bool {
        self.0 & Self::HANDSHAKE_ACK != 0
    }
    pub fn busy(self) -> bool {
        self.0 & Self::BUSY != 0
    }
    pub fn error(self) -> bool {
        self.0 & Self::ERROR != 0
    }
    pub fn valid(self) -> bool {
        self.0 & Self::VALID != 0
    }
}

/// IDN element codes used by the SVC control word's 3-bit element field
/// (spec.md S6: "e.g. 7 = operation data, 1 = IDN").
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum SvcElement {
    Idn = 1,
    OperationData = 7,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comm_version_round_trips_fields() {
        let v = CommVersion::new()
            .with_address_allocation(true)
            .with_telegram_count(crate::config::TelegramCount::Four)
            .with_param_in_mdt0(true)
            .with_fast_phase_switch(true);
        assert!(v.address_allocation());
        assert!(v.param_in_mdt0());
        assert!(v.fast_phase_switch());
        assert_eq!((v.0 >> 16) & 0b11, 0b01);
    }

    #[test]
    fn cdev_topology_command_bits() {
        let w = CDevWord::default().with_topology_command(TopologyCommand::LoopbackForwardSecondary);
        assert_eq!(w.topology_command(), TopologyCommand::LoopbackForwardSecondary);
        assert_eq!((w.0 >> 2) & 0b11, 0b10);
    }

    #[test]
    fn mdt0_header_is_16_bytes() {
        assert_eq!(core::mem::size_of::<Cp0Mdt0Header>(), 16);
    }
}
