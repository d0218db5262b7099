//! The register-level hardware surface this core drives, abstracted behind
//! a trait (spec.md S9: "abstract through a HAL trait with `read16`,
//! `read32`, `write16`, `write32` methods ... all cyclic checks and
//! state-machine steps become unit-testable with a mock HAL"). The MAC,
//! scheduler, and the service-channel transfer engine are external
//! collaborators (spec.md S1 "Out of scope"); this trait is the entire
//! surface the core consumes from them.

use bitflags::bitflags;

bitflags! {
    /// Per-port telegram-status register bits (spec.md S6 TGSR, GLOSSARY).
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct Tgsr: u16 {
        const ALL_MDT = 1 << 0;
        const ALL_AT = 1 << 1;
        const MST_VALID = 1 << 2;
        const MST_WIN_ERR = 1 << 3;
        const PRIMARY_TEL_SEEN = 1 << 4;
        const SECONDARY_TEL_SEEN = 1 << 5;
        const LINK_UP = 1 << 6;
    }
}

/// The two physical ports every slave chain hangs off of.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Port {
    P1,
    P2,
}

impl Port {
    pub fn other(self) -> Port {
        match self {
            Port::P1 => Port::P2,
            Port::P2 => Port::P1,
        }
    }
    pub fn index(self) -> usize {
        match self {
            Port::P1 => 0,
            Port::P2 => 1,
        }
    }
}

/// DFCSR (communication-mode register) values (spec.md S6).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DfcsrMode {
    UcLine,
    UcRing,
    RtLineP1,
    RtLineP2,
    RtBoth,
    RtRing,
}

/// A byte range allocated in TxRam or RxRam by the telegram layout builder
/// (spec.md S4 component 2).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct RamRange {
    pub offset: u32,
    pub len: u32,
}

/// Which RAM bank a range lives in.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Ram {
    Tx,
    Rx,
}

/// Per-cycle snapshot the HAL hands the topology recognizer (spec.md S4.1
/// "Inputs per cycle").
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct PortCycleStatus {
    pub new_data: bool,
    pub primary_tel_seen: bool,
    pub secondary_tel_seen: bool,
    pub link_up: bool,
    pub at0_seq_counter: u16,
}

/// Opaque completion state of a service-channel request, reported by the
/// external per-slave transfer engine (spec.md S1 "Out of scope", S4.5).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SvcStatus {
    /// No transfer outstanding; ready to accept a new request.
    CmdCleared,
    /// Transfer is in flight.
    CmdActive,
    /// Transfer completed; status word's VALID bit is set.
    CmdStatusValid(u16),
    /// Transfer failed with the given SVC error code.
    RequestError(u16),
}

/// A single service-channel request, as handed to the external per-slave
/// transfer primitive.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SvcRequest {
    pub slave_idx: u16,
    pub idn: u16,
    pub element: u8,
    pub write: bool,
    pub data: [u16; 2],
    /// Priority field (spec.md S5 "Cancellation"): a higher-priority
    /// application request preempts an in-flight broadcast step.
    pub priority: u8,
}

/// The per-slave service-channel transfer primitive (spec.md S1 "Out of
/// scope": "the service-channel per-slave transfer engine (treated as an
/// opaque request/response primitive with completion states)").
pub trait SvcPrimitive {
    /// Mirror of the Master-Control BUSY bit for this slave's channel.
    fn mbusy(&self, slave_idx: u16) -> bool;
    /// Current completion state for this slave's channel.
    fn status(&self, slave_idx: u16) -> SvcStatus;
    /// Submit a request. Returns `Err(code)` for a hard rejection; SVC error
    /// 0x7010 ("command already active") is expected to be swallowed by the
    /// caller (spec.md S4.5), not surfaced here.
    fn submit(&mut self, req: SvcRequest) -> Result<(), u16>;
}

/// The register-level HAL surface (spec.md S1 component 1, S9).
///
/// All reads/writes are ordered by program order; the HAL is assumed to
/// provide release semantics on writes that enable hardware units and
/// acquire semantics on status reads (spec.md S5 "Ordering guarantees").
/// Implementations backing real hardware map these to volatile MMIO;
/// implementations backing tests map them to an in-memory model.
pub trait Hal {
    fn read16(&self, ram: Ram, offset: u32) -> u16;
    fn write16(&mut self, ram: Ram, offset: u32, value: u16);
    fn read32(&self, ram: Ram, offset: u32) -> u32;
    fn write32(&mut self, ram: Ram, offset: u32, value: u32);

    /// Per-port telegram-status register for the current cycle.
    fn tgsr(&self, port: Port) -> Tgsr;

    /// Per-cycle wire-state snapshot used by the topology recognizer.
    fn port_cycle_status(&self, port: Port) -> PortCycleStatus;

    /// Reads the 16-bit little-endian topology-index word for slave `idx`
    /// from the AT address-field region on `port` (spec.md S4.1 step 2).
    fn topology_index(&self, port: Port, idx: usize) -> u16;

    /// Reads the AT0 address-field slot for slave `idx`: Sercos address in
    /// the low 9 bits, optional acknowledge bits above (spec.md S6).
    fn at0_address_slot(&self, port: Port, idx: usize) -> u16;

    /// Raw ring-delay measurement counter for `port`: the delay between the
    /// master's sent MST and the loopback reception, already reduced by the
    /// fixed TCNT-vs-Sercos-cycle offset (spec.md S4.3).
    fn ring_delay_counter(&self, port: Port) -> u32;

    /// S-DEV word for a recognized slave on `port` (spec.md S6).
    fn s_dev(&self, port: Port, slave_idx: u16) -> u16;

    /// Writes the C-DEV word for a slave into the appropriate MDT slot
    /// (spec.md S6).
    fn write_c_dev(&mut self, slave_idx: u16, value: u16);

    /// Service-channel status word for a slave on `port`, AT side (spec.md
    /// S6). Distinct from S-DEV: this is the per-slave SVC handshake status,
    /// not the slave's general device status.
    fn svc_status_word(&self, port: Port, slave_idx: u16) -> u16;

    /// Service-channel control word for a slave, as last written by the
    /// master (spec.md S6). Distinct from C-DEV: bit 0 is MHS, not
    /// MasterValid.
    fn svc_control_word(&self, slave_idx: u16) -> u16;

    /// Writes the service-channel control word for a slave into the
    /// appropriate MDT slot (spec.md S6).
    fn write_svc_control_word(&mut self, slave_idx: u16, value: u16);

    /// Switches the communication-mode register.
    fn set_dfcsr_mode(&mut self, mode: DfcsrMode);

    /// Writes the phase-control register, requesting the hardware switch to
    /// phase `phase` (0..=4, or `None` for NRT).
    fn write_phase_register(&mut self, phase: Option<u8>);

    /// Enables or disables cyclic telegram transmission.
    fn enable_telegrams(&mut self, enabled: bool);

    /// Starts or stops the central cyclic timers (TCNT/TCNT1/TCNT2).
    fn enable_central_timers(&mut self, enabled: bool);

    /// Resets the service-channel hardware engine (all containers).
    fn reset_svc_engine(&mut self);
    fn enable_svc_engine(&mut self, enabled: bool);

    /// Current cycle counter, monotonically increasing, wrapping at
    /// `u64::MAX`. Used to measure step timeouts in cycles rather than
    /// wall-clock (spec.md S5 "Suspension points").
    fn cycle_count(&self) -> u64;
}
