//! The closed return-code set from spec.md S6, plus the per-slave extended
//! diagnostic record from S7.
//!
//! Modeled the way `drv-i2c-api`'s `ResponseCode` is: a single `#[repr(u32)]`
//! enum deriving `FromPrimitive`/`ToPrimitive` so it can be handed across a
//! register or wire boundary as a plain integer, with ordinary `Result`/`?`
//! on this side of that boundary. There's no IPC layer here (this is a
//! `no_std` library, not a Hubris task), so `idol`/`derive_idol_err` are not
//! used -- see DESIGN.md.

use heapless::Vec;
use num_derive::{FromPrimitive, ToPrimitive};

/// Maximum number of slaves this core will track in a single extended
/// diagnostic snapshot. Matches the per-port address-scan ceiling in
/// spec.md S3 (`SlaveAvailableList`, 512 addresses) halved for the common
/// case of one broken diagnostic pass; sized generously for the line/ring
/// topologies this crate actually drives (see `config::MAX_SLAVES`).
pub const MAX_DIAG_SLAVES: usize = crate::config::MAX_SLAVES;

/// The closed set of outcomes a caller can observe from a phase, topology,
/// or cyclic-processing operation. Every terminal state spec.md S6 names
/// appears here; nothing is added.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum ReturnCode {
    NoError = 0,
    FunctionInProcess,
    WrongPhase,
    WarningSamePhase,
    InvalidSercosCycleTime,
    WrongProjectedSlaveList,
    IllegalSlaveAddress,
    ErrorDoubleAddress,
    ErrorDoubleRecognizedAddress,
    ProjSlavesNotOneToOne,
    ErrorPhaseChangeCheck,
    ErrorPhaseChangeStart,
    ErrorTimeoutP0,
    NoCommunicationP0,
    LoopNotClosed,
    InconsistentRingAddresses,
    NoStableTopologyInCp0,
    Cp0ComVerCheck,
    S01024CmdError,
    Cp3TransCheckCmdError,
    Cp4TransCheckCmdError,
    NoUniqueRecognizedAddresses,
    NoLinkAttached,
    NoTelegramsReceived,
    MstMiss,
    MstWindowError,
    TelErrorOverrun,
    TopologyChange,
    WrongTopology,
    RecoverRingError,
    RecoverRingOk,
    RingRecoveryAborted,
    OpenRingOk,
    OpenRingError,
    OpenRingInvalidAddr,
    IllegalCase,
    SystemError,
    LineBreakError,
    NoRamMirrorAllocated,
    WarnTooFewTxRamForUcc,
    WarnTooFewRxRamForUcc,
    /// Ring-delay calculation reached a topology the reference formulas
    /// (spec.md S4.3) don't cover. Preserved per the open question in
    /// spec.md S9: the fallback `max(avgP1, avgP2)` branch still runs, but
    /// callers must be told rather than have it pass silently.
    UnsupportedTopology,
}

impl ReturnCode {
    /// True for the five warning codes in spec.md S7 kind 5: non-fatal,
    /// caller proceeds.
    pub fn is_warning(self) -> bool {
        matches!(
            self,
            ReturnCode::WarningSamePhase
                | ReturnCode::WarnTooFewTxRamForUcc
                | ReturnCode::WarnTooFewRxRamForUcc
                | ReturnCode::RecoverRingOk
        )
    }
}

pub type Result<T> = core::result::Result<T, ReturnCode>;

/// Per-slave error code observed during a service-channel broadcast step
/// (spec.md S4.5). This is the opaque completion state of the external SVC
/// primitive, not interpreted further by the core.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SlaveError {
    pub slave_idx: u16,
    pub idn: u16,
    pub code: u16,
}

/// The per-slave extended-diagnostic record (spec.md S7): cleared at the
/// start of every phase transition, populated as slaves fail a step.
#[derive(Clone, Debug, Default)]
pub struct ExtendedDiagnostic {
    entries: Vec<SlaveError, MAX_DIAG_SLAVES>,
}

impl ExtendedDiagnostic {
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Record a slave failure. Silently drops the entry if the diagnostic
    /// list is already full -- the aggregate error returned to the caller
    /// (spec.md S4.4 "Failure semantics per phase") identifies the first
    /// failing slave regardless, so the list is a best-effort record, not
    /// the source of truth for "did step N fail".
    pub fn push(&mut self, err: SlaveError) {
        let _ = self.entries.push(err);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SlaveError> {
        self.entries.iter()
    }

    /// The first failing slave's code, per spec.md S4.4: "the step completes
    /// with an aggregate error identifying the first failing slave's code."
    pub fn first(&self) -> Option<SlaveError> {
        self.entries.first().copied()
    }
}
