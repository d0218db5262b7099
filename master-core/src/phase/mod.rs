//! The phase state machine (spec.md S4.4): drives CP0..CP4 progression as
//! resumable cooperative state machines, plus the set-NRT, ring-recovery
//! and open-ring sibling operations.
//!
//! Each operation is modeled the way spec.md S9 asks for a "cooperative
//! state machine via reentrant function": a state enum carried across
//! calls rather than an integer code, removing the IllegalCase branch by
//! construction (spec.md S9).

mod cp0;
mod cp1;
mod cp2;
mod cp34;
pub(crate) mod nrt;
mod ring_recovery;

pub use cp0::SetPhase0;
pub use cp1::SetPhase1;
pub use cp2::SetPhase2;
pub use cp34::{SetPhase3, SetPhase4};
pub use nrt::SetNrt;
pub use ring_recovery::{OpenRing, RecoverRing};

use crate::config::DEFAULT_STEP_PERIOD_US;
use crate::error::ReturnCode;

/// The five communication phases plus the idle state (spec.md S3).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Phase {
    Nrt,
    Cp0,
    Cp1,
    Cp2,
    Cp3,
    Cp4,
}

impl Phase {
    /// spec.md S3: "phase only advances sequentially except that (a) any
    /// phase may be abandoned to NRT or CP0, and (b) CP0->CP0 is
    /// permitted".
    pub fn can_advance_to(self, target: Phase) -> bool {
        use Phase::*;
        match target {
            Nrt => true,
            Cp0 => true,
            Cp1 => self == Cp0,
            Cp2 => self == Cp1,
            Cp3 => self == Cp2,
            Cp4 => self == Cp3,
        }
    }

    pub fn predecessor(self) -> Option<Phase> {
        use Phase::*;
        match self {
            Nrt => None,
            Cp0 => None,
            Cp1 => Some(Cp0),
            Cp2 => Some(Cp1),
            Cp3 => Some(Cp2),
            Cp4 => Some(Cp3),
        }
    }

    pub fn register_value(self) -> Option<u8> {
        match self {
            Phase::Nrt => None,
            Phase::Cp0 => Some(0),
            Phase::Cp1 => Some(1),
            Phase::Cp2 => Some(2),
            Phase::Cp3 => Some(3),
            Phase::Cp4 => Some(4),
        }
    }
}

/// The outcome of advancing one step of a phase state machine (spec.md
/// S4.4): `FunctionInProcess` with a caller-honored sleep budget, or a
/// terminal success/error code.
#[derive(Copy, Clone, Debug)]
pub enum StepOutcome {
    InProcess { sleep_time_us: u32 },
    Success(ReturnCode),
    Error(ReturnCode),
}

impl StepOutcome {
    pub fn in_process() -> Self {
        StepOutcome::InProcess { sleep_time_us: DEFAULT_STEP_PERIOD_US }
    }
}

/// Common per-step timeout/retry budget (spec.md S4.4 "Failure semantics
/// per phase": "default 20 x 10 ms").
#[derive(Copy, Clone, Debug)]
pub struct StepBudget {
    remaining_steps: u32,
}

impl StepBudget {
    pub fn new(total_steps: u32) -> Self {
        Self { remaining_steps: total_steps }
    }

    /// Consumes one step; returns `false` once the budget is exhausted.
    pub fn tick(&mut self) -> bool {
        if self.remaining_steps == 0 {
            return false;
        }
        self.remaining_steps -= 1;
        true
    }
}

impl Default for StepBudget {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_STEP_TIMEOUT_STEPS)
    }
}

/// Checks the common guard sequence run on entry to every `set_phase_N`
/// (spec.md S4.4 "Common guard sequence"): current phase must be N-1, or
/// N for the same-phase warning.
pub fn check_phase_guard(current: Phase, target: Phase) -> Result<(), ReturnCode> {
    if current == target {
        return Err(ReturnCode::WarningSamePhase);
    }
    if target.predecessor() != Some(current) {
        return Err(ReturnCode::WrongPhase);
    }
    Ok(())
}
