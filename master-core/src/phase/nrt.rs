//! `set_nrt` (spec.md S4.4): the idle state, reachable from NRT or CP0.

use super::Phase;
use crate::callback::{Event, EventCallbacks};
use crate::error::ReturnCode;
use crate::hal::{DfcsrMode, Hal};

use super::StepOutcome;

#[derive(Debug)]
enum State {
    StopCommunication,
    ClearRegisters,
    ResetDfcsr,
    StartCommunication,
    Done,
}

/// spec.md S4.4 `set_nrt`: "only callable from NRT or CP0".
pub struct SetNrt {
    state: State,
    previous_was_ring: bool,
}

impl SetNrt {
    pub fn new(previous_was_ring: bool) -> Self {
        Self { state: State::StopCommunication, previous_was_ring }
    }

    pub fn step(&mut self, hal: &mut dyn Hal, callbacks: &mut dyn EventCallbacks) -> StepOutcome {
        match self.state {
            State::StopCommunication => {
                callbacks.on_event(Event::StopCommunication);
                self.state = State::ClearRegisters;
                StepOutcome::in_process()
            }
            State::ClearRegisters => {
                hal.enable_telegrams(false);
                hal.write_phase_register(None);
                hal.enable_central_timers(false);
                self.state = State::ResetDfcsr;
                StepOutcome::in_process()
            }
            State::ResetDfcsr => {
                hal.set_dfcsr_mode(if self.previous_was_ring { DfcsrMode::UcRing } else { DfcsrMode::UcLine });
                self.state = State::StartCommunication;
                StepOutcome::in_process()
            }
            State::StartCommunication => {
                callbacks.on_event(Event::StartCommunication);
                self.state = State::Done;
                StepOutcome::Success(ReturnCode::NoError)
            }
            State::Done => StepOutcome::Success(ReturnCode::NoError),
        }
    }
}

/// spec.md S4.4: `set_nrt` is only reachable from `Phase::Nrt` or
/// `Phase::Cp0`.
pub fn guard(current: Phase) -> Result<(), ReturnCode> {
    match current {
        Phase::Nrt | Phase::Cp0 => Ok(()),
        _ => Err(ReturnCode::WrongPhase),
    }
}
