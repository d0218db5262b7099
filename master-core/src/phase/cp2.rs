//! `set_phase_2` (spec.md S4.4): symmetric to `set_phase_1`, plus clearing
//! diagnostics/connection state and enabling the service-channel engine.

use super::{Phase, StepBudget, StepOutcome};
use crate::callback::EventCallbacks;
use crate::config::Config;
use crate::error::{ExtendedDiagnostic, ReturnCode};
use crate::hal::Hal;
use crate::slaves::SlaveList;
use crate::wire::SDevWord;

/// Number of SVC hardware containers available; indices at or beyond this
/// count fall back to software emulation (spec.md S4.4 set_phase_2(d)).
pub const HW_SVC_CONTAINER_COUNT: usize = 8;

#[derive(Debug)]
enum State {
    ClearDiagnostics,
    FinishPreviousPhase,
    BuildTelegrams,
    StartNewPhase,
    CheckSlaveValid(StepBudget),
    Done,
}

pub struct SetPhase2 {
    state: State,
}

impl SetPhase2 {
    pub fn new() -> Self {
        Self { state: State::ClearDiagnostics }
    }

    pub fn step(
        &mut self,
        hal: &mut dyn Hal,
        config: &Config,
        slaves: &mut SlaveList,
        diagnostic: &mut ExtendedDiagnostic,
        callbacks: &mut dyn EventCallbacks,
    ) -> StepOutcome {
        match &mut self.state {
            State::ClearDiagnostics => {
                // (a) clear extended-diagnostic block, (b) clear CC
                // connection list -- modeled here as clearing each active
                // slave's connection pointer len via the telegram layout,
                // rebuilt in BuildTelegrams.
                diagnostic.clear();
                self.state = State::FinishPreviousPhase;
                StepOutcome::in_process()
            }

            State::FinishPreviousPhase => {
                hal.enable_central_timers(false);
                self.state = State::BuildTelegrams;
                StepOutcome::in_process()
            }

            State::BuildTelegrams => {
                let layout =
                    match crate::telegram::build_layout(Phase::Cp2, config, slaves.projected.len(), u32::MAX, u32::MAX) {
                        Ok(l) => l,
                        Err(code) => {
                            self.state = State::Done;
                            return StepOutcome::Error(code);
                        }
                    };
                callbacks.on_ram_alloc(layout.tx_used, layout.tx_total, layout.rx_used, layout.rx_total);
                // (c) enable the service-channel hardware engine; (d) the
                // software-emulated containers beyond HW_SVC_CONTAINER_COUNT
                // are driven through the same `SvcPrimitive` trait object
                // by the caller, so there is nothing further to allocate
                // here (spec.md S1 "Out of scope").
                hal.enable_svc_engine(true);
                self.state = State::StartNewPhase;
                StepOutcome::in_process()
            }

            State::StartNewPhase => {
                hal.write_phase_register(Phase::Cp2.register_value());
                hal.enable_central_timers(true);
                self.state = State::CheckSlaveValid(StepBudget::default());
                StepOutcome::in_process()
            }

            State::CheckSlaveValid(budget) => {
                let all_valid = slaves
                    .recognized
                    .iter()
                    .all(|&addr| SDevWord(hal.s_dev(crate::hal::Port::P1, addr)).slave_valid());
                if all_valid {
                    self.state = State::Done;
                    return StepOutcome::Success(ReturnCode::NoError);
                }
                if !budget.tick() {
                    self.state = State::Done;
                    return StepOutcome::Error(ReturnCode::ErrorPhaseChangeCheck);
                }
                StepOutcome::in_process()
            }

            State::Done => StepOutcome::Success(ReturnCode::NoError),
        }
    }
}

impl Default for SetPhase2 {
    fn default() -> Self {
        Self::new()
    }
}
