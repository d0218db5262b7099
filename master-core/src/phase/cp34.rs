//! `set_phase_3` and `set_phase_4` (spec.md S4.4): the two phases that
//! gate their register switch behind service-channel procedure commands.

use super::{Phase, StepBudget, StepOutcome};
use crate::config::Config;
use crate::error::{ExtendedDiagnostic, ReturnCode};
use crate::hal::{Hal, SvcPrimitive};
use crate::slaves::SlaveList;
use crate::svc::{ProcedureCommand, ProcedureState};
use crate::wire::SDevWord;

/// S-0-1024 "SYNC delay measuring" procedure command IDN (spec.md S4.4).
const IDN_SYNC_DELAY_MEASURING: u16 = 1024;
/// S-0-0127 "CP3 transition check" procedure command IDN.
const IDN_CP3_TRANSITION_CHECK: u16 = 127;
/// S-0-0128 "CP4 transition check" procedure command IDN.
const IDN_CP4_TRANSITION_CHECK: u16 = 128;

#[derive(Debug)]
enum State3 {
    SyncDelay(ProcedureCommand),
    TransitionCheck(ProcedureCommand),
    ConfigureRegisters,
    StartNewPhase,
    CheckSlaveValid(StepBudget),
    Done,
}

/// spec.md S4.4 `set_phase_3`.
pub struct SetPhase3 {
    state: State3,
}

impl SetPhase3 {
    pub fn new() -> Self {
        Self { state: State3::SyncDelay(ProcedureCommand::new(IDN_SYNC_DELAY_MEASURING)) }
    }

    pub fn step(
        &mut self,
        hal: &mut dyn Hal,
        config: &Config,
        slaves: &mut SlaveList,
        svc: &mut dyn SvcPrimitive,
        diagnostic: &mut ExtendedDiagnostic,
    ) -> StepOutcome {
        if slaves.multiple_saddress {
            return StepOutcome::Error(ReturnCode::NoUniqueRecognizedAddresses);
        }

        match &mut self.state {
            State3::SyncDelay(cmd) => {
                let sync_slaves = slaves
                    .active_slave_indices()
                    .filter(|&i| slaves.runtime[i].scp_sync)
                    .collect::<heapless::Vec<usize, { crate::config::MAX_SLAVES }>>();
                match cmd.step(svc, sync_slaves.into_iter(), diagnostic, ReturnCode::S01024CmdError) {
                    Ok(true) => {
                        self.state = State3::TransitionCheck(ProcedureCommand::new(IDN_CP3_TRANSITION_CHECK));
                        StepOutcome::in_process()
                    }
                    Ok(false) => StepOutcome::in_process(),
                    Err(code) => StepOutcome::Error(code),
                }
            }

            State3::TransitionCheck(cmd) => {
                let active = slaves
                    .active_slave_indices()
                    .collect::<heapless::Vec<usize, { crate::config::MAX_SLAVES }>>();
                match cmd.step(svc, active.into_iter(), diagnostic, ReturnCode::Cp3TransCheckCmdError) {
                    Ok(true) => {
                        self.state = State3::ConfigureRegisters;
                        StepOutcome::in_process()
                    }
                    Ok(false) => StepOutcome::in_process(),
                    Err(code) => StepOutcome::Error(code),
                }
            }

            State3::ConfigureRegisters => {
                hal.enable_central_timers(false);
                let _ =
                    crate::telegram::build_layout(Phase::Cp3, config, slaves.projected.len(), u32::MAX, u32::MAX);
                self.state = State3::StartNewPhase;
                StepOutcome::in_process()
            }

            State3::StartNewPhase => {
                hal.write_phase_register(Phase::Cp3.register_value());
                hal.enable_central_timers(true);
                self.state = State3::CheckSlaveValid(StepBudget::default());
                StepOutcome::in_process()
            }

            State3::CheckSlaveValid(budget) => {
                let all_valid = slaves
                    .recognized
                    .iter()
                    .all(|&addr| SDevWord(hal.s_dev(crate::hal::Port::P1, addr)).slave_valid());
                if all_valid {
                    self.state = State3::Done;
                    return StepOutcome::Success(ReturnCode::NoError);
                }
                if !budget.tick() {
                    self.state = State3::Done;
                    return StepOutcome::Error(ReturnCode::ErrorPhaseChangeCheck);
                }
                StepOutcome::in_process()
            }

            State3::Done => StepOutcome::Success(ReturnCode::NoError),
        }
    }

    pub fn sync_delay_state(&self) -> Option<ProcedureState> {
        match &self.state {
            State3::SyncDelay(cmd) => Some(cmd.state),
            _ => None,
        }
    }
}

impl Default for SetPhase3 {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
enum State4 {
    TransitionCheck(ProcedureCommand),
    ConfigureRegisters,
    StartNewPhase,
    ClearCcData { cycles_waited: u32 },
    Done,
}

/// spec.md S4.4 `set_phase_4`.
pub struct SetPhase4 {
    state: State4,
    entry_cycle: Option<u64>,
}

impl SetPhase4 {
    pub fn new() -> Self {
        Self {
            state: State4::TransitionCheck(ProcedureCommand::new(IDN_CP4_TRANSITION_CHECK)),
            entry_cycle: None,
        }
    }

    pub fn step(
        &mut self,
        hal: &mut dyn Hal,
        config: &Config,
        slaves: &mut SlaveList,
        svc: &mut dyn SvcPrimitive,
        diagnostic: &mut ExtendedDiagnostic,
    ) -> StepOutcome {
        match &mut self.state {
            State4::TransitionCheck(cmd) => {
                let active = slaves
                    .active_slave_indices()
                    .collect::<heapless::Vec<usize, { crate::config::MAX_SLAVES }>>();
                match cmd.step(svc, active.into_iter(), diagnostic, ReturnCode::Cp4TransCheckCmdError) {
                    Ok(true) => {
                        self.state = State4::ConfigureRegisters;
                        StepOutcome::in_process()
                    }
                    Ok(false) => StepOutcome::in_process(),
                    Err(code) => StepOutcome::Error(code),
                }
            }

            State4::ConfigureRegisters => {
                let _ =
                    crate::telegram::build_layout(Phase::Cp4, config, slaves.projected.len(), u32::MAX, u32::MAX);
                self.state = State4::StartNewPhase;
                StepOutcome::in_process()
            }

            State4::StartNewPhase => {
                hal.write_phase_register(Phase::Cp4.register_value());
                self.entry_cycle = Some(hal.cycle_count());
                self.state = State4::ClearCcData { cycles_waited: 0 };
                StepOutcome::in_process()
            }

            State4::ClearCcData { cycles_waited } => {
                // spec.md S4.4: "clears CC-data TxRam on first cycle in
                // CP4 (waits >= 3 Sercos cycles)".
                *cycles_waited += 1;
                if *cycles_waited < 3 {
                    return StepOutcome::in_process();
                }
                hal.write32(crate::hal::Ram::Tx, 0, 0);
                self.state = State4::Done;
                StepOutcome::Success(ReturnCode::NoError)
            }

            State4::Done => StepOutcome::Success(ReturnCode::NoError),
        }
    }
}

impl Default for SetPhase4 {
    fn default() -> Self {
        Self::new()
    }
}
