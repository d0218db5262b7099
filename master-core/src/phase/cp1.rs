//! `set_phase_1` (spec.md S4.4).

use super::{Phase, StepBudget, StepOutcome};
use crate::callback::{EventCallbacks, Event};
use crate::config::Config;
use crate::error::ReturnCode;
use crate::hal::{DfcsrMode, Hal, Port};
use crate::ringdelay::RingDelayEngine;
use crate::slaves::{Activity, SlaveList};
use crate::wire::{SDevWord, SvcControlWord, SvcStatusWord};

#[derive(Debug)]
enum State {
    CheckCycleTime,
    ValidateRecognizedSubset,
    FinishPreviousPhase,
    BuildTelegrams,
    StartNewPhase,
    CheckSlaveValid(StepBudget),
    CheckSvcValid(StepBudget),
    ToggleHandshake,
    VerifyHandshake(StepBudget),
    RingDelayMeasurement(StepBudget),
    Done,
}

/// spec.md S4.4 `set_phase_1`, steps 1-10.
pub struct SetPhase1 {
    state: State,
}

impl SetPhase1 {
    pub fn new() -> Self {
        Self { state: State::CheckCycleTime }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn step(
        &mut self,
        hal: &mut dyn Hal,
        config: &Config,
        slaves: &mut SlaveList,
        ring_delay: &mut RingDelayEngine,
        topology: crate::topology::Topology,
        n_recognized: u32,
        extra_delay_ns: u32,
        callbacks: &mut dyn EventCallbacks,
    ) -> StepOutcome {
        match &mut self.state {
            State::CheckCycleTime => {
                // Step 1.
                if let Err(code) = config.validate() {
                    self.state = State::Done;
                    return StepOutcome::Error(code);
                }
                self.state = State::ValidateRecognizedSubset;
                StepOutcome::in_process()
            }

            State::ValidateRecognizedSubset => {
                // Step 2.
                if !slaves.recognized_is_subset_of_projected() && !config.hot_plug.enabled {
                    self.state = State::Done;
                    return StepOutcome::Error(ReturnCode::ProjSlavesNotOneToOne);
                }
                for &addr in &slaves.recognized {
                    if let Some(idx) = slaves.slave_index_of(addr) {
                        slaves.runtime[idx].activity = Activity::Active;
                    }
                }
                self.state = State::FinishPreviousPhase;
                StepOutcome::in_process()
            }

            State::FinishPreviousPhase => {
                // Step 3.
                hal.enable_central_timers(false);
                self.state = State::BuildTelegrams;
                StepOutcome::in_process()
            }

            State::BuildTelegrams => {
                // Step 4: build CP1 telegrams; emit the TxRam-allocation
                // callback.
                let layout =
                    match crate::telegram::build_layout(Phase::Cp1, config, slaves.projected.len(), u32::MAX, u32::MAX) {
                        Ok(l) => l,
                        Err(code) => {
                            self.state = State::Done;
                            return StepOutcome::Error(code);
                        }
                    };
                callbacks.on_ram_alloc(layout.tx_used, layout.tx_total, layout.rx_used, layout.rx_total);
                self.state = State::StartNewPhase;
                StepOutcome::in_process()
            }

            State::StartNewPhase => {
                // Step 5.
                hal.write_phase_register(Phase::Cp1.register_value());
                hal.enable_central_timers(true);
                callbacks.on_event(Event::StartCommunication);
                self.state = State::CheckSlaveValid(StepBudget::new(
                    crate::config::CP1_SLAVE_VALID_TIMEOUT_MS / 10,
                ));
                StepOutcome::in_process()
            }

            State::CheckSlaveValid(budget) => {
                // Step 6: bounded wait for S-DEV.SlaveValid.
                let preferred_port = |rt: &crate::slaves::SlaveRuntime| rt.preferred_port.unwrap_or(Port::P1);
                let all_valid = slaves.recognized.iter().all(|&addr| {
                    slaves
                        .slave_index_of(addr)
                        .map(|idx| SDevWord(hal.s_dev(preferred_port(&slaves.runtime[idx]), addr)).slave_valid())
                        .unwrap_or(false)
                });
                if all_valid {
                    self.state = State::CheckSvcValid(StepBudget::default());
                    return StepOutcome::in_process();
                }
                if !budget.tick() {
                    self.state = State::Done;
                    return StepOutcome::Error(ReturnCode::ErrorPhaseChangeCheck);
                }
                StepOutcome::in_process()
            }

            State::CheckSvcValid(budget) => {
                // Step 7: bounded wait for S-SVC.Valid, the service-channel
                // status word's VALID bit (spec.md S6) -- distinct from the
                // S-DEV.SlaveValid checked in the previous step.
                let preferred_port = |rt: &crate::slaves::SlaveRuntime| rt.preferred_port.unwrap_or(Port::P1);
                let all_valid = slaves.recognized.iter().all(|&addr| {
                    slaves
                        .slave_index_of(addr)
                        .map(|idx| {
                            SvcStatusWord(hal.svc_status_word(preferred_port(&slaves.runtime[idx]), addr)).valid()
                        })
                        .unwrap_or(false)
                });
                if all_valid {
                    self.state = State::ToggleHandshake;
                    return StepOutcome::in_process();
                }
                if !budget.tick() {
                    self.state = State::Done;
                    return StepOutcome::Error(ReturnCode::ErrorPhaseChangeCheck);
                }
                StepOutcome::in_process()
            }

            State::ToggleHandshake => {
                // Step 8: toggle MHS on every recognized slave's SVC control
                // word (spec.md S6); C-DEV's topology-command bits are a
                // separate concern and are left untouched here.
                for &addr in &slaves.recognized {
                    let current = SvcControlWord(hal.svc_control_word(addr));
                    hal.write_svc_control_word(addr, current.with_mhs_toggled().0);
                }
                self.state = State::VerifyHandshake(StepBudget::default());
                StepOutcome::in_process()
            }

            State::VerifyHandshake(budget) => {
                // Step 9: confirm every slave echoed the handshake bit and
                // still reports itself valid (phase-change-start
                // confirmation).
                let all_hs = slaves.recognized.iter().all(|&addr| {
                    let word = SDevWord(hal.s_dev(Port::P1, addr));
                    word.topology_hs() && word.slave_valid()
                });
                if all_hs {
                    self.state = State::RingDelayMeasurement(StepBudget::default());
                    return StepOutcome::in_process();
                }
                if !budget.tick() {
                    self.state = State::Done;
                    return StepOutcome::Error(ReturnCode::ErrorPhaseChangeStart);
                }
                StepOutcome::in_process()
            }

            State::RingDelayMeasurement(budget) => {
                // Step 10: ring-delay determination.
                let p1_full = ring_delay.sample(hal, Port::P1);
                let p2_full = ring_delay.sample(hal, Port::P2);
                if p1_full && p2_full {
                    let _ = ring_delay.derive(topology, n_recognized, extra_delay_ns);
                    self.state = State::Done;
                    return StepOutcome::Success(ReturnCode::NoError);
                }
                if !budget.tick() {
                    self.state = State::Done;
                    return StepOutcome::Error(ReturnCode::ErrorPhaseChangeCheck);
                }
                StepOutcome::in_process()
            }

            State::Done => {
                hal.set_dfcsr_mode(DfcsrMode::RtBoth);
                StepOutcome::Success(ReturnCode::NoError)
            }
        }
    }
}

impl Default for SetPhase1 {
    fn default() -> Self {
        Self::new()
    }
}
