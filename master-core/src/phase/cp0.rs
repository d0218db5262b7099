//! `set_phase_0` (spec.md S4.4): clears slave state, runs the address-scan
//! sub-protocol, and builds the recognized-slave list.

use super::{Phase, StepOutcome};
use crate::config::{Config, RequestedFunctions};
use crate::error::ReturnCode;
use crate::hal::{DfcsrMode, Hal, Port};
use crate::ringdelay::RingDelayEngine;
use crate::slaves::SlaveList;
use crate::topology::{AddressScan, TopologyRecognizer};

#[derive(Debug)]
enum State {
    ClearMasterValid,
    FinishPreviousPhase,
    ConfigureRegisters,
    ResetSvcEngine,
    BuildTelegrams,
    StartNewPhase,
    AddressScan,
    CheckConsistency,
    BuildRecognizedList,
    CheckAcknowledgement,
    Done,
}

/// spec.md S4.4 `set_phase_0`, steps 1-11.
pub struct SetPhase0 {
    state: State,
    scan: AddressScan,
}

impl SetPhase0 {
    pub fn new() -> Self {
        Self { state: State::ClearMasterValid, scan: AddressScan::new() }
    }

    pub fn step(
        &mut self,
        hal: &mut dyn Hal,
        config: &Config,
        current_phase: Phase,
        slaves: &mut SlaveList,
        topology: &mut TopologyRecognizer,
        ring_delay: &mut RingDelayEngine,
    ) -> StepOutcome {
        match self.state {
            State::ClearMasterValid => {
                // Step 1: clear MasterValid on all slaves, wait one cycle.
                for &addr in &slaves.projected {
                    hal.write_c_dev(addr, 0);
                }
                self.state = State::FinishPreviousPhase;
                StepOutcome::in_process()
            }

            State::FinishPreviousPhase => {
                // Step 2: finish-phase-check; the same-phase warning from
                // the common guard sequence is handled by the caller
                // before constructing this state machine (spec.md S4.4).
                if current_phase != Phase::Nrt && current_phase != Phase::Cp0 {
                    hal.enable_central_timers(false);
                }
                self.state = State::ConfigureRegisters;
                StepOutcome::in_process()
            }

            State::ConfigureRegisters => {
                // Step 3: write CP0 register preparation; switch DFCSR to
                // RT mode.
                hal.write_phase_register(None);
                hal.set_dfcsr_mode(DfcsrMode::RtBoth);
                self.state = State::ResetSvcEngine;
                StepOutcome::in_process()
            }

            State::ResetSvcEngine => {
                // Step 4: reset service-channel hardware, clear SVC
                // pointers, reset per-slave channel state.
                hal.reset_svc_engine();
                for rt in slaves.runtime.iter_mut() {
                    rt.activity = crate::slaves::Activity::Inactive;
                }
                self.state = State::BuildTelegrams;
                StepOutcome::in_process()
            }

            State::BuildTelegrams => {
                // Step 5: build CP0 TX telegrams and RX descriptors;
                // enable telegrams. The byte-range allocation itself is
                // the telegram layout builder's job; here we only flip the
                // hardware on.
                let n = slaves.projected.len();
                if crate::telegram::build_layout(Phase::Cp0, config, n, u32::MAX, u32::MAX).is_err() {
                    self.state = State::Done;
                    return StepOutcome::Error(ReturnCode::SystemError);
                }
                hal.enable_telegrams(true);
                self.state = State::StartNewPhase;
                StepOutcome::in_process()
            }

            State::StartNewPhase => {
                // Step 6: start-new-phase-prepare: enable descriptor unit
                // and central timers; begin transmitting MST/MDT0/AT0.
                hal.enable_central_timers(true);
                hal.write_phase_register(Phase::Cp0.register_value());
                slaves.clear_recognized();
                self.state = State::AddressScan;
                StepOutcome::in_process()
            }

            State::AddressScan => {
                // Step 7: address-scan loop (spec.md S4.1).
                match self.scan.step(hal, ring_delay, slaves.projected.len()) {
                    Ok(true) => {
                        self.state = State::CheckConsistency;
                        StepOutcome::in_process()
                    }
                    Ok(false) => StepOutcome::in_process(),
                    Err(code) => {
                        self.state = State::Done;
                        StepOutcome::Error(code)
                    }
                }
            }

            State::CheckConsistency => {
                // Step 8: recognized-topology consistency check. Verify at
                // least one link is active, then that the stabilized
                // sequence-counter delta matches 2*N_recognized
                // (line/broken-ring/defect-ring) or N_recognized (ring).
                use crate::topology::Topology;
                let classified = topology.step(hal);
                if let Some(t) = classified {
                    if t == Topology::NoLink {
                        self.state = State::Done;
                        return StepOutcome::Error(ReturnCode::NoLinkAttached);
                    }
                }
                let current = topology.current();
                if current == Topology::NoLink {
                    self.state = State::Done;
                    return StepOutcome::Error(ReturnCode::NoLinkAttached);
                }

                // `recognized` isn't built until the next step; the count
                // scanned for is the same `n_slaves` the address scan itself
                // walked the topology-index words for.
                let n = slaves.projected.len() as u16;
                let [seq1, seq2] = self.scan.stable_seq();
                let delta = seq1.wrapping_sub(seq2).min(seq2.wrapping_sub(seq1));
                let expected = match current {
                    Topology::Ring => n,
                    _ => n.wrapping_mul(2),
                };
                if delta != expected {
                    self.state = State::Done;
                    return StepOutcome::Error(ReturnCode::InconsistentRingAddresses);
                }

                self.state = State::BuildRecognizedList;
                StepOutcome::in_process()
            }

            State::BuildRecognizedList => {
                // Step 9.
                if let Err(code) = topology.build_recognized_list(topology.current(), slaves) {
                    self.state = State::Done;
                    return StepOutcome::Error(code);
                }
                self.state = State::CheckAcknowledgement;
                StepOutcome::in_process()
            }

            State::CheckAcknowledgement => {
                // Step 10: slave-acknowledgement and duplicate-address
                // checks.
                if config.requested_functions.contains(RequestedFunctions::SLAVE_ACK_CP0) {
                    for (idx, &addr) in slaves.recognized.iter().enumerate() {
                        let slot = hal.at0_address_slot(Port::P1, idx);
                        if slot & 0x1FF != addr {
                            self.state = State::Done;
                            return StepOutcome::Error(ReturnCode::InconsistentRingAddresses);
                        }
                    }
                }
                if slaves.multiple_saddress {
                    self.state = State::Done;
                    return StepOutcome::Error(ReturnCode::ErrorDoubleRecognizedAddress);
                }
                self.state = State::Done;
                StepOutcome::Success(ReturnCode::NoError)
            }

            State::Done => StepOutcome::Success(ReturnCode::NoError),
        }
    }
}

impl Default for SetPhase0 {
    fn default() -> Self {
        Self::new()
    }
}
