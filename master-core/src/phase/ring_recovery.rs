//! `recover_ring` and `open_ring` (spec.md S4.4): the topology-repair
//! sibling operations that share the phase machine's cooperative-step
//! shape.

use super::StepBudget;
use super::StepOutcome;
use crate::error::ReturnCode;
use crate::hal::{Hal, Port};
use crate::ringdelay::RingDelayEngine;
use crate::slaves::SlaveList;
use crate::svc::ProcedureCommand;
use crate::topology::{LineBreakManager, Topology, TopologyRecognizer};
use crate::wire::{CDevWord, SDevWord, TopologyCommand};

/// Bound on cycles a commanded slave has to toggle S-DEV.Topology-HS
/// before `recover_ring` gives up on it (spec.md S4.4 recover_ring step 2).
const HANDSHAKE_TOGGLE_BUDGET: u32 = 50;

#[derive(Debug)]
enum State {
    WaitForLoopbackState(StepBudget),
    CommandFastForward,
    WaitForAck(StepBudget),
    RemeasureDelay,
    VerifyRing,
    WriteS01015(ProcedureCommand),
    RerunSyncDelay(ProcedureCommand),
    Done,
}

/// spec.md S4.4 `recover_ring`: "callable when current topology != Ring".
pub struct RecoverRing {
    state: State,
    starting_topology: Topology,
    commanded_slaves: heapless::Vec<u16, { crate::config::MAX_SLAVES }>,
}

impl RecoverRing {
    pub fn new(starting_topology: Topology) -> Result<Self, ReturnCode> {
        if starting_topology == Topology::Ring {
            return Err(ReturnCode::WrongTopology);
        }
        Ok(Self {
            state: State::WaitForLoopbackState(StepBudget::default()),
            starting_topology,
            commanded_slaves: heapless::Vec::new(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn step(
        &mut self,
        hal: &mut dyn Hal,
        topology: &mut TopologyRecognizer,
        slaves: &mut SlaveList,
        ring_delay: &mut RingDelayEngine,
        n_recognized: u32,
        extra_delay_ns: u32,
        svc: &mut dyn crate::hal::SvcPrimitive,
        diagnostic: &mut crate::error::ExtendedDiagnostic,
    ) -> StepOutcome {
        if topology.current() != self.starting_topology && !matches!(self.state, State::Done) {
            self.state = State::Done;
            return StepOutcome::Error(ReturnCode::RingRecoveryAborted);
        }

        match &mut self.state {
            State::WaitForLoopbackState(budget) => {
                // Step 1: wait for the break-point slaves to report the
                // expected loopback-forward topology status.
                let break_point_slaves = break_point_addrs(slaves);
                let ready = break_point_slaves
                    .iter()
                    .all(|&addr| SDevWord(hal.s_dev(Port::P1, addr)).current_topology_status() != 0);
                if ready {
                    self.commanded_slaves = break_point_slaves;
                    self.state = State::CommandFastForward;
                    return StepOutcome::in_process();
                }
                if !budget.tick() {
                    self.state = State::Done;
                    return StepOutcome::Error(ReturnCode::RecoverRingError);
                }
                StepOutcome::in_process()
            }

            State::CommandFastForward => {
                // Step 2: command FastForward, toggling topology-HS.
                for &addr in &self.commanded_slaves {
                    let current = CDevWord(hal.s_dev(Port::P1, addr));
                    let next = current
                        .with_topology_hs(!current.topology_hs())
                        .with_topology_command(TopologyCommand::FastForwardBothPorts);
                    hal.write_c_dev(addr, next.0);
                }
                self.state = State::WaitForAck(StepBudget::new(HANDSHAKE_TOGGLE_BUDGET));
                StepOutcome::in_process()
            }

            State::WaitForAck(budget) => {
                let all_acked = self
                    .commanded_slaves
                    .iter()
                    .all(|&addr| SDevWord(hal.s_dev(Port::P1, addr)).topology_hs());
                if all_acked {
                    self.state = State::RemeasureDelay;
                    return StepOutcome::in_process();
                }
                if !budget.tick() {
                    // Revert the command and abort (spec.md S4.4 step 2).
                    for &addr in &self.commanded_slaves {
                        hal.write_c_dev(addr, 0);
                    }
                    self.state = State::Done;
                    return StepOutcome::Error(ReturnCode::RecoverRingError);
                }
                StepOutcome::in_process()
            }

            State::RemeasureDelay => {
                ring_delay.reset_accumulators();
                let p1 = ring_delay.sample(hal, Port::P1);
                let p2 = ring_delay.sample(hal, Port::P2);
                if p1 && p2 {
                    self.state = State::VerifyRing;
                }
                StepOutcome::in_process()
            }

            State::VerifyRing => {
                if topology.current() != Topology::Ring {
                    self.state = State::Done;
                    return StepOutcome::Error(ReturnCode::RingRecoveryAborted);
                }
                let _ = ring_delay.derive(Topology::Ring, n_recognized, extra_delay_ns);
                LineBreakManager::reassign(Topology::Ring, topology, slaves, |_, _| true);
                self.state = State::WriteS01015(ProcedureCommand::new(1015));
                StepOutcome::in_process()
            }

            State::WriteS01015(cmd) => {
                let sync_slaves = slaves
                    .active_slave_indices()
                    .filter(|&i| slaves.runtime[i].scp_sync)
                    .collect::<heapless::Vec<usize, { crate::config::MAX_SLAVES }>>();
                match cmd.step(svc, sync_slaves.into_iter(), diagnostic, ReturnCode::S01024CmdError) {
                    Ok(true) => {
                        self.state = State::RerunSyncDelay(ProcedureCommand::new(1024));
                        StepOutcome::in_process()
                    }
                    Ok(false) => StepOutcome::in_process(),
                    Err(code) => {
                        self.state = State::Done;
                        StepOutcome::Error(code)
                    }
                }
            }

            State::RerunSyncDelay(cmd) => {
                let sync_slaves = slaves
                    .active_slave_indices()
                    .filter(|&i| slaves.runtime[i].scp_sync)
                    .collect::<heapless::Vec<usize, { crate::config::MAX_SLAVES }>>();
                match cmd.step(svc, sync_slaves.into_iter(), diagnostic, ReturnCode::S01024CmdError) {
                    Ok(true) => {
                        self.state = State::Done;
                        StepOutcome::Success(ReturnCode::RecoverRingOk)
                    }
                    Ok(false) => StepOutcome::in_process(),
                    Err(code) => {
                        self.state = State::Done;
                        StepOutcome::Error(code)
                    }
                }
            }

            State::Done => StepOutcome::Success(ReturnCode::RecoverRingOk),
        }
    }
}

/// The slaves sitting at the current break-point on each port, i.e. the
/// last slave each `AvailableList` still carries (spec.md S4.2).
fn break_point_addrs(slaves: &SlaveList) -> heapless::Vec<u16, { crate::config::MAX_SLAVES }> {
    let mut out = heapless::Vec::new();
    for &addr in &slaves.recognized {
        if let Some(idx) = slaves.slave_index_of(addr) {
            if slaves.runtime[idx].preferred_port.is_some() {
                let _ = out.push(addr);
            }
        }
    }
    out
}

#[derive(Debug)]
enum OpenState {
    CommandLoopback,
    VerifyHandshake(StepBudget),
    Done,
}

/// spec.md S4.4 `open_ring(addrA, addrB)`: the inverse of `recover_ring`.
pub struct OpenRing {
    state: OpenState,
    addr_a: u16,
    addr_b: u16,
}

impl OpenRing {
    /// Validates that `addr_a`/`addr_b` are directly adjacent (or one is 0,
    /// meaning the master port, and the other is directly connected to
    /// it), per spec.md S4.4.
    pub fn new(addr_a: u16, addr_b: u16, slaves: &SlaveList) -> Result<Self, ReturnCode> {
        if addr_a == addr_b {
            return Err(ReturnCode::OpenRingInvalidAddr);
        }
        let adjacent = if addr_a == 0 || addr_b == 0 {
            let other = if addr_a == 0 { addr_b } else { addr_a };
            slaves.recognized.first() == Some(&other) || slaves.recognized.last() == Some(&other)
        } else {
            let ia = slaves.recognized.iter().position(|&a| a == addr_a);
            let ib = slaves.recognized.iter().position(|&a| a == addr_b);
            matches!((ia, ib), (Some(a), Some(b)) if a.abs_diff(b) == 1)
        };
        if !adjacent {
            return Err(ReturnCode::OpenRingInvalidAddr);
        }
        Ok(Self { state: OpenState::CommandLoopback, addr_a, addr_b })
    }

    pub fn step(&mut self, hal: &mut dyn Hal) -> StepOutcome {
        match &mut self.state {
            OpenState::CommandLoopback => {
                if self.addr_a != 0 {
                    let word = CDevWord(hal.s_dev(Port::P1, self.addr_a))
                        .with_topology_command(TopologyCommand::LoopbackForwardPrimary)
                        .with_topology_hs(!CDevWord(hal.s_dev(Port::P1, self.addr_a)).topology_hs());
                    hal.write_c_dev(self.addr_a, word.0);
                }
                if self.addr_b != 0 {
                    let word = CDevWord(hal.s_dev(Port::P1, self.addr_b))
                        .with_topology_command(TopologyCommand::LoopbackForwardSecondary)
                        .with_topology_hs(!CDevWord(hal.s_dev(Port::P1, self.addr_b)).topology_hs());
                    hal.write_c_dev(self.addr_b, word.0);
                }
                self.state = OpenState::VerifyHandshake(StepBudget::new(HANDSHAKE_TOGGLE_BUDGET));
                StepOutcome::in_process()
            }

            OpenState::VerifyHandshake(budget) => {
                let ok_a = self.addr_a == 0 || SDevWord(hal.s_dev(Port::P1, self.addr_a)).topology_hs();
                let ok_b = self.addr_b == 0 || SDevWord(hal.s_dev(Port::P1, self.addr_b)).topology_hs();
                if ok_a && ok_b {
                    self.state = OpenState::Done;
                    return StepOutcome::Success(ReturnCode::OpenRingOk);
                }
                if !budget.tick() {
                    // Reissue FastForward and abort (spec.md S4.4
                    // open_ring "on failure").
                    if self.addr_a != 0 {
                        hal.write_c_dev(
                            self.addr_a,
                            CDevWord::default().with_topology_command(TopologyCommand::FastForwardBothPorts).0,
                        );
                    }
                    if self.addr_b != 0 {
                        hal.write_c_dev(
                            self.addr_b,
                            CDevWord::default().with_topology_command(TopologyCommand::FastForwardBothPorts).0,
                        );
                    }
                    self.state = OpenState::Done;
                    return StepOutcome::Error(ReturnCode::OpenRingError);
                }
                StepOutcome::in_process()
            }

            OpenState::Done => StepOutcome::Success(ReturnCode::OpenRingOk),
        }
    }
}
