//! The top-level `Instance` (spec.md S3): owns the HAL handle, current
//! phase, topology, slave lists, timing, and all phase-machine bookkeeping.
//! Never cloned; always passed by exclusive reference to mutating
//! operations (spec.md S3, S9 "Global mutable instance").

use crate::callback::{Event, EventCallbacks};
use crate::config::Config;
use crate::error::{ExtendedDiagnostic, ReturnCode, Result};
use crate::hal::{Hal, Port, SvcPrimitive};
use crate::phase::{
    check_phase_guard, OpenRing, Phase, RecoverRing, SetNrt, SetPhase0, SetPhase1, SetPhase2, SetPhase3, SetPhase4,
    StepOutcome,
};
use crate::ringdelay::RingDelayEngine;
use crate::slaves::SlaveList;
use crate::topology::{LineBreakManager, TopologyRecognizer};

/// Whichever resumable operation is currently in flight (spec.md S4.4:
/// "set-NRT, ring-recovery, and open-ring operations as sibling state
/// machines that share steps with the phase progression").
enum Operation {
    None,
    Nrt(SetNrt),
    Phase0(SetPhase0),
    Phase1(SetPhase1),
    Phase2(SetPhase2),
    Phase3(SetPhase3),
    Phase4(SetPhase4),
    RecoverRing(RecoverRing),
    OpenRing(OpenRing),
}

/// The bus master's communication-phase, topology and ring-delay core.
pub struct Instance<H, S, Cb> {
    hal: H,
    svc: S,
    callbacks: Cb,
    config: Config,
    phase: Phase,
    topology: TopologyRecognizer,
    slaves: SlaveList,
    ring_delay: RingDelayEngine,
    diagnostic: ExtendedDiagnostic,
    operation: Operation,
}

impl<H: Hal, S: SvcPrimitive, Cb: EventCallbacks> Instance<H, S, Cb> {
    pub fn new(hal: H, svc: S, callbacks: Cb, config: Config) -> Result<Self> {
        config.validate()?;
        let ring_delay = RingDelayEngine::new(config_strategy(&config));
        Ok(Self {
            hal,
            svc,
            callbacks,
            config,
            phase: Phase::Nrt,
            topology: TopologyRecognizer::new(),
            slaves: SlaveList::new(),
            ring_delay,
            diagnostic: ExtendedDiagnostic::new(),
            operation: Operation::None,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn topology(&self) -> crate::topology::Topology {
        self.topology.current()
    }

    pub fn diagnostic(&self) -> &ExtendedDiagnostic {
        &self.diagnostic
    }

    pub fn slaves(&self) -> &SlaveList {
        &self.slaves
    }

    pub fn slaves_mut(&mut self) -> &mut SlaveList {
        &mut self.slaves
    }

    /// spec.md S4.1: the per-cycle processing invoked from the
    /// application's task loop or ISR bottom-half, independent of whatever
    /// phase operation is in flight. Runs the telegram-error gate and
    /// topology-edge handling.
    pub fn run_cycle(&mut self) -> core::result::Result<(), ReturnCode> {
        if let Some(new_topology) = self.topology.step(&self.hal) {
            self.on_topology_edge(new_topology);
        }
        self.topology.telegram_error_gate(&self.hal, self.topology.current(), self.config.max_tel_err)
    }

    /// spec.md S4.1 "Topology-edge handling".
    fn on_topology_edge(&mut self, new_topology: crate::topology::Topology) {
        self.hal.enable_svc_engine(false);
        let hal = &self.hal;
        LineBreakManager::reassign(new_topology, &mut self.topology, &mut self.slaves, |port, addr| {
            crate::wire::SDevWord(hal.s_dev(port, addr)).slave_valid()
        });
        self.hal.enable_svc_engine(true);
        self.hal.set_dfcsr_mode(dfcsr_for(new_topology));

        let event = match new_topology {
            crate::topology::Topology::NoLink => Event::RingBreak,
            crate::topology::Topology::Ring => Event::RingClosed,
            _ => Event::RingBreak,
        };
        self.callbacks.on_event_from_isr(event);
    }

    /// spec.md S4.4 `set_nrt`.
    pub fn begin_set_nrt(&mut self) -> core::result::Result<(), ReturnCode> {
        crate::phase::nrt::guard(self.phase)?;
        let previous_was_ring = self.topology.current() == crate::topology::Topology::Ring;
        self.operation = Operation::Nrt(SetNrt::new(previous_was_ring));
        Ok(())
    }

    pub fn begin_set_phase_0(&mut self) -> core::result::Result<(), ReturnCode> {
        match check_phase_guard(self.phase, Phase::Cp0) {
            Ok(()) | Err(ReturnCode::WarningSamePhase) => {}
            Err(e) => return Err(e),
        }
        self.operation = Operation::Phase0(SetPhase0::new());
        Ok(())
    }

    pub fn begin_set_phase_1(&mut self) -> core::result::Result<(), ReturnCode> {
        check_phase_guard(self.phase, Phase::Cp1)?;
        self.operation = Operation::Phase1(SetPhase1::new());
        Ok(())
    }

    pub fn begin_set_phase_2(&mut self) -> core::result::Result<(), ReturnCode> {
        check_phase_guard(self.phase, Phase::Cp2)?;
        self.operation = Operation::Phase2(SetPhase2::new());
        Ok(())
    }

    pub fn begin_set_phase_3(&mut self) -> core::result::Result<(), ReturnCode> {
        check_phase_guard(self.phase, Phase::Cp3)?;
        self.operation = Operation::Phase3(SetPhase3::new());
        Ok(())
    }

    pub fn begin_set_phase_4(&mut self) -> core::result::Result<(), ReturnCode> {
        check_phase_guard(self.phase, Phase::Cp4)?;
        self.operation = Operation::Phase4(SetPhase4::new());
        Ok(())
    }

    pub fn begin_recover_ring(&mut self) -> core::result::Result<(), ReturnCode> {
        self.operation = Operation::RecoverRing(RecoverRing::new(self.topology.current())?);
        Ok(())
    }

    pub fn begin_open_ring(&mut self, addr_a: u16, addr_b: u16) -> core::result::Result<(), ReturnCode> {
        self.operation = Operation::OpenRing(OpenRing::new(addr_a, addr_b, &self.slaves)?);
        Ok(())
    }

    /// Advances whichever operation `begin_*` started, by exactly one step
    /// (spec.md S4.4: "each invocation advances at most one step").
    pub fn poll(&mut self) -> StepOutcome {
        let topology_current = self.topology.current();
        let n_recognized = self.slaves.recognized.len() as u32;
        let extra_delay_ns = extra_delay(&self.slaves, &self.config);

        let outcome = match &mut self.operation {
            Operation::None => return StepOutcome::Success(ReturnCode::NoError),
            Operation::Nrt(op) => op.step(&mut self.hal, &mut self.callbacks),
            Operation::Phase0(op) => op.step(
                &mut self.hal,
                &self.config,
                self.phase,
                &mut self.slaves,
                &mut self.topology,
                &mut self.ring_delay,
            ),
            Operation::Phase1(op) => op.step(
                &mut self.hal,
                &self.config,
                &mut self.slaves,
                &mut self.ring_delay,
                topology_current,
                n_recognized,
                extra_delay_ns,
                &mut self.callbacks,
            ),
            Operation::Phase2(op) => op.step(&mut self.hal, &self.config, &mut self.slaves, &mut self.diagnostic, &mut self.callbacks),
            Operation::Phase3(op) => op.step(&mut self.hal, &self.config, &mut self.slaves, &mut self.svc, &mut self.diagnostic),
            Operation::Phase4(op) => op.step(&mut self.hal, &self.config, &mut self.slaves, &mut self.svc, &mut self.diagnostic),
            Operation::RecoverRing(op) => op.step(
                &mut self.hal,
                &mut self.topology,
                &mut self.slaves,
                &mut self.ring_delay,
                n_recognized,
                extra_delay_ns,
                &mut self.svc,
                &mut self.diagnostic,
            ),
            Operation::OpenRing(op) => op.step(&mut self.hal),
        };

        if let StepOutcome::Success(_) = outcome {
            self.commit_phase_on_success();
        }
        outcome
    }

    fn commit_phase_on_success(&mut self) {
        self.phase = match &self.operation {
            Operation::Nrt(_) => Phase::Nrt,
            Operation::Phase0(_) => Phase::Cp0,
            Operation::Phase1(_) => Phase::Cp1,
            Operation::Phase2(_) => Phase::Cp2,
            Operation::Phase3(_) => Phase::Cp3,
            Operation::Phase4(_) => Phase::Cp4,
            Operation::RecoverRing(_) | Operation::OpenRing(_) | Operation::None => return,
        };
    }
}

fn config_strategy(config: &Config) -> crate::config::RingDelayStrategy {
    config.ring_delay_strategy
}

fn extra_delay(slaves: &SlaveList, config: &Config) -> u32 {
    let jitter: u32 = slaves.runtime.iter().map(|rt| rt.jitter_ns).sum();
    if config.hot_plug.enabled {
        jitter + crate::config::HOTPLUG_RESERVE_NS
    } else {
        jitter
    }
}

fn dfcsr_for(topology: crate::topology::Topology) -> crate::hal::DfcsrMode {
    use crate::hal::DfcsrMode;
    use crate::topology::Topology;
    match topology {
        Topology::Ring => DfcsrMode::RtRing,
        Topology::LineP1 => DfcsrMode::RtLineP1,
        Topology::LineP2 => DfcsrMode::RtLineP2,
        Topology::BrokenRing | Topology::DefectRing(_) => DfcsrMode::RtBoth,
        Topology::NoLink => DfcsrMode::UcLine,
    }
}
