//! The service-channel broadcast helper (spec.md S4.5): drives the same
//! procedure-command sequence against every active slave concurrently via
//! the externally-provided per-slave SVC primitive.

use heapless::Vec;

use crate::config::MAX_SLAVES;
use crate::error::{ExtendedDiagnostic, ReturnCode, SlaveError};
use crate::hal::{SvcPrimitive, SvcRequest, SvcStatus};

/// SVC error 0x7010 ("command already active"), swallowed per spec.md S4.5
/// because multi-axis devices legitimately report it mid-broadcast.
const SVC_ERROR_COMMAND_ALREADY_ACTIVE: u16 = 0x7010;

/// Per-slave progress through one procedure-command sub-step (spec.md S9
/// "Per-slave parallel SVC broadcast": "a vector of per-slave step states
/// advanced together").
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum SlaveStep {
    Pending,
    Submitted,
    Done,
    Errored(u16),
}

/// One stage of a procedure-command sequence: which IDN/element to write,
/// and what the expected completion status word value is (spec.md S4.4
/// set_phase_3: "wait for command-executed status 0x3").
#[derive(Copy, Clone, Debug)]
pub struct ProcedureStage {
    pub idn: u16,
    pub element: u8,
    pub write: bool,
    pub data: [u16; 2],
    /// If `Some(v)`, the stage only completes once `SvcStatus::CmdStatusValid(v)`
    /// is observed rather than any successful completion.
    pub expect_status: Option<u16>,
}

/// Drives one `ProcedureStage` across every active slave concurrently
/// (spec.md S4.5 contract).
#[derive(Debug)]
pub struct Broadcast {
    steps: Vec<SlaveStep, MAX_SLAVES>,
    slave_indices: Vec<u16, MAX_SLAVES>,
}

pub enum BroadcastOutcome {
    InProcess,
    Finished,
    /// At least one slave reached a terminal error; the extended-diagnostic
    /// list now holds every failing slave observed this call.
    Failed,
}

impl Broadcast {
    /// Starts a new broadcast against the given active slave indices
    /// (spec.md S4.5: skip slaves that aren't active).
    pub fn new(active_slave_indices: impl Iterator<Item = usize>) -> Self {
        let mut steps = Vec::new();
        let mut slave_indices = Vec::new();
        for idx in active_slave_indices {
            let _ = steps.push(SlaveStep::Pending);
            let _ = slave_indices.push(idx as u16);
        }
        Self { steps, slave_indices }
    }

    /// Advances every non-terminal slave by one SVC interaction
    /// (spec.md S4.5 "Contract per slave iteration").
    pub fn step(
        &mut self,
        svc: &mut dyn SvcPrimitive,
        stage: &ProcedureStage,
        diagnostic: &mut ExtendedDiagnostic,
    ) -> BroadcastOutcome {
        let mut any_pending = false;
        let mut any_error = false;

        for (i, slave_step) in self.steps.iter_mut().enumerate() {
            let slave_idx = self.slave_indices[i];
            match *slave_step {
                SlaveStep::Done | SlaveStep::Errored(_) => continue,
                SlaveStep::Pending => {
                    if svc.mbusy(slave_idx) {
                        let req = SvcRequest {
                            slave_idx,
                            idn: stage.idn,
                            element: stage.element,
                            write: stage.write,
                            data: stage.data,
                            priority: 0,
                        };
                        match svc.submit(req) {
                            Ok(()) => {
                                *slave_step = SlaveStep::Submitted;
                                any_pending = true;
                            }
                            Err(SVC_ERROR_COMMAND_ALREADY_ACTIVE) => {
                                any_pending = true;
                            }
                            Err(code) => {
                                *slave_step = SlaveStep::Errored(code);
                                diagnostic.push(SlaveError { slave_idx, idn: stage.idn, code });
                                any_error = true;
                            }
                        }
                    } else {
                        any_pending = true;
                    }
                }
                SlaveStep::Submitted => match svc.status(slave_idx) {
                    SvcStatus::CmdStatusValid(v) => {
                        let satisfied = stage.expect_status.map_or(true, |want| want == v);
                        if satisfied {
                            *slave_step = SlaveStep::Done;
                        } else {
                            any_pending = true;
                        }
                    }
                    SvcStatus::CmdActive => any_pending = true,
                    SvcStatus::CmdCleared => *slave_step = SlaveStep::Done,
                    SvcStatus::RequestError(code) => {
                        *slave_step = SlaveStep::Errored(code);
                        diagnostic.push(SlaveError { slave_idx, idn: stage.idn, code });
                        any_error = true;
                    }
                },
            }
        }

        if any_error {
            BroadcastOutcome::Failed
        } else if any_pending {
            BroadcastOutcome::InProcess
        } else {
            BroadcastOutcome::Finished
        }
    }

    pub fn first_error(&self) -> Option<u16> {
        self.steps.iter().find_map(|s| match s {
            SlaveStep::Errored(code) => Some(*code),
            _ => None,
        })
    }
}

/// The four-stage Clear/Set/SetCheck/ClearAgain procedure-command sequence
/// (spec.md S4.4 set_phase_3, reused for S-0-1024, S-0-0127, S-0-0128).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProcedureState {
    ClearCmd,
    SetCmd,
    SetCheck,
    ClearCmdAgain,
    Done,
}

/// Runs a full procedure command (all four stages) against the given
/// active slaves, one `Broadcast` per stage. Returns `Ok(())` once
/// `ClearCmdAgain` completes, or the appropriate terminal error code with
/// `diagnostic` populated (spec.md S4.4, S7 "terminal error").
#[derive(Debug)]
pub struct ProcedureCommand {
    pub state: ProcedureState,
    idn: u16,
    current: Option<Broadcast>,
}

impl ProcedureCommand {
    pub fn new(idn: u16) -> Self {
        Self { state: ProcedureState::ClearCmd, idn, current: None }
    }

    pub fn step(
        &mut self,
        svc: &mut dyn SvcPrimitive,
        active_slave_indices: impl Iterator<Item = usize> + Clone,
        diagnostic: &mut ExtendedDiagnostic,
        error_code: ReturnCode,
    ) -> Result<bool, ReturnCode> {
        let broadcast = self
            .current
            .get_or_insert_with(|| Broadcast::new(active_slave_indices.clone()));

        let stage = match self.state {
            ProcedureState::ClearCmd => {
                ProcedureStage { idn: self.idn, element: 7, write: true, data: [0, 0], expect_status: None }
            }
            ProcedureState::SetCmd => {
                ProcedureStage { idn: self.idn, element: 7, write: true, data: [1, 0], expect_status: None }
            }
            ProcedureState::SetCheck => ProcedureStage {
                idn: self.idn,
                element: 7,
                write: false,
                data: [0, 0],
                expect_status: Some(0x3),
            },
            ProcedureState::ClearCmdAgain => {
                ProcedureStage { idn: self.idn, element: 7, write: true, data: [0, 0], expect_status: None }
            }
            ProcedureState::Done => return Ok(true),
        };

        match broadcast.step(svc, &stage, diagnostic) {
            BroadcastOutcome::InProcess => Ok(false),
            BroadcastOutcome::Failed => {
                self.state = ProcedureState::Done;
                Err(error_code)
            }
            BroadcastOutcome::Finished => {
                self.current = None;
                self.state = match self.state {
                    ProcedureState::ClearCmd => ProcedureState::SetCmd,
                    ProcedureState::SetCmd => ProcedureState::SetCheck,
                    ProcedureState::SetCheck => ProcedureState::ClearCmdAgain,
                    ProcedureState::ClearCmdAgain => ProcedureState::Done,
                    ProcedureState::Done => ProcedureState::Done,
                };
                Ok(self.state == ProcedureState::Done)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeSvc {
        statuses: HashMap<u16, SvcStatus>,
    }

    impl SvcPrimitive for FakeSvc {
        fn mbusy(&self, _slave_idx: u16) -> bool {
            true
        }
        fn status(&self, slave_idx: u16) -> SvcStatus {
            *self.statuses.get(&slave_idx).unwrap_or(&SvcStatus::CmdCleared)
        }
        fn submit(&mut self, req: SvcRequest) -> Result<(), u16> {
            self.statuses.insert(req.slave_idx, SvcStatus::CmdStatusValid(0x3));
            Ok(())
        }
    }

    #[test]
    fn broadcast_finishes_when_all_slaves_done() {
        let mut svc = FakeSvc { statuses: HashMap::new() };
        let mut diag = ExtendedDiagnostic::new();
        let mut b = Broadcast::new([0usize, 1usize].into_iter());
        let stage = ProcedureStage { idn: 40, element: 7, write: true, data: [0, 0], expect_status: None };
        let _ = b.step(&mut svc, &stage, &mut diag);
        let outcome = b.step(&mut svc, &stage, &mut diag);
        assert!(matches!(outcome, BroadcastOutcome::Finished));
    }

    #[test]
    fn broadcast_swallows_command_already_active() {
        struct AlwaysBusySvc;
        impl SvcPrimitive for AlwaysBusySvc {
            fn mbusy(&self, _: u16) -> bool {
                true
            }
            fn status(&self, _: u16) -> SvcStatus {
                SvcStatus::CmdCleared
            }
            fn submit(&mut self, _: SvcRequest) -> Result<(), u16> {
                Err(SVC_ERROR_COMMAND_ALREADY_ACTIVE)
            }
        }
        let mut svc = AlwaysBusySvc;
        let mut diag = ExtendedDiagnostic::new();
        let mut b = Broadcast::new([0usize].into_iter());
        let stage = ProcedureStage { idn: 40, element: 7, write: true, data: [0, 0], expect_status: None };
        let outcome = b.step(&mut svc, &stage, &mut diag);
        assert!(matches!(outcome, BroadcastOutcome::InProcess));
        assert!(diag.is_empty());
    }
}
