//! The topology recognizer (spec.md S4.1) and line-break manager (S4.2).

use heapless::Vec;

use crate::config::{ADDRESS_SCAN_STABLE_CYCLES, ADDRESS_SCAN_TIMEOUT_CYCLES, MAX_SLAVES, TOPOLOGY_STABLE_CYCLES};
use crate::error::ReturnCode;
use crate::hal::{Hal, Port, PortCycleStatus, Tgsr};
use crate::slaves::SlaveList;

ringbuf::ringbuf!(Trace, 64, Trace::None);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Trace {
    None,
    Classified(Topology),
    EdgePublished(Topology, Topology),
    AddressScanReset,
    AddressScanTimeout,
    AddressScanStable,
}

/// Wire topology (spec.md S3).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Topology {
    NoLink,
    LineP1,
    LineP2,
    Ring,
    BrokenRing,
    DefectRing(DefectSide),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DefectSide {
    Primary,
    Secondary,
}

/// Classifies the wire state into a `Topology` from the per-port telegram
/// reception booleans and link mask (spec.md S4.1 classification table).
/// Read top-to-bottom; the first matching row wins.
pub fn classify(p1: PortCycleStatus, p2: PortCycleStatus) -> Topology {
    let link1 = p1.link_up;
    let link2 = p2.link_up;

    match (
        seen_kind(p1),
        seen_kind(p2),
        link1 && link2,
        link1,
        link2,
    ) {
        (Seen::Secondary, Seen::Primary, true, _, _) => Topology::Ring,
        (Seen::Primary, Seen::Secondary, true, _, _) => Topology::BrokenRing,
        (Seen::Secondary, Seen::Secondary, true, _, _) => {
            Topology::DefectRing(DefectSide::Primary)
        }
        (Seen::Primary, Seen::Primary, true, _, _) => {
            Topology::DefectRing(DefectSide::Secondary)
        }
        (Seen::Primary, Seen::None, _, true, false) => Topology::LineP1,
        (Seen::None, Seen::Secondary, _, false, true) => Topology::LineP2,
        _ => Topology::NoLink,
    }
}

#[derive(Copy, Clone, Eq, PartialEq)]
enum Seen {
    Primary,
    Secondary,
    None,
}

fn seen_kind(p: PortCycleStatus) -> Seen {
    match (p.primary_tel_seen, p.secondary_tel_seen) {
        (true, false) => Seen::Primary,
        (false, true) => Seen::Secondary,
        _ => Seen::None,
    }
}

/// The per-port list of physically available Sercos addresses (spec.md S3
/// `SlaveAvailableList`).
#[derive(Clone, Debug, Default)]
pub struct AvailableList {
    pub addrs: Vec<u16, MAX_SLAVES>,
    pub seq_init: u16,
}

impl AvailableList {
    pub fn clear(&mut self) {
        self.addrs.clear();
    }
}

/// Address-scan sub-protocol state (spec.md S4.1 "Address-scan
/// sub-protocol", operates during the CP0 stability phase).
pub struct AddressScan {
    attempt_budget: u32,
    stable_consecutive: u32,
    last_seq: [u16; 2],
    last_topology_index: [Vec<u16, MAX_SLAVES>; 2],
    first_sample: bool,
}

impl AddressScan {
    pub fn new() -> Self {
        Self {
            attempt_budget: ADDRESS_SCAN_TIMEOUT_CYCLES,
            stable_consecutive: ADDRESS_SCAN_STABLE_CYCLES,
            last_seq: [0, 0],
            last_topology_index: [Vec::new(), Vec::new()],
            first_sample: true,
        }
    }

    /// Runs one cycle of the address-scan sub-protocol. Returns `Ok(true)`
    /// once the scan has stabilized, `Ok(false)` to keep polling, or
    /// `Err(ErrorTimeoutP0)` once the attempt budget is exhausted (spec.md
    /// S4.1 step 3, S8 "Address-scan terminates in <= 1000 cycles").
    pub fn step(
        &mut self,
        hal: &dyn Hal,
        ring_delay: &mut crate::ringdelay::RingDelayEngine,
        n_slaves: usize,
    ) -> Result<bool, ReturnCode> {
        if self.attempt_budget == 0 {
            ringbuf::ringbuf_entry!(Trace::AddressScanTimeout);
            return Err(ReturnCode::ErrorTimeoutP0);
        }
        self.attempt_budget -= 1;

        let mut reset = false;

        // Step 1: sample sequence counters on both ports.
        for (i, port) in [Port::P1, Port::P2].into_iter().enumerate() {
            let seq = hal.port_cycle_status(port).at0_seq_counter;
            if self.first_sample {
                self.last_seq[i] = seq;
            } else if seq != self.last_seq[i] {
                self.last_seq[i] = seq;
                reset = true;
            }
        }
        self.first_sample = false;

        // Step 2: topology-index words, only once sequence counters are
        // stable this cycle (so we don't walk a half-settled wire sample).
        if !reset {
            for (i, port) in [Port::P1, Port::P2].into_iter().enumerate() {
                let mut current: Vec<u16, MAX_SLAVES> = Vec::new();
                for idx in 0..n_slaves {
                    let _ = current.push(hal.topology_index(port, idx));
                }
                if current != self.last_topology_index[i] {
                    self.last_topology_index[i] = current;
                    reset = true;
                }
            }
        }

        if reset {
            ringbuf::ringbuf_entry!(Trace::AddressScanReset);
            self.stable_consecutive = ADDRESS_SCAN_STABLE_CYCLES;
            ring_delay.reset_accumulators();
            return Ok(false);
        }

        if self.stable_consecutive > 0 {
            self.stable_consecutive -= 1;
        }
        if self.stable_consecutive == 0 {
            ringbuf::ringbuf_entry!(Trace::AddressScanStable);
            return Ok(true);
        }
        Ok(false)
    }

    /// The stabilized per-port sequence counters sampled by step 1 of the
    /// address-scan sub-protocol (spec.md S4.4 step 8's consistency check).
    pub fn stable_seq(&self) -> [u16; 2] {
        self.last_seq
    }
}

impl Default for AddressScan {
    fn default() -> Self {
        Self::new()
    }
}

/// Continuously tracks the current topology, debouncing transients over
/// `TOPOLOGY_STABLE_CYCLES` consecutive cycles before publishing an edge
/// (spec.md S3 invariant, S4.1).
pub struct TopologyRecognizer {
    current: Topology,
    candidate: Topology,
    candidate_streak: u32,
    pub available: [AvailableList; 2],
    tel_err: [u32; 2],
    mst_win_err_count: u32,
}

impl TopologyRecognizer {
    pub fn new() -> Self {
        Self {
            current: Topology::NoLink,
            candidate: Topology::NoLink,
            candidate_streak: 0,
            available: [AvailableList::default(), AvailableList::default()],
            tel_err: [0, 0],
            mst_win_err_count: 0,
        }
    }

    pub fn current(&self) -> Topology {
        self.current
    }

    /// Runs one cycle: classifies the wire, debounces, and -- on a
    /// stabilized change -- returns `Some(new_topology)` so the caller can
    /// drive `on_topology_edge` (spec.md S4.1).
    pub fn step(&mut self, hal: &dyn Hal) -> Option<Topology> {
        let p1 = hal.port_cycle_status(Port::P1);
        let p2 = hal.port_cycle_status(Port::P2);
        let classified = classify(p1, p2);
        ringbuf::ringbuf_entry!(Trace::Classified(classified));

        if classified == self.candidate {
            self.candidate_streak += 1;
        } else {
            self.candidate = classified;
            self.candidate_streak = 1;
        }

        if self.candidate_streak >= TOPOLOGY_STABLE_CYCLES && self.current != self.candidate {
            let old = self.current;
            self.current = self.candidate;
            ringbuf::ringbuf_entry!(Trace::EdgePublished(old, self.current));
            Some(self.current)
        } else {
            None
        }
    }

    /// Telegram-error gate (spec.md S4.1 "Telegram-error gate"): checked
    /// before publishing a topology edge is acted on. `max_tel_err` is the
    /// consecutive-error threshold from `Config`.
    pub fn telegram_error_gate(
        &mut self,
        hal: &dyn Hal,
        topology: Topology,
        max_tel_err: u32,
    ) -> Result<(), ReturnCode> {
        let ports_required: &[Port] = match topology {
            Topology::Ring => &[Port::P1, Port::P2],
            Topology::LineP1 | Topology::DefectRing(DefectSide::Primary) => &[Port::P1],
            Topology::LineP2 | Topology::DefectRing(DefectSide::Secondary) => &[Port::P2],
            Topology::BrokenRing => &[Port::P1, Port::P2],
            Topology::NoLink => &[],
        };

        let mut any_transient = false;
        for &port in ports_required {
            let t: Tgsr = hal.tgsr(port);
            let i = port.index();

            if t.contains(Tgsr::MST_WIN_ERR) {
                // MST-window errors never increment the consecutive
                // counter (spec.md S9 open question: load-bearing
                // asymmetry for PHYs that race the cycle boundary), but the
                // call still reports the error for this cycle.
                self.mst_win_err_count = self.mst_win_err_count.saturating_add(1);
                return Err(ReturnCode::MstWindowError);
            }

            if !t.contains(Tgsr::ALL_MDT) || !t.contains(Tgsr::ALL_AT) {
                self.tel_err[i] = self.tel_err[i].saturating_add(1);
                any_transient = true;
                if self.tel_err[i] > max_tel_err {
                    return Err(ReturnCode::TelErrorOverrun);
                }
                continue;
            }
            if !t.contains(Tgsr::MST_VALID) {
                self.tel_err[i] = self.tel_err[i].saturating_add(1);
                any_transient = true;
                if self.tel_err[i] > max_tel_err {
                    return Err(ReturnCode::TelErrorOverrun);
                }
                return Err(ReturnCode::MstMiss);
            }
            self.tel_err[i] = 0;
        }

        if ports_required.is_empty() {
            return Err(ReturnCode::NoLinkAttached);
        }
        if any_transient {
            return Err(ReturnCode::NoTelegramsReceived);
        }
        Ok(())
    }

    pub fn mst_win_err_count(&self) -> u32 {
        self.mst_win_err_count
    }

    /// Rebuilds the recognized-slave list from the per-port available
    /// lists once address-scan has stabilized (spec.md S4.4 set_phase_0
    /// step 9): topology-ordered, with the port-2 segment inverted for
    /// broken ring "to preserve the order after closure".
    pub fn build_recognized_list(
        &self,
        topology: Topology,
        slaves: &mut SlaveList,
    ) -> Result<(), ReturnCode> {
        slaves.clear_recognized();
        match topology {
            Topology::Ring => {
                for &a in &self.available[0].addrs {
                    slaves.push_recognized(a)?;
                }
            }
            Topology::BrokenRing | Topology::DefectRing(_) => {
                for &a in &self.available[0].addrs {
                    slaves.push_recognized(a)?;
                }
                for &a in self.available[1].addrs.iter().rev() {
                    slaves.push_recognized(a)?;
                }
            }
            Topology::LineP1 => {
                for &a in &self.available[0].addrs {
                    slaves.push_recognized(a)?;
                }
            }
            Topology::LineP2 => {
                for &a in &self.available[1].addrs {
                    slaves.push_recognized(a)?;
                }
            }
            Topology::NoLink => {}
        }
        Ok(())
    }
}

impl Default for TopologyRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

/// The line-break manager (spec.md S4.2): on a topology transition,
/// rebuilds per-port available-slave lists and picks each slave's
/// preferred port.
pub struct LineBreakManager;

impl LineBreakManager {
    /// Recomputes `slaves.runtime[*].preferred_port` for the given
    /// topology. `slave_valid` reports S-DEV.SlaveValid for a slave on a
    /// port, used to find the break point on Ring/BrokenRing/DefectRing.
    pub fn reassign(
        topology: Topology,
        recognizer: &mut TopologyRecognizer,
        slaves: &mut SlaveList,
        slave_valid: impl Fn(Port, u16) -> bool,
    ) {
        match topology {
            Topology::Ring => {
                recognizer.available[1].addrs = recognizer.available[0].addrs.clone();
                recognizer.available[1].addrs.reverse();
                for rt in slaves.runtime.iter_mut() {
                    rt.preferred_port = Some(Port::P1);
                }
            }
            Topology::BrokenRing => {
                let last_p1 = Self::break_point(&recognizer.available[0].addrs, Port::P1, &slave_valid);
                let last_p2 = Self::break_point(&recognizer.available[1].addrs, Port::P2, &slave_valid);
                Self::assign_by_break_point(slaves, &recognizer.available, last_p1, last_p2);
            }
            Topology::DefectRing(side) => {
                // Break-point search uses the S-DEV valid bit from the
                // non-defective line only; the remaining boundary is
                // reported as the 0xFFFF sentinel (spec.md S4.2).
                let healthy_port = match side {
                    DefectSide::Primary => Port::P2,
                    DefectSide::Secondary => Port::P1,
                };
                let healthy_idx = healthy_port.index();
                let last_healthy =
                    Self::break_point(&recognizer.available[healthy_idx].addrs, healthy_port, &slave_valid);
                let (last_p1, last_p2) = match healthy_port {
                    Port::P1 => (last_healthy, 0xFFFF),
                    Port::P2 => (0xFFFF, last_healthy),
                };
                Self::assign_by_break_point(slaves, &recognizer.available, last_p1, last_p2);
            }
            Topology::LineP1 => {
                recognizer.available[1].clear();
                for rt in slaves.runtime.iter_mut() {
                    rt.preferred_port = Some(Port::P1);
                }
            }
            Topology::LineP2 => {
                recognizer.available[0].clear();
                for rt in slaves.runtime.iter_mut() {
                    rt.preferred_port = Some(Port::P2);
                }
            }
            Topology::NoLink => {
                for rt in slaves.runtime.iter_mut() {
                    rt.preferred_port = None;
                }
            }
        }
    }

    /// Scans `addrs` from the master outward until the first slave lacking
    /// SlaveValid; returns that slave's index (the last slave reachable on
    /// this port), or `addrs.len()` if every slave answered.
    fn break_point(addrs: &[u16], port: Port, slave_valid: &impl Fn(Port, u16) -> bool) -> u16 {
        for (i, &addr) in addrs.iter().enumerate() {
            if !slave_valid(port, addr) {
                return i as u16;
            }
        }
        addrs.len() as u16
    }

    fn assign_by_break_point(
        slaves: &mut SlaveList,
        available: &[AvailableList; 2],
        last_p1: u16,
        last_p2: u16,
    ) {
        for (i, &addr) in available[0].addrs.iter().enumerate() {
            if i as u16 <= last_p1 {
                if let Some(idx) = slaves.slave_index_of(addr) {
                    slaves.runtime[idx].preferred_port = Some(Port::P1);
                }
            }
        }
        for (i, &addr) in available[1].addrs.iter().enumerate() {
            if i as u16 <= last_p2 {
                if let Some(idx) = slaves.slave_index_of(addr) {
                    slaves.runtime[idx].preferred_port = Some(Port::P2);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(primary: bool, secondary: bool, link: bool) -> PortCycleStatus {
        PortCycleStatus {
            new_data: true,
            primary_tel_seen: primary,
            secondary_tel_seen: secondary,
            link_up: link,
            at0_seq_counter: 0,
        }
    }

    #[test]
    fn classifies_ring() {
        let p1 = status(false, true, true);
        let p2 = status(true, false, true);
        assert_eq!(classify(p1, p2), Topology::Ring);
    }

    #[test]
    fn classifies_broken_ring() {
        let p1 = status(true, false, true);
        let p2 = status(false, true, true);
        assert_eq!(classify(p1, p2), Topology::BrokenRing);
    }

    #[test]
    fn classifies_defect_ring_primary() {
        let p1 = status(false, true, true);
        let p2 = status(false, true, true);
        assert_eq!(classify(p1, p2), Topology::DefectRing(DefectSide::Primary));
    }

    #[test]
    fn classifies_line_p1() {
        let p1 = status(true, false, true);
        let p2 = status(false, false, false);
        assert_eq!(classify(p1, p2), Topology::LineP1);
    }

    #[test]
    fn classifies_no_link() {
        let p1 = status(false, false, false);
        let p2 = status(false, false, false);
        assert_eq!(classify(p1, p2), Topology::NoLink);
    }

    #[test]
    fn recognizer_debounces_for_100_cycles() {
        let mut r = TopologyRecognizer::new();
        struct FakeHal {
            p1: PortCycleStatus,
            p2: PortCycleStatus,
        }
        impl crate::hal::Hal for FakeHal {
            fn read16(&self, _: crate::hal::Ram, _: u32) -> u16 {
                0
            }
            fn write16(&mut self, _: crate::hal::Ram, _: u32, _: u16) {}
            fn read32(&self, _: crate::hal::Ram, _: u32) -> u32 {
                0
            }
            fn write32(&mut self, _: crate::hal::Ram, _: u32, _: u32) {}
            fn tgsr(&self, _: Port) -> Tgsr {
                Tgsr::all()
            }
            fn port_cycle_status(&self, port: Port) -> PortCycleStatus {
                match port {
                    Port::P1 => self.p1,
                    Port::P2 => self.p2,
                }
            }
            fn topology_index(&self, _: Port, _: usize) -> u16 {
                0
            }
            fn at0_address_slot(&self, _: Port, _: usize) -> u16 {
                0
            }
            fn ring_delay_counter(&self, _: Port) -> u32 {
                0
            }
            fn s_dev(&self, _: Port, _: u16) -> u16 {
                1
            }
            fn write_c_dev(&mut self, _: u16, _: u16) {}
            fn svc_status_word(&self, _: Port, _: u16) -> u16 {
                0
            }
            fn svc_control_word(&self, _: u16) -> u16 {
                0
            }
            fn write_svc_control_word(&mut self, _: u16, _: u16) {}
            fn set_dfcsr_mode(&mut self, _: crate::hal::DfcsrMode) {}
            fn write_phase_register(&mut self, _: Option<u8>) {}
            fn enable_telegrams(&mut self, _: bool) {}
            fn enable_central_timers(&mut self, _: bool) {}
            fn reset_svc_engine(&mut self) {}
            fn enable_svc_engine(&mut self, _: bool) {}
            fn cycle_count(&self) -> u64 {
                0
            }
        }

        let hal = FakeHal {
            p1: status(false, true, true),
            p2: status(true, false, true),
        };
        let mut published = None;
        for _ in 0..TOPOLOGY_STABLE_CYCLES {
            if let Some(t) = r.step(&hal) {
                published = Some(t);
            }
        }
        assert_eq!(published, Some(Topology::Ring));
    }
}
