//! The ring-delay/timing engine (spec.md S4.3): per-port propagation
//! sampling, S-0-1015 and TSref derivation, and UC-channel window timing
//! for CP1/CP2.

use crate::config::{Config, RingDelayStrategy, UcMode, NBR_OF_RD_MEASUREMENTS};
use crate::hal::{Hal, Port};
use crate::topology::Topology;

ringbuf::ringbuf!(Trace, 32, Trace::None);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Trace {
    None,
    SampleRejectedZero(u8),
    WindowComplete,
    UnsupportedTopologyFallback,
}

/// Per-port accumulator (spec.md S3 `RingDelay`).
#[derive(Copy, Clone, Debug)]
struct PortAccumulator {
    sum: u64,
    count: u32,
    min: u32,
    max: u32,
}

impl PortAccumulator {
    fn new() -> Self {
        Self { sum: 0, count: 0, min: u32::MAX, max: 0 }
    }

    fn sample(&mut self, value: u32) {
        if value == 0 || self.count as usize >= NBR_OF_RD_MEASUREMENTS {
            return;
        }
        self.sum += value as u64;
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn average(&self) -> u32 {
        if self.count == 0 {
            0
        } else {
            (self.sum / self.count as u64) as u32
        }
    }

    fn is_full(&self) -> bool {
        self.count as usize >= NBR_OF_RD_MEASUREMENTS
    }
}

impl Default for PortAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Derived per-port ring-delay outputs (spec.md S0-1015) plus TSref.
#[derive(Copy, Clone, Debug, Default)]
pub struct RingDelayResult {
    pub tsref_ns: u32,
    pub s_0_1015_p1: u32,
    pub s_0_1015_p2: u32,
}

/// The ring-delay sampling and derivation engine (spec.md S4.3).
pub struct RingDelayEngine {
    accum: [PortAccumulator; 2],
    strategy: RingDelayStrategy,
    stable_tsref_ns: Option<u32>,
    result: RingDelayResult,
}

impl RingDelayEngine {
    pub fn new(strategy: RingDelayStrategy) -> Self {
        Self {
            accum: [PortAccumulator::new(), PortAccumulator::new()],
            strategy,
            stable_tsref_ns: None,
            result: RingDelayResult::default(),
        }
    }

    /// Zeroes the sample accumulators (spec.md S3: "Reset ... whenever
    /// address scan is restarted").
    pub fn reset_accumulators(&mut self) {
        self.accum = [PortAccumulator::new(), PortAccumulator::new()];
    }

    /// Takes one propagation sample on `port` (spec.md S4.3 "Sampling").
    /// Returns `true` once that port's window is full.
    pub fn sample(&mut self, hal: &dyn Hal, port: Port) -> bool {
        let raw = hal.ring_delay_counter(port);
        if raw == 0 {
            ringbuf::ringbuf_entry!(Trace::SampleRejectedZero(port.index() as u8));
        }
        self.accum[port.index()].sample(raw);
        let full = self.accum[port.index()].is_full();
        if full {
            ringbuf::ringbuf_entry!(Trace::WindowComplete);
        }
        full
    }

    pub fn windows_complete(&self) -> bool {
        self.accum[0].is_full() && self.accum[1].is_full()
    }

    /// Derives TSref and S-0-1015 for `topology` given the current
    /// accumulated averages and the per-slave extra delay (spec.md S4.3
    /// Strategy A/B).
    ///
    /// `extra_delay_ns` is the sum of each projected slave's jitter plus a
    /// hot-plug reserve (SPEC_FULL C.3), and `n_recognized` is the number
    /// of recognized slaves (only meaningful for ring topology's formula).
    pub fn derive(
        &mut self,
        topology: Topology,
        n_recognized: u32,
        extra_delay_ns: u32,
    ) -> RingDelayResult {
        if let (RingDelayStrategy::StableReference, Some(tsref)) =
            (self.strategy, self.stable_tsref_ns)
        {
            let (p1, p2) = self.derive_s_0_1015(topology, tsref);
            self.result = RingDelayResult { tsref_ns: tsref, s_0_1015_p1: p1, s_0_1015_p2: p2 };
            return self.result;
        }

        let avg_p1 = self.accum[0].average();
        let avg_p2 = self.accum[1].average();
        let tsref = self.compute_tsref(topology, avg_p1, avg_p2, n_recognized, extra_delay_ns);

        if self.strategy == RingDelayStrategy::StableReference && self.stable_tsref_ns.is_none() {
            self.stable_tsref_ns = Some(tsref);
        }

        let (p1, p2) = self.derive_s_0_1015(topology, tsref);
        self.result = RingDelayResult { tsref_ns: tsref, s_0_1015_p1: p1, s_0_1015_p2: p2 };
        self.result
    }

    pub fn last_result(&self) -> RingDelayResult {
        self.result
    }

    /// spec.md S4.3 "Strategy B (classic)", ring formula:
    /// `TSref = (max(avgP1, avgP2) / (n+1)) * (2n) + extraDelay/2`. Line
    /// topologies fold `extraDelay/2` onto the single active port's
    /// average; broken ring sums both averages plus `extraDelay/2`. The
    /// genuinely undefined defect-ring/unknown-topology case (spec.md S9
    /// open question) falls back to `max(avgP1, avgP2) + extraDelay/2` and
    /// is surfaced via the trace buffer as `UnsupportedTopology`, never
    /// silently.
    fn compute_tsref(
        &self,
        topology: Topology,
        avg_p1: u32,
        avg_p2: u32,
        n_recognized: u32,
        extra_delay_ns: u32,
    ) -> u32 {
        match topology {
            Topology::Ring => {
                let n = n_recognized as u64;
                let m = avg_p1.max(avg_p2) as u64;
                let tsref = (m / (n + 1)) * (2 * n) + (extra_delay_ns as u64 / 2);
                tsref as u32
            }
            Topology::LineP1 => avg_p1 + extra_delay_ns / 2,
            Topology::LineP2 => avg_p2 + extra_delay_ns / 2,
            Topology::BrokenRing => avg_p1 + avg_p2 + extra_delay_ns / 2,
            Topology::DefectRing(_) => {
                ringbuf::ringbuf_entry!(Trace::UnsupportedTopologyFallback);
                avg_p1.max(avg_p2) + extra_delay_ns / 2
            }
            Topology::NoLink => 0,
        }
    }

    /// `S-0-1015(P) = 2*TSref - avgP`, the formula given for ring in
    /// spec.md S4.3; applied uniformly per port since the per-topology
    /// TSref already folds in the topology-specific behavior.
    fn derive_s_0_1015(&self, topology: Topology, tsref: u32) -> (u32, u32) {
        let avg_p1 = self.accum[0].average();
        let avg_p2 = self.accum[1].average();
        let two_tsref = tsref.saturating_mul(2);
        match topology {
            Topology::Ring | Topology::BrokenRing | Topology::DefectRing(_) => (
                two_tsref.saturating_sub(avg_p1),
                two_tsref.saturating_sub(avg_p2),
            ),
            Topology::LineP1 => (two_tsref.saturating_sub(avg_p1), 0),
            Topology::LineP2 => (0, two_tsref.saturating_sub(avg_p2)),
            Topology::NoLink => (0, 0),
        }
    }
}

/// The UC-channel window bounds for CP1/CP2 (spec.md S4.3 "UC-channel
/// timing"), all in nanoseconds, already truncated to 250 ns multiples.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct UcWindow {
    pub t1_ns: u32,
    pub t6_ns: u32,
    pub t7_ns: u32,
}

const TRUNCATION_NS: u32 = 250;

fn truncate(value: u32) -> u32 {
    (value / TRUNCATION_NS) * TRUNCATION_NS
}

/// Per-telegram media overhead and byte time, folded into `T_block`
/// (spec.md S4.3: "T_block = N*(mediaOverhead + byteTime*(maxDataBytes +
/// IFG))"). These are physical-layer constants fixed by the 100 Mbit/s
/// Ethernet-like medium this core targets.
const MEDIA_OVERHEAD_NS: u32 = 1_000;
const BYTE_TIME_NS: u32 = 80;
const IFG_BYTES: u32 = 12;

/// Legacy fixed timing table (spec.md S4.3 "Mode fixed (legacy)"),
/// distinguished only by telegram count.
const FIXED_TWO_TEL: UcWindow = UcWindow { t1_ns: 350_000, t6_ns: 400_000, t7_ns: 950_000 };
const FIXED_FOUR_TEL: UcWindow = UcWindow { t1_ns: 700_000, t6_ns: 800_000, t7_ns: 1_950_000 };

/// Computes the per-telegram block time `T_block` (spec.md S4.3).
pub fn telegram_block_time_ns(telegram_count: u32, max_data_bytes: u16) -> u32 {
    telegram_count * (MEDIA_OVERHEAD_NS + BYTE_TIME_NS * (max_data_bytes as u32 + IFG_BYTES))
}

/// Computes the CP1/CP2 UC-channel window (spec.md S4.3).
pub fn compute_uc_window(config: &Config, cycle_time_ns: u32) -> UcWindow {
    use crate::config::MASTER_JITTER_NS as J;

    if let UcMode::Fixed = config.uc_mode {
        return match config.telegram_count {
            crate::config::TelegramCount::Two => FIXED_TWO_TEL,
            crate::config::TelegramCount::Four => FIXED_FOUR_TEL,
        };
    }

    let t_block = telegram_block_time_ns(config.telegram_count.n(), config.max_slave_data_bytes);
    let t_cyc = cycle_time_ns;

    let window = match config.uc_mode {
        UcMode::Fixed => unreachable!(),
        UcMode::Method1 => {
            let t1 = t_block + J;
            let t6 = t1 + t_block + J;
            let t7 = t_cyc.saturating_sub(J);
            UcWindow { t1_ns: t1, t6_ns: t6, t7_ns: t7 }
        }
        UcMode::Method2 => {
            let t1 = t_cyc.saturating_sub(t_block).saturating_sub(J);
            let t6 = t_block + J;
            let t7 = t1.saturating_sub(J);
            UcWindow { t1_ns: t1, t6_ns: t6, t7_ns: t7 }
        }
        UcMode::Method1Var { requested_width_ns } => {
            let t1 = t_block + J;
            let span = t_cyc.saturating_sub(J).saturating_sub(t1 + t_block + J);
            let gap = span.saturating_sub(requested_width_ns) / 2;
            let t6 = t1 + t_block + J + gap;
            let t7 = t_cyc.saturating_sub(J).saturating_sub(gap);
            UcWindow { t1_ns: t1, t6_ns: t6, t7_ns: t7 }
        }
    };

    UcWindow {
        t1_ns: truncate(window.t1_ns),
        t6_ns: truncate(window.t6_ns),
        t7_ns: truncate(window.t7_ns),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelegramCount;

    #[test]
    fn accumulator_ignores_zero_samples() {
        let mut a = PortAccumulator::new();
        a.sample(0);
        a.sample(100);
        a.sample(200);
        assert_eq!(a.count, 2);
        assert_eq!(a.average(), 150);
    }

    #[test]
    fn ring_tsref_matches_formula() {
        let mut engine = RingDelayEngine::new(RingDelayStrategy::Recomputed);
        for _ in 0..10 {
            engine.accum[0].sample(1000);
            engine.accum[1].sample(1000);
        }
        let n = 3u64;
        let extra = 200u32;
        let expected_tsref = ((1000u64 / (n + 1)) * (2 * n) + (extra as u64 / 2)) as u32;
        let result = engine.derive(Topology::Ring, 3, extra);
        assert_eq!(result.tsref_ns, expected_tsref);
        assert_eq!(result.s_0_1015_p1, 2 * expected_tsref - 1000);
    }

    #[test]
    fn stable_reference_strategy_reuses_tsref() {
        let mut engine = RingDelayEngine::new(RingDelayStrategy::StableReference);
        for _ in 0..10 {
            engine.accum[0].sample(1000);
            engine.accum[1].sample(1000);
        }
        let first = engine.derive(Topology::Ring, 3, 0);
        engine.accum[0].sample(5000);
        let second = engine.derive(Topology::Ring, 3, 0);
        assert_eq!(first.tsref_ns, second.tsref_ns);
    }

    #[test]
    fn uc_window_method1_orders_bounds_within_cycle() {
        let mut config = Config::default();
        config.uc_mode = UcMode::Method1;
        config.telegram_count = TelegramCount::Two;
        config.max_slave_data_bytes = 30;
        let w = compute_uc_window(&config, 1_000_000);
        assert!(0 < w.t1_ns && w.t1_ns < w.t6_ns && w.t6_ns < w.t7_ns && w.t7_ns < 1_000_000);
        assert_eq!(w.t1_ns % TRUNCATION_NS, 0);
        assert_eq!(w.t6_ns % TRUNCATION_NS, 0);
        assert_eq!(w.t7_ns % TRUNCATION_NS, 0);
    }

    #[test]
    fn uc_window_fixed_mode_ignores_cycle_time() {
        let mut config = Config::default();
        config.uc_mode = UcMode::Fixed;
        config.telegram_count = TelegramCount::Four;
        let w = compute_uc_window(&config, 2_000_000);
        assert_eq!(w, FIXED_FOUR_TEL);
    }
}
