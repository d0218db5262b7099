//! Build-/instance-time configuration: the knobs spec.md S9's design notes
//! say should be configuration rather than preprocessor flags (ring-delay
//! strategy selection, hot-plug presence), plus the constants named
//! throughout spec.md S3/S4.

use bitflags::bitflags;

/// Maximum number of slaves a single master instance can project or
/// recognize. CoSeMa builds are typically configured per-application; this
/// crate picks a fixed ceiling so `SlaveList` can live in `heapless`
/// containers with no allocator.
pub const MAX_SLAVES: usize = 64;

/// Address-scan total attempt budget (spec.md S4.1 step 3), in cycles.
pub const ADDRESS_SCAN_TIMEOUT_CYCLES: u32 = 1000;

/// Address-scan stable-consecutive requirement (spec.md S4.1 step 3 and S8).
pub const ADDRESS_SCAN_STABLE_CYCLES: u32 = 100;

/// Consecutive cycles a topology classification must repeat before the
/// recognizer publishes an edge (spec.md S3 Topology invariant, S8).
pub const TOPOLOGY_STABLE_CYCLES: u32 = 100;

/// Ring-delay sample buffer depth (spec.md S4.3).
pub const NBR_OF_RD_MEASUREMENTS: usize = 32;

/// Fixed master jitter constant `J` used in UC-channel timing (spec.md
/// S4.3), in nanoseconds.
pub const MASTER_JITTER_NS: u32 = 5_000;

/// Hot-plug stabilization window (SPEC_FULL C.5), in cycles.
pub const HOTPLUG_STABLE_CYCLES: u32 = 10;

/// Fixed hot-plug reserve folded into `extraDelay` (SPEC_FULL C.3), in
/// nanoseconds.
pub const HOTPLUG_RESERVE_NS: u32 = 1_000;

/// Default per-step timeout budget: 20 steps of 10 ms each (spec.md S4.4
/// "Failure semantics per phase").
pub const DEFAULT_STEP_TIMEOUT_STEPS: u32 = 20;
pub const DEFAULT_STEP_PERIOD_US: u32 = 10_000;

/// Default total timeout for the CP1 S-DEV.SlaveValid check (spec.md S4.4
/// set_phase_1 step 6), in milliseconds.
pub const CP1_SLAVE_VALID_TIMEOUT_MS: u32 = 200;

bitflags! {
    /// CoSeMa's `CSMD_FUNC_STATE` bitmask (SPEC_FULL C.1): optional phase
    /// behavior gated behind flags supplied at `init_hardware` time.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct RequestedFunctions: u32 {
        /// This master is a "soft master" sharing the bus with a primary
        /// master; CP0 address-scan tolerance and diagnostics are relaxed
        /// accordingly.
        const SOFT_MASTER = 1 << 0;
        /// Require and check slave-acknowledgement bits in AT0 during CP0
        /// (spec.md S4.4 set_phase_0 step 10).
        const SLAVE_ACK_CP0 = 1 << 1;
        /// Soft-master class 4 extensions (diagnostic-only in this core).
        const SOFT_MASTER_CLASS_4 = 1 << 2;
        /// Enable the fast-phase-switch bit in `CommVersion` (spec.md S3).
        const FAST_PHASE_SWITCH = 1 << 3;
    }
}

impl Default for RequestedFunctions {
    fn default() -> Self {
        RequestedFunctions::empty()
    }
}

/// Ring-delay calculation strategy (spec.md S4.3). CoSeMa selects this with
/// a preprocessor flag; spec.md S9's design notes call for a configuration
/// enum instead, so that both strategies stay testable from one build.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum RingDelayStrategy {
    /// "specification 1.3.2 stable-reference": TSref is derived once from
    /// the first successful measurement window and reused across phase
    /// progressions.
    StableReference,
    /// Classic: TSref is recomputed every phase change from freshly
    /// averaged port delays.
    #[default]
    Recomputed,
}

/// UC-channel window layout mode (spec.md S4.3).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum UcMode {
    /// Legacy compile-time constants, distinguished only by telegram count.
    #[default]
    Fixed,
    /// MDT / AT / UCC ordering.
    Method1,
    /// MDT / UCC / AT ordering.
    Method2,
    /// Centered UCC of a requested width (spec.md S4.3 Method1Var).
    Method1Var { requested_width_ns: u32 },
}

/// Number of MDT/AT telegram pairs per cycle (spec.md S3 `CommVersion`,
/// S4.3).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelegramCount {
    Two,
    Four,
}

impl TelegramCount {
    pub fn n(self) -> u32 {
        match self {
            TelegramCount::Two => 2,
            TelegramCount::Four => 4,
        }
    }
}

/// Optional hot-plug component (spec.md S9 design notes: "model it as an
/// optional component ... the phase state machine consults it only at
/// well-defined integration points").
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct HotPlugConfig {
    pub enabled: bool,
}

/// Per-application configuration supplied at instance construction.
#[derive(Clone, Debug)]
pub struct Config {
    pub requested_functions: RequestedFunctions,
    pub ring_delay_strategy: RingDelayStrategy,
    pub uc_mode: UcMode,
    pub telegram_count: TelegramCount,
    pub hot_plug: HotPlugConfig,
    /// CP0 cycle time, nanoseconds. Must be >= 1 ms and a multiple of
    /// 250 us (spec.md S3 `PhaseTiming`).
    pub cp0_cycle_time_ns: u32,
    /// CP1/CP2 cycle time, nanoseconds. Must be >= 1 ms (2 telegrams) or
    /// >= 2 ms (4 telegrams), multiple of 250 us.
    pub cp1_cp2_cycle_time_ns: u32,
    /// Consecutive-telegram-error threshold (spec.md S4.1).
    pub max_tel_err: u32,
    /// Maximum bytes of connection payload per slave, used by the telegram
    /// layout builder and the UC-channel block-time formula.
    pub max_slave_data_bytes: u16,
}

impl Config {
    pub const CYCLE_TIME_GRANULARITY_NS: u32 = 250_000;

    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::ReturnCode;
        let granular = |t: u32| t % Self::CYCLE_TIME_GRANULARITY_NS == 0;
        if self.cp0_cycle_time_ns < 1_000_000 || !granular(self.cp0_cycle_time_ns) {
            return Err(ReturnCode::InvalidSercosCycleTime);
        }
        let min_cp12 = match self.telegram_count {
            TelegramCount::Two => 1_000_000,
            TelegramCount::Four => 2_000_000,
        };
        if self.cp1_cp2_cycle_time_ns < min_cp12 || !granular(self.cp1_cp2_cycle_time_ns) {
            return Err(ReturnCode::InvalidSercosCycleTime);
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            requested_functions: RequestedFunctions::empty(),
            ring_delay_strategy: RingDelayStrategy::default(),
            uc_mode: UcMode::default(),
            telegram_count: TelegramCount::Two,
            hot_plug: HotPlugConfig::default(),
            cp0_cycle_time_ns: 1_000_000,
            cp1_cp2_cycle_time_ns: 1_000_000,
            max_tel_err: 10,
            max_slave_data_bytes: 32,
        }
    }
}
