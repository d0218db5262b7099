//! The slave-list data model (spec.md S3 `SlaveList`), plus the per-slave
//! runtime state and hot-plug sub-protocol supplement (SPEC_FULL C.5).

use heapless::Vec;

use crate::config::MAX_SLAVES;
use crate::hal::Port;

/// Per-slave activity state (spec.md S3).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Activity {
    Inactive,
    HotplugPending,
    Active,
}

/// Per-slave runtime bookkeeping that isn't part of the recognized/projected
/// address lists themselves.
#[derive(Copy, Clone, Debug)]
pub struct SlaveRuntime {
    pub activity: Activity,
    pub preferred_port: Option<Port>,
    /// Extra per-slave propagation jitter folded into ring-delay's
    /// `extraDelay` (SPEC_FULL C.3), nanoseconds.
    pub jitter_ns: u32,
    /// Capability flag: participates in SYNC delay measurement (spec.md
    /// S4.4 set_phase_3, GLOSSARY `SCP_Sync`).
    pub scp_sync: bool,
    /// Consecutive cycles S-DEV.SlaveValid has been observed, used by the
    /// hot-plug stabilization window (SPEC_FULL C.5).
    hotplug_valid_streak: u32,
}

impl Default for SlaveRuntime {
    fn default() -> Self {
        Self {
            activity: Activity::Inactive,
            preferred_port: None,
            jitter_ns: 0,
            scp_sync: true,
            hotplug_valid_streak: 0,
        }
    }
}

impl SlaveRuntime {
    /// Advances the hot-plug handshake (SPEC_FULL C.5): a hot-plugged slave
    /// moves `Inactive -> HotplugPending -> Active` only after its address
    /// is recognized, its SVC parameters are written, and S-DEV.SlaveValid
    /// has held for `HOTPLUG_STABLE_CYCLES` consecutive cycles.
    pub fn observe_hotplug_cycle(&mut self, slave_valid: bool) {
        if self.activity != Activity::HotplugPending {
            return;
        }
        if slave_valid {
            self.hotplug_valid_streak += 1;
            if self.hotplug_valid_streak >= crate::config::HOTPLUG_STABLE_CYCLES {
                self.activity = Activity::Active;
            }
        } else {
            self.hotplug_valid_streak = 0;
        }
    }
}

/// The recognized/projected slave lists and lookup tables (spec.md S3
/// `SlaveList`).
#[derive(Clone, Debug, Default)]
pub struct SlaveList {
    /// Sercos addresses found in the wire scan, in topology order.
    pub recognized: Vec<u16, MAX_SLAVES>,
    /// Addresses configured by the application.
    pub projected: Vec<u16, MAX_SLAVES>,
    pub runtime: Vec<SlaveRuntime, MAX_SLAVES>,
    /// Set when `recognized` contains a duplicate address (spec.md S3
    /// invariant: "phase progression past CP2 is forbidden").
    pub multiple_saddress: bool,
}

impl SlaveList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_projected(&mut self, addrs: &[u16]) -> Result<(), crate::error::ReturnCode> {
        use crate::error::ReturnCode;
        if addrs.len() > MAX_SLAVES {
            return Err(ReturnCode::WrongProjectedSlaveList);
        }
        self.projected.clear();
        self.runtime.clear();
        for &addr in addrs.iter() {
            if addr == 0 || addr >= 512 {
                return Err(ReturnCode::IllegalSlaveAddress);
            }
            if self.projected.contains(&addr) {
                return Err(ReturnCode::ErrorDoubleAddress);
            }
            self.projected
                .push(addr)
                .map_err(|_| ReturnCode::WrongProjectedSlaveList)?;
            self.runtime
                .push(SlaveRuntime::default())
                .map_err(|_| ReturnCode::WrongProjectedSlaveList)?;
        }
        Ok(())
    }

    /// `projected_by_sercos_address[addr]` from spec.md S3: O(1) inverse
    /// lookup giving a dense slave index.
    pub fn slave_index_of(&self, addr: u16) -> Option<usize> {
        self.projected.iter().position(|&a| a == addr)
    }

    pub fn clear_recognized(&mut self) {
        self.recognized.clear();
        self.multiple_saddress = false;
    }

    /// Appends a recognized address, flagging `multiple_saddress` if it's
    /// already present (spec.md S3 invariant).
    pub fn push_recognized(&mut self, addr: u16) -> Result<(), crate::error::ReturnCode> {
        if self.recognized.contains(&addr) {
            self.multiple_saddress = true;
        }
        self.recognized
            .push(addr)
            .map_err(|_| crate::error::ReturnCode::WrongProjectedSlaveList)
    }

    /// spec.md S3 invariant: "recognized subseteq projected after phase 1
    /// begins, unless hot-plug is enabled".
    pub fn recognized_is_subset_of_projected(&self) -> bool {
        self.recognized
            .iter()
            .all(|a| self.projected.contains(a))
    }

    pub fn active_slave_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.runtime
            .iter()
            .enumerate()
            .filter(|(_, r)| r.activity == Activity::Active)
            .map(|(i, _)| i)
    }
}

/// Sub-classification of the NRT phase (SPEC_FULL C.2), purely diagnostic.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum NrtReason {
    #[default]
    NotInitialized,
    StoppedByApplication,
    AbortedFromPhase,
}
