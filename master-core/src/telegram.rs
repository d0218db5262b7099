//! The telegram layout builder (spec.md S4 component 2, S6): allocates
//! TxRam/RxRam byte ranges per phase and records per-slave pointers.

use heapless::Vec;

use crate::config::{Config, MAX_SLAVES};
use crate::hal::RamRange;
use crate::phase::Phase;
use crate::wire::CP0_MDT_LENGTH;

/// Fixed per-MDT/AT framing overhead ahead of the per-slave area: length
/// field, sequence counter, HotPlug field (spec.md S6 "MDT (CP>=1)").
const MDT_HEADER_BYTES: u32 = 4;
const AT_HEADER_BYTES: u32 = 4;

/// Per-slave service-channel slot size (spec.md S6: "6 bytes each").
const SVC_SLOT_BYTES: u32 = 6;

/// Recorded byte offsets for one projected slave's slots within a single
/// MDT/AT pair, relative to that telegram's start (spec.md S4 "records
/// per-slave pointers into the instance state").
#[derive(Copy, Clone, Debug, Default)]
pub struct SlaveTelegramPointers {
    pub c_dev_offset: u32,
    pub s_dev_offset: u32,
    pub svc_offset: u32,
    pub connection_data_offset: u32,
    pub connection_data_len: u32,
}

/// The ranges allocated for a single MDT/AT pair.
#[derive(Copy, Clone, Debug, Default)]
pub struct TelegramRanges {
    pub mdt: RamRange,
    pub at: RamRange,
}

/// Output of one layout build: the TxRam/RxRam ranges for every MDT/AT
/// pair this phase uses, and each projected slave's pointers into
/// telegram 0 (the only telegram that carries the service channel; spec.md
/// S6 ties SVC slot index to topology index, always within the first
/// pair's capacity for this core's slave ceiling).
#[derive(Clone, Debug, Default)]
pub struct TelegramLayout {
    pub pairs: Vec<TelegramRanges, 4>,
    pub slave_pointers: Vec<SlaveTelegramPointers, MAX_SLAVES>,
    pub tx_used: u32,
    pub tx_total: u32,
    pub rx_used: u32,
    pub rx_total: u32,
}

/// Builds the telegram layout for `phase` (spec.md S4 component 2: "Given
/// (current phase, number of projected slaves, per-slave data sizes,
/// UC-channel mode, number of MDT/AT pairs), allocates byte ranges").
///
/// `tx_total`/`rx_total` are the full RAM sizes reported by the HAL; the
/// builder never exceeds them and instead returns the warning codes
/// `WarnTooFewTxRamForUcc`/`WarnTooFewRxRamForUcc` (spec.md S6).
pub fn build_layout(
    phase: Phase,
    config: &Config,
    n_slaves: usize,
    tx_total: u32,
    rx_total: u32,
) -> Result<TelegramLayout, crate::error::ReturnCode> {
    use crate::error::ReturnCode;

    let mut layout = TelegramLayout {
        tx_total,
        rx_total,
        ..Default::default()
    };

    if phase == Phase::Cp0 {
        let mdt = RamRange { offset: 0, len: CP0_MDT_LENGTH as u32 };
        let at_len = n_slaves as u32 * 2;
        let at = RamRange { offset: 0, len: at_len };
        layout.pairs.push(TelegramRanges { mdt, at }).map_err(|_| ReturnCode::SystemError)?;
        layout.tx_used = mdt.len;
        layout.rx_used = at.len;
        return finish(layout, tx_total, rx_total);
    }

    let n_pairs = config.telegram_count.n();
    let per_slave = SVC_SLOT_BYTES + config.max_slave_data_bytes as u32;
    let mdt_len = MDT_HEADER_BYTES + n_slaves as u32 * per_slave;
    let at_len = AT_HEADER_BYTES + n_slaves as u32 * per_slave;

    let mut tx_offset = 0u32;
    let mut rx_offset = 0u32;
    for _ in 0..n_pairs {
        let mdt = RamRange { offset: tx_offset, len: mdt_len };
        let at = RamRange { offset: rx_offset, len: at_len };
        layout.pairs.push(TelegramRanges { mdt, at }).map_err(|_| ReturnCode::SystemError)?;
        tx_offset += mdt_len;
        rx_offset += at_len;
    }
    layout.tx_used = tx_offset;
    layout.rx_used = rx_offset;

    for idx in 0..n_slaves {
        let base = MDT_HEADER_BYTES + idx as u32 * per_slave;
        layout
            .slave_pointers
            .push(SlaveTelegramPointers {
                c_dev_offset: base,
                s_dev_offset: AT_HEADER_BYTES + idx as u32 * per_slave,
                svc_offset: base + 2,
                connection_data_offset: base + SVC_SLOT_BYTES,
                connection_data_len: config.max_slave_data_bytes as u32,
            })
            .map_err(|_| ReturnCode::SystemError)?;
    }

    finish(layout, tx_total, rx_total)
}

fn finish(
    layout: TelegramLayout,
    tx_total: u32,
    rx_total: u32,
) -> Result<TelegramLayout, crate::error::ReturnCode> {
    use crate::error::ReturnCode;
    if layout.tx_used > tx_total {
        return Err(ReturnCode::NoRamMirrorAllocated);
    }
    if layout.rx_used > rx_total {
        return Err(ReturnCode::NoRamMirrorAllocated);
    }
    Ok(layout)
}

/// Whether the layout leaves at least one byte of headroom for the
/// non-realtime UC channel on each RAM bank (spec.md S6
/// `WarnTooFewTxRamForUcc`/`WarnTooFewRxRamForUcc`).
pub fn ucc_headroom_warnings(layout: &TelegramLayout) -> (bool, bool) {
    let tx_warn = layout.tx_used >= layout.tx_total;
    let rx_warn = layout.rx_used >= layout.rx_total;
    (tx_warn, rx_warn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn cp0_layout_covers_all_slave_slots() {
        let config = Config::default();
        let layout = build_layout(Phase::Cp0, &config, 3, 4096, 4096).unwrap();
        assert_eq!(layout.pairs.len(), 1);
        assert_eq!(layout.pairs[0].at.len, 6);
    }

    #[test]
    fn cp1_layout_allocates_one_pointer_per_slave() {
        let config = Config::default();
        let layout = build_layout(Phase::Cp1, &config, 3, 4096, 4096).unwrap();
        assert_eq!(layout.slave_pointers.len(), 3);
        assert_eq!(layout.pairs.len(), 2);
    }

    #[test]
    fn insufficient_ram_is_rejected() {
        let config = Config::default();
        let result = build_layout(Phase::Cp1, &config, 64, 16, 16);
        assert!(result.is_err());
    }
}
