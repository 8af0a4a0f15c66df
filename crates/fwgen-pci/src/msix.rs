//! MSI-X geometry, cross-checked against the analyzed BARs.

use serde::{Deserialize, Serialize};

use crate::bars::BarSet;
use crate::caps::{Capability, CapabilityKind, MsixCapability, CAP_ID_MSIX};
use crate::error::PciError;

/// Validated MSI-X geometry: the table and pending-bit array each fit inside
/// their BAR and never overlap each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsixInfo {
    pub num_vectors: u16,
    pub table_bar: u8,
    pub table_offset: u32,
    pub pba_bar: u8,
    pub pba_offset: u32,
}

impl MsixInfo {
    /// The N-1 encoding written to the message-control register.
    pub fn table_size_minus_one(&self) -> u16 {
        self.num_vectors - 1
    }

    /// 16 bytes per table entry.
    pub fn table_len_bytes(&self) -> u64 {
        16 * u64::from(self.num_vectors)
    }

    /// One pending bit per vector, rounded up to a dword.
    pub fn pba_len_bytes(&self) -> u64 {
        let bytes = u64::from(self.num_vectors).div_ceil(8);
        bytes.div_ceil(4) * 4
    }
}

/// Builds [`MsixInfo`] from the parsed capability list, or `None` when the
/// donor has no MSI-X capability. A truncated MSI-X node is an error: the
/// geometry exists but cannot be trusted.
pub fn analyze_msix(caps: &[Capability], bars: &BarSet) -> Result<Option<MsixInfo>, PciError> {
    for cap in caps {
        match &cap.kind {
            CapabilityKind::Msix(msix) => return from_capability(msix, bars).map(Some),
            CapabilityKind::Truncated { id, .. } if *id == CAP_ID_MSIX => {
                return Err(PciError::TruncatedCapability {
                    offset: cap.offset,
                    id: CAP_ID_MSIX,
                });
            }
            _ => {}
        }
    }
    Ok(None)
}

/// Validates a decoded MSI-X capability against the BAR windows.
pub fn from_capability(msix: &MsixCapability, bars: &BarSet) -> Result<MsixInfo, PciError> {
    let info = MsixInfo {
        num_vectors: msix.num_vectors,
        table_bar: msix.table_bar,
        table_offset: msix.table_offset,
        pba_bar: msix.pba_bar,
        pba_offset: msix.pba_offset,
    };

    let table_size = region_bar_size(bars, msix.table_bar, "table")?;
    let table_end = u64::from(info.table_offset) + info.table_len_bytes();
    if table_end > table_size {
        return Err(PciError::MsixTableOutOfBar {
            bar: info.table_bar,
            offset: info.table_offset,
            end: table_end,
            bar_size: table_size,
        });
    }

    let pba_size = region_bar_size(bars, msix.pba_bar, "PBA")?;
    let pba_end = u64::from(info.pba_offset) + info.pba_len_bytes();
    if pba_end > pba_size {
        return Err(PciError::MsixPbaOutOfBar {
            bar: info.pba_bar,
            offset: info.pba_offset,
            end: pba_end,
            bar_size: pba_size,
        });
    }

    if info.table_bar == info.pba_bar {
        let table = u64::from(info.table_offset)..table_end;
        let pba = u64::from(info.pba_offset)..pba_end;
        if table.start < pba.end && pba.start < table.end {
            return Err(PciError::MsixOverlap {
                bar: info.table_bar,
            });
        }
    }

    Ok(info)
}

fn region_bar_size(bars: &BarSet, bar: u8, region: &str) -> Result<u64, PciError> {
    let descriptor = bars
        .get(usize::from(bar))
        .filter(|b| b.present && b.is_memory())
        .ok_or_else(|| PciError::BarInvalid {
            index: usize::from(bar),
            reason: format!("MSI-X {region} BIR points at an absent or non-memory BAR"),
        })?;
    Ok(descriptor.size_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bars::{BarDescriptor, BarKind};

    fn bars_with_memory(index: usize, size: u64) -> BarSet {
        let mut set = BarSet::empty();
        set.bars[index] = BarDescriptor {
            index,
            present: true,
            kind: BarKind::Memory,
            size_bytes: size,
            is_64bit: false,
            is_prefetchable: false,
            consumes_next_index: false,
        };
        set
    }

    fn msix_cap(num_vectors: u16, table_offset: u32, pba_offset: u32, bar: u8) -> MsixCapability {
        MsixCapability {
            table_size: num_vectors - 1,
            num_vectors,
            table_bar: bar,
            table_offset,
            pba_bar: bar,
            pba_offset,
            function_mask: false,
            enabled: false,
        }
    }

    #[test]
    fn table_and_pba_inside_bar_pass() {
        let bars = bars_with_memory(4, 0x2000);
        let info = from_capability(&msix_cap(8, 0x0, 0x1000, 4), &bars).unwrap();
        assert_eq!(info.num_vectors, 8);
        assert_eq!(info.table_len_bytes(), 128);
        assert_eq!(info.pba_len_bytes(), 4);
        assert_eq!(info.table_size_minus_one(), 7);
    }

    #[test]
    fn table_past_bar_end_fails() {
        let bars = bars_with_memory(0, 0x2000);
        let err = from_capability(&msix_cap(64, 0x4000, 0x0, 0), &bars).unwrap_err();
        assert!(matches!(
            err,
            PciError::MsixTableOutOfBar {
                bar: 0,
                offset: 0x4000,
                ..
            }
        ));
    }

    #[test]
    fn pba_past_bar_end_fails() {
        let bars = bars_with_memory(0, 0x1000);
        let err = from_capability(&msix_cap(8, 0x0, 0xfff8, 0), &bars).unwrap_err();
        assert!(matches!(err, PciError::MsixPbaOutOfBar { bar: 0, .. }));
    }

    #[test]
    fn overlapping_table_and_pba_fail() {
        let bars = bars_with_memory(2, 0x2000);
        // Table [0x0, 0x200), PBA at 0x100 lands inside it.
        let err = from_capability(&msix_cap(32, 0x0, 0x100, 2), &bars).unwrap_err();
        assert!(matches!(err, PciError::MsixOverlap { bar: 2 }));
    }

    #[test]
    fn separate_bars_never_overlap() {
        let mut bars = bars_with_memory(0, 0x1000);
        bars.bars[2] = BarDescriptor {
            index: 2,
            present: true,
            kind: BarKind::Memory,
            size_bytes: 0x1000,
            is_64bit: false,
            is_prefetchable: false,
            consumes_next_index: false,
        };
        let mut cap = msix_cap(16, 0x0, 0x0, 0);
        cap.pba_bar = 2;
        let info = from_capability(&cap, &bars).unwrap();
        assert_eq!(info.pba_bar, 2);
    }

    #[test]
    fn bir_pointing_at_absent_bar_fails() {
        let bars = BarSet::empty();
        let err = from_capability(&msix_cap(1, 0, 0x800, 3), &bars).unwrap_err();
        assert!(matches!(err, PciError::BarInvalid { index: 3, .. }));
    }

    #[test]
    fn pba_rounding_covers_partial_dwords() {
        let info = MsixInfo {
            num_vectors: 33,
            table_bar: 0,
            table_offset: 0,
            pba_bar: 0,
            pba_offset: 0,
        };
        // 33 vectors -> 5 pending bytes -> 8 after dword rounding.
        assert_eq!(info.pba_len_bytes(), 8);
    }
}
