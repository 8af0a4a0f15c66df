//! BAR classification and sizing.
//!
//! Type comes from the header dwords (0x10..0x27), size from the sysfs
//! resource windows; the two sources are cross-checked against each other.

use serde::{Deserialize, Serialize};

use crate::config_space::ConfigSpace;
use crate::error::PciError;
use crate::sysfs::{ResourceEntry, ResourceFlags};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarKind {
    None,
    Memory,
    Io,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarDescriptor {
    pub index: usize,
    pub present: bool,
    pub kind: BarKind,
    pub size_bytes: u64,
    pub is_64bit: bool,
    pub is_prefetchable: bool,
    /// Set on a 64-bit BAR whose sibling at `index + 1` is the upper half.
    pub consumes_next_index: bool,
}

impl BarDescriptor {
    pub fn absent(index: usize) -> Self {
        Self {
            index,
            present: false,
            kind: BarKind::None,
            size_bytes: 0,
            is_64bit: false,
            is_prefetchable: false,
            consumes_next_index: false,
        }
    }

    pub fn is_memory(&self) -> bool {
        self.kind == BarKind::Memory
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpansionRomDescriptor {
    pub present: bool,
    pub size_bytes: u64,
}

/// The six analyzed BARs plus the expansion ROM window, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarSet {
    pub bars: [BarDescriptor; 6],
    pub expansion_rom: Option<ExpansionRomDescriptor>,
}

impl BarSet {
    pub fn empty() -> Self {
        Self {
            bars: std::array::from_fn(BarDescriptor::absent),
            expansion_rom: None,
        }
    }

    pub fn get(&self, index: usize) -> Option<&BarDescriptor> {
        self.bars.get(index)
    }
}

/// Classifies and sizes BAR0..BAR5 and the expansion ROM.
pub fn analyze_bars(cfg: &ConfigSpace, resources: &[ResourceEntry]) -> Result<BarSet, PciError> {
    let mut set = BarSet::empty();
    let mut num_64bit = 0usize;
    let mut index = 0usize;

    while index < 6 {
        let dword = cfg.bar_dword(index);
        let resource = match resources.get(index) {
            Some(resource) if resource.is_populated() => *resource,
            _ => {
                set.bars[index] = BarDescriptor::absent(index);
                index += 1;
                continue;
            }
        };
        let size_bytes = resource.len().next_power_of_two();

        if dword & 0x1 != 0 {
            // I/O space.
            if resource.flags.contains(ResourceFlags::PREFETCH) {
                return Err(PciError::BarInvalid {
                    index,
                    reason: "I/O BAR marked prefetchable".into(),
                });
            }
            if resource.flags.contains(ResourceFlags::MEM) {
                return Err(PciError::BarInvalid {
                    index,
                    reason: "I/O BAR backed by a memory resource".into(),
                });
            }
            set.bars[index] = BarDescriptor {
                index,
                present: true,
                kind: BarKind::Io,
                size_bytes,
                is_64bit: false,
                is_prefetchable: false,
                consumes_next_index: false,
            };
            index += 1;
            continue;
        }

        // Memory space: bits 2:1 select 32-bit (00) or 64-bit (10).
        if resource.flags.contains(ResourceFlags::IO) {
            return Err(PciError::BarInvalid {
                index,
                reason: "memory BAR backed by an I/O resource".into(),
            });
        }
        let mem_type = (dword >> 1) & 0x3;
        let is_64bit = match mem_type {
            0b00 => false,
            0b10 => true,
            other => {
                return Err(PciError::BarInvalid {
                    index,
                    reason: format!("reserved memory BAR type {other:#04b}"),
                });
            }
        };
        let is_prefetchable = dword & 0x8 != 0;

        if is_64bit {
            if index == 5 {
                return Err(PciError::BarInvalid {
                    index,
                    reason: "64-bit BAR at index 5 has no upper half".into(),
                });
            }
            num_64bit += 1;
            if num_64bit > 3 {
                return Err(PciError::BarInvalid {
                    index,
                    reason: "more than three 64-bit BARs".into(),
                });
            }
        } else if size_bytes > u64::from(u32::MAX) + 1 {
            return Err(PciError::BarInvalid {
                index,
                reason: format!("32-bit memory BAR sized {size_bytes:#x}"),
            });
        }

        set.bars[index] = BarDescriptor {
            index,
            present: true,
            kind: BarKind::Memory,
            size_bytes,
            is_64bit,
            is_prefetchable,
            consumes_next_index: is_64bit,
        };
        if is_64bit {
            // The sibling holds the upper address dword; it stays absent.
            set.bars[index + 1] = BarDescriptor::absent(index + 1);
            index += 2;
        } else {
            index += 1;
        }
    }

    set.expansion_rom = resources.get(6).map(|rom| ExpansionRomDescriptor {
        present: rom.is_populated(),
        size_bytes: if rom.is_populated() {
            rom.len().next_power_of_two()
        } else {
            0
        },
    });

    Ok(set)
}
