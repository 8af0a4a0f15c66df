//! Capability-chain walker and per-capability decoders.
//!
//! The byte image is untrusted: both walks keep an offset-visited set and an
//! iteration bound, so a hostile or corrupted chain terminates with a
//! structured error instead of looping.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config_space::ConfigSpace;
use crate::error::PciError;

pub const CAP_ID_POWER_MANAGEMENT: u8 = 0x01;
pub const CAP_ID_MSI: u8 = 0x05;
pub const CAP_ID_VENDOR_SPECIFIC: u8 = 0x09;
pub const CAP_ID_PCI_EXPRESS: u8 = 0x10;
pub const CAP_ID_MSIX: u8 = 0x11;

pub const EXT_CAP_ID_AER: u16 = 0x0001;

/// Iteration bound for either chain. A well-formed list never gets close, so
/// reaching it means a cycle the visited set somehow missed.
pub const MAX_CAP_CHAIN_LEN: usize = 48;

/// One node of the (standard or extended) capability list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub offset: u16,
    pub next: u16,
    pub kind: CapabilityKind,
}

/// MSI-X capability registers, decoded.
///
/// `table_size` holds the raw N-1 encoding from message control; offsets have
/// the 3-bit BIR already split out and are dword-aligned by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsixCapability {
    pub table_size: u16,
    pub num_vectors: u16,
    pub table_bar: u8,
    pub table_offset: u32,
    pub pba_bar: u8,
    pub pba_offset: u32,
    pub function_mask: bool,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CapabilityKind {
    PowerManagement {
        version: u8,
        pmcsr_offset: u16,
        d1_supported: bool,
        d2_supported: bool,
        /// PME support mask for D0/D1/D2/D3hot/D3cold, bits 0..=4.
        pme_support: u8,
    },
    Msi {
        is_64bit: bool,
        /// log2 of the number of requestable vectors.
        multi_message_capable: u8,
        per_vector_masking: bool,
        enabled: bool,
    },
    Msix(MsixCapability),
    PciExpress {
        device_type: u8,
        max_payload_supported: u8,
        max_read_request: u8,
        link_speed: u8,
        link_width: u8,
        aspm_support: u8,
    },
    VendorSpecific {
        length: u8,
        raw: Vec<u8>,
    },
    Aer {
        uncorrectable_mask: u32,
        uncorrectable_severity: u32,
        correctable_mask: u32,
    },
    /// Extended capability we carry but do not interpret.
    Extended {
        id: u16,
        version: u8,
        raw: Vec<u8>,
    },
    /// Standard capability we carry but do not interpret. Raw bytes are
    /// preserved verbatim so a profile round-trips losslessly.
    Unknown {
        id: u8,
        raw: Vec<u8>,
    },
    /// The chain pointed into the image but the capability's declared span
    /// runs past the end of it.
    Truncated {
        id: u8,
        available: usize,
    },
}

impl Capability {
    pub fn msix(&self) -> Option<&MsixCapability> {
        match &self.kind {
            CapabilityKind::Msix(msix) => Some(msix),
            _ => None,
        }
    }
}

/// Walks the standard chain (0x40..0x100) and, for 4 KiB images, the extended
/// chain (0x100..), returning every node in list order.
///
/// Deterministic and side-effect free; never mutates the image, never panics
/// on malformed bytes.
pub fn parse_capabilities(cfg: &ConfigSpace) -> Result<Vec<Capability>, PciError> {
    let mut caps = Vec::new();

    if cfg.has_capability_list() {
        walk_standard(cfg, &mut caps)?;
    }
    if cfg.len() > 0x100 {
        walk_extended(cfg, &mut caps)?;
    }

    tracing::debug!(count = caps.len(), "parsed capability chain");
    Ok(caps)
}

fn walk_standard(cfg: &ConfigSpace, caps: &mut Vec<Capability>) -> Result<(), PciError> {
    let mut visited = HashSet::new();
    let mut offset = u16::from(cfg.capabilities_pointer());
    let mut steps = 0usize;

    while offset != 0 {
        steps += 1;
        if steps > MAX_CAP_CHAIN_LEN {
            return Err(PciError::CapabilityCycle { offset });
        }
        let off = usize::from(offset);
        if !(0x40..0x100).contains(&off) || off + 2 > cfg.len() {
            return Err(PciError::CapabilityOutOfRange { offset });
        }
        if !visited.insert(offset) {
            return Err(PciError::CapabilityCycle { offset });
        }

        let id = cfg.u8_at(off).unwrap_or(0);
        let next = u16::from(cfg.u8_at(off + 1).unwrap_or(0) & 0xfc);
        let kind = decode_standard(cfg, offset, id, next);
        caps.push(Capability { offset, next, kind });
        offset = next;
    }
    Ok(())
}

fn walk_extended(cfg: &ConfigSpace, caps: &mut Vec<Capability>) -> Result<(), PciError> {
    let first = match cfg.u32_at(0x100) {
        Some(dword) => dword,
        None => return Ok(()),
    };
    // All-zeros or all-ones at 0x100 means no extended list.
    if first == 0 || first == 0xffff_ffff {
        return Ok(());
    }

    let mut visited = HashSet::new();
    let mut offset = 0x100u16;
    let mut steps = 0usize;

    loop {
        steps += 1;
        if steps > MAX_CAP_CHAIN_LEN {
            return Err(PciError::CapabilityCycle { offset });
        }
        let off = usize::from(offset);
        if off < 0x100 || off + 4 > cfg.len() {
            return Err(PciError::CapabilityOutOfRange { offset });
        }
        if !visited.insert(offset) {
            return Err(PciError::CapabilityCycle { offset });
        }

        let header = cfg.u32_at(off).unwrap_or(0);
        let id = (header & 0xffff) as u16;
        let version = ((header >> 16) & 0xf) as u8;
        let next = ((header >> 20) as u16) & 0xffc;
        let kind = decode_extended(cfg, offset, id, version, next);
        caps.push(Capability { offset, next, kind });

        if next == 0 {
            return Ok(());
        }
        offset = next;
    }
}

fn decode_standard(cfg: &ConfigSpace, offset: u16, id: u8, next: u16) -> CapabilityKind {
    let off = usize::from(offset);
    match id {
        CAP_ID_POWER_MANAGEMENT => {
            let Some(pmc) = span_u16(cfg, off, 8, off + 2) else {
                return truncated(cfg, offset, id);
            };
            CapabilityKind::PowerManagement {
                version: (pmc & 0x7) as u8,
                pmcsr_offset: offset + 4,
                d1_supported: pmc & (1 << 9) != 0,
                d2_supported: pmc & (1 << 10) != 0,
                pme_support: (pmc >> 11) as u8,
            }
        }
        CAP_ID_MSI => {
            let Some(ctrl) = span_u16(cfg, off, 10, off + 2) else {
                return truncated(cfg, offset, id);
            };
            CapabilityKind::Msi {
                is_64bit: ctrl & (1 << 7) != 0,
                multi_message_capable: ((ctrl >> 1) & 0x7) as u8,
                per_vector_masking: ctrl & (1 << 8) != 0,
                enabled: ctrl & 1 != 0,
            }
        }
        CAP_ID_MSIX => {
            if cfg.slice(off, 12).is_none() {
                return truncated(cfg, offset, id);
            }
            let ctrl = cfg.u16_at(off + 2).unwrap_or(0);
            let table = cfg.u32_at(off + 4).unwrap_or(0);
            let pba = cfg.u32_at(off + 8).unwrap_or(0);
            let table_size = ctrl & 0x7ff;
            CapabilityKind::Msix(MsixCapability {
                table_size,
                num_vectors: table_size + 1,
                table_bar: (table & 0x7) as u8,
                table_offset: table & !0x7,
                pba_bar: (pba & 0x7) as u8,
                pba_offset: pba & !0x7,
                function_mask: ctrl & (1 << 14) != 0,
                enabled: ctrl & (1 << 15) != 0,
            })
        }
        CAP_ID_PCI_EXPRESS => {
            if cfg.slice(off, 16).is_none() {
                return truncated(cfg, offset, id);
            }
            let pcie_caps = cfg.u16_at(off + 2).unwrap_or(0);
            let dev_cap = cfg.u32_at(off + 4).unwrap_or(0);
            let dev_ctl = cfg.u16_at(off + 8).unwrap_or(0);
            let link_cap = cfg.u32_at(off + 0x0c).unwrap_or(0);
            CapabilityKind::PciExpress {
                device_type: ((pcie_caps >> 4) & 0xf) as u8,
                max_payload_supported: (dev_cap & 0x7) as u8,
                max_read_request: ((dev_ctl >> 12) & 0x7) as u8,
                link_speed: (link_cap & 0xf) as u8,
                link_width: ((link_cap >> 4) & 0x3f) as u8,
                aspm_support: ((link_cap >> 10) & 0x3) as u8,
            }
        }
        CAP_ID_VENDOR_SPECIFIC => {
            let Some(length) = cfg.u8_at(off + 2) else {
                return truncated(cfg, offset, id);
            };
            let length = length.max(3);
            match cfg.slice(off, usize::from(length)) {
                Some(raw) => CapabilityKind::VendorSpecific {
                    length,
                    raw: raw.to_vec(),
                },
                None => truncated(cfg, offset, id),
            }
        }
        _ => {
            let window = raw_window(offset, next, cfg.len(), 16);
            match cfg.slice(off, window) {
                Some(raw) => CapabilityKind::Unknown {
                    id,
                    raw: raw.to_vec(),
                },
                None => truncated(cfg, offset, id),
            }
        }
    }
}

fn decode_extended(
    cfg: &ConfigSpace,
    offset: u16,
    id: u16,
    version: u8,
    next: u16,
) -> CapabilityKind {
    let off = usize::from(offset);
    match id {
        EXT_CAP_ID_AER => {
            if cfg.slice(off, 0x18).is_none() {
                return truncated(cfg, offset, id as u8);
            }
            CapabilityKind::Aer {
                uncorrectable_mask: cfg.u32_at(off + 0x08).unwrap_or(0),
                uncorrectable_severity: cfg.u32_at(off + 0x0c).unwrap_or(0),
                correctable_mask: cfg.u32_at(off + 0x14).unwrap_or(0),
            }
        }
        _ => {
            let window = raw_window(offset, next, cfg.len(), 0x20);
            match cfg.slice(off, window) {
                Some(raw) => CapabilityKind::Extended {
                    id,
                    version,
                    raw: raw.to_vec(),
                },
                None => truncated(cfg, offset, id as u8),
            }
        }
    }
}

/// Bytes to preserve for an uninterpreted node: up to the next capability
/// when the list is laid out in increasing offsets, else a fixed window.
fn raw_window(offset: u16, next: u16, image_len: usize, default: usize) -> usize {
    let off = usize::from(offset);
    let window = if next > offset {
        usize::from(next - offset)
    } else {
        default
    };
    window.min(image_len.saturating_sub(off))
}

fn span_u16(cfg: &ConfigSpace, base: usize, span: usize, at: usize) -> Option<u16> {
    cfg.slice(base, span)?;
    cfg.u16_at(at)
}

fn truncated(cfg: &ConfigSpace, offset: u16, id: u8) -> CapabilityKind {
    CapabilityKind::Truncated {
        id,
        available: cfg.len().saturating_sub(usize::from(offset)),
    }
}
