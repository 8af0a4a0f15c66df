use std::path::PathBuf;

use crate::bdf::Bdf;

/// Errors surfaced while locating or decoding a donor device.
#[derive(Debug, thiserror::Error)]
pub enum PciError {
    #[error("malformed BDF address `{input}` (expected DDDD:BB:DD.F)")]
    MalformedBdf { input: String },

    #[error("no device at {bdf} under {root}")]
    DeviceNotFound { bdf: Bdf, root: PathBuf },

    #[error("permission denied reading {path}")]
    PermissionDenied { path: PathBuf },

    #[error("config space is {len} bytes, expected at least 64")]
    TruncatedConfigSpace { len: usize },

    #[error("capability chain revisits offset {offset:#04x}")]
    CapabilityCycle { offset: u16 },

    #[error("capability pointer {offset:#04x} outside the valid window")]
    CapabilityOutOfRange { offset: u16 },

    #[error("capability at {offset:#04x} (id {id:#04x}) shorter than its declared span")]
    TruncatedCapability { offset: u16, id: u8 },

    #[error("BAR{index} invalid: {reason}")]
    BarInvalid { index: usize, reason: String },

    #[error("MSI-X table [{offset:#x}..{end:#x}) exceeds BAR{bar} size {bar_size:#x}")]
    MsixTableOutOfBar {
        bar: u8,
        offset: u32,
        end: u64,
        bar_size: u64,
    },

    #[error("MSI-X PBA [{offset:#x}..{end:#x}) exceeds BAR{bar} size {bar_size:#x}")]
    MsixPbaOutOfBar {
        bar: u8,
        offset: u32,
        end: u64,
        bar_size: u64,
    },

    #[error("MSI-X table and PBA overlap in BAR{bar}")]
    MsixOverlap { bar: u8 },

    #[error("malformed resource table line {line}: `{text}`")]
    ResourceParse { line: usize, text: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
