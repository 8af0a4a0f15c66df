//! Filesystem-rooted access to donor devices.
//!
//! The reader only ever performs whole-file reads under a configurable root,
//! so tests can substitute a tree of regular files for the kernel's sysfs.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bitflags::bitflags;

use crate::bdf::Bdf;
use crate::error::PciError;

/// Environment variable overriding the base path for sysfs-style reads.
pub const SYSFS_ROOT_ENV: &str = "PCILEECH_SYSFS_ROOT";

/// Canonical Linux location of per-function PCI device nodes.
pub const DEFAULT_SYSFS_ROOT: &str = "/sys/bus/pci/devices";

bitflags! {
    /// Kernel resource flag bits as exposed in the sysfs `resource` file.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResourceFlags: u64 {
        const IO = 0x100;
        const MEM = 0x200;
        const PREFETCH = 0x2000;
        const MEM_64 = 0x0010_0000;
    }
}

/// One line of the `resource` file: a half-open-inclusive `[start, end]`
/// window plus the kernel's flag word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceEntry {
    pub start: u64,
    pub end: u64,
    pub flags: ResourceFlags,
}

impl ResourceEntry {
    /// An all-zero line means the BAR is not implemented.
    pub fn is_populated(&self) -> bool {
        !self.flags.is_empty() && self.end >= self.start && (self.start | self.end) != 0
    }

    pub fn len(&self) -> u64 {
        if self.is_populated() {
            self.end - self.start + 1
        } else {
            0
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reads donor device state from a sysfs-like tree of regular files.
#[derive(Debug, Clone)]
pub struct SysfsReader {
    root: PathBuf,
}

impl SysfsReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root from `PCILEECH_SYSFS_ROOT`, falling back to the host's PCI tree.
    pub fn from_env() -> Self {
        match std::env::var(SYSFS_ROOT_ENV) {
            Ok(root) if !root.is_empty() => Self::new(root),
            _ => Self::new(DEFAULT_SYSFS_ROOT),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn device_dir(&self, bdf: Bdf) -> PathBuf {
        self.root.join(bdf.to_string())
    }

    /// Whole-file read of the function's configuration space.
    ///
    /// The kernel exposes 256 bytes, or the full 4096 when the device has
    /// extended config space; anything under 64 is rejected outright.
    pub fn read_config(&self, bdf: Bdf) -> Result<Vec<u8>, PciError> {
        let path = self.device_dir(bdf).join("config");
        let bytes = self.read_file(bdf, &path)?;
        if bytes.len() < 64 {
            return Err(PciError::TruncatedConfigSpace { len: bytes.len() });
        }
        tracing::debug!(%bdf, len = bytes.len(), "read config space");
        Ok(bytes)
    }

    /// Parses the `resource` file: one `start end flags` hex triple per line.
    /// Lines 0..=5 describe the BARs, line 6 the expansion ROM.
    pub fn read_resource_table(&self, bdf: Bdf) -> Result<Vec<ResourceEntry>, PciError> {
        let path = self.device_dir(bdf).join("resource");
        let text = String::from_utf8_lossy(&self.read_file(bdf, &path)?).into_owned();

        let mut entries = Vec::new();
        for (line, text) in text.lines().enumerate() {
            if text.trim().is_empty() {
                continue;
            }
            let mut fields = text.split_whitespace().map(parse_hex_u64);
            let entry = match (fields.next(), fields.next(), fields.next()) {
                (Some(Some(start)), Some(Some(end)), Some(Some(flags))) => ResourceEntry {
                    start,
                    end,
                    flags: ResourceFlags::from_bits_truncate(flags),
                },
                _ => {
                    return Err(PciError::ResourceParse {
                        line,
                        text: text.to_string(),
                    })
                }
            };
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Reads the `vendor` and `device` text attributes.
    pub fn read_vendor_device(&self, bdf: Bdf) -> Result<(u16, u16), PciError> {
        let vendor = self.read_hex_attr(bdf, "vendor")?;
        let device = self.read_hex_attr(bdf, "device")?;
        Ok((vendor as u16, device as u16))
    }

    /// Enumerates every function under the root, sorted by address.
    pub fn list_devices(&self) -> Result<Vec<Bdf>, PciError> {
        let entries = fs::read_dir(&self.root).map_err(PciError::Io)?;
        let mut devices = Vec::new();
        for entry in entries {
            let entry = entry.map_err(PciError::Io)?;
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(bdf) = name.parse::<Bdf>() {
                    devices.push(bdf);
                }
            }
        }
        devices.sort();
        Ok(devices)
    }

    fn read_hex_attr(&self, bdf: Bdf, attr: &str) -> Result<u64, PciError> {
        let path = self.device_dir(bdf).join(attr);
        let bytes = self.read_file(bdf, &path)?;
        let text = String::from_utf8_lossy(&bytes);
        parse_hex_u64(text.trim()).ok_or_else(|| PciError::ResourceParse {
            line: 0,
            text: text.trim().to_string(),
        })
    }

    fn read_file(&self, bdf: Bdf, path: &Path) -> Result<Vec<u8>, PciError> {
        fs::read(path).map_err(|err| match err.kind() {
            ErrorKind::NotFound => PciError::DeviceNotFound {
                bdf,
                root: self.root.clone(),
            },
            ErrorKind::PermissionDenied => PciError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => PciError::Io(err),
        })
    }
}

fn parse_hex_u64(token: &str) -> Option<u64> {
    let token = token.strip_prefix("0x").unwrap_or(token);
    u64::from_str_radix(token, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_entry_len_and_population() {
        let populated = ResourceEntry {
            start: 0xf000_0000,
            end: 0xf001_ffff,
            flags: ResourceFlags::MEM,
        };
        assert!(populated.is_populated());
        assert_eq!(populated.len(), 0x2_0000);

        let empty = ResourceEntry {
            start: 0,
            end: 0,
            flags: ResourceFlags::empty(),
        };
        assert!(!empty.is_populated());
        assert_eq!(empty.len(), 0);
    }

    #[test]
    fn parse_hex_accepts_both_prefixes() {
        assert_eq!(parse_hex_u64("0x1f"), Some(0x1f));
        assert_eq!(parse_hex_u64("1f"), Some(0x1f));
        assert_eq!(parse_hex_u64("zz"), None);
    }
}
