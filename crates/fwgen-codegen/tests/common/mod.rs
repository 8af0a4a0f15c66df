//! Shared fixtures: in-memory donor profiles and fake sysfs trees.

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use fwgen_pci::{BarDescriptor, BarKind, BarSet, ConfigSpace, MsixInfo};
use fwgen_profile::{DonorIdentity, DonorProfile, Provenance, GENERATOR_VERSION};

pub const NIC_BDF: &str = "0000:03:00.0";

/// Minimal Intel NIC: BAR0 memory 32-bit non-prefetchable, 128 KiB, no
/// capabilities.
pub fn nic_profile() -> DonorProfile {
    let mut bars = BarSet::empty();
    bars.bars[0] = BarDescriptor {
        index: 0,
        present: true,
        kind: BarKind::Memory,
        size_bytes: 0x2_0000,
        is_64bit: false,
        is_prefetchable: false,
        consumes_next_index: false,
    };
    DonorProfile {
        identity: DonorIdentity {
            vendor_id: 0x8086,
            device_id: 0x1533,
            subsystem_vendor_id: 0x8086,
            subsystem_device_id: 0x0001,
            class_code: 0x020000,
            revision_id: 0x03,
        },
        config_space: ConfigSpace::new(nic_config_image()).unwrap(),
        capabilities: Vec::new(),
        bars,
        msix: None,
        behavior: None,
        provenance: Provenance {
            source_bdf: Some(NIC_BDF.parse().unwrap()),
            captured_at: 1_720_000_000,
            generator_version: GENERATOR_VERSION.to_string(),
            profile_duration_s: None,
        },
    }
}

/// Storage controller with MSI-X: 8 vectors, table and PBA in a 64-bit
/// prefetchable 8 KiB BAR4.
pub fn msix_profile() -> DonorProfile {
    let mut profile = nic_profile();
    profile.identity = DonorIdentity {
        vendor_id: 0x10ee,
        device_id: 0x7024,
        subsystem_vendor_id: 0x10ee,
        subsystem_device_id: 0x0007,
        class_code: 0x010802,
        revision_id: 0x02,
    };
    profile.config_space = ConfigSpace::new(msix_config_image()).unwrap();
    profile.capabilities = fwgen_pci::parse_capabilities(&profile.config_space).unwrap();
    profile.bars.bars[4] = BarDescriptor {
        index: 4,
        present: true,
        kind: BarKind::Memory,
        size_bytes: 0x2000,
        is_64bit: true,
        is_prefetchable: true,
        consumes_next_index: true,
    };
    profile.msix = Some(MsixInfo {
        num_vectors: 8,
        table_bar: 4,
        table_offset: 0,
        pba_bar: 4,
        pba_offset: 0x1000,
    });
    profile
}

pub fn nic_config_image() -> Vec<u8> {
    let mut bytes = vec![0u8; 256];
    bytes[0x00..0x02].copy_from_slice(&0x8086u16.to_le_bytes());
    bytes[0x02..0x04].copy_from_slice(&0x1533u16.to_le_bytes());
    bytes[0x08] = 0x03;
    bytes[0x0b] = 0x02;
    bytes[0x10..0x14].copy_from_slice(&0xf000_0000u32.to_le_bytes());
    bytes[0x2c..0x2e].copy_from_slice(&0x8086u16.to_le_bytes());
    bytes[0x2e..0x30].copy_from_slice(&0x0001u16.to_le_bytes());
    bytes
}

pub fn msix_config_image() -> Vec<u8> {
    let mut bytes = vec![0u8; 256];
    bytes[0x00..0x02].copy_from_slice(&0x10eeu16.to_le_bytes());
    bytes[0x02..0x04].copy_from_slice(&0x7024u16.to_le_bytes());
    bytes[0x06] = 0x10;
    bytes[0x08] = 0x02;
    bytes[0x09] = 0x02;
    bytes[0x0a] = 0x08;
    bytes[0x0b] = 0x01;
    bytes[0x20..0x24].copy_from_slice(&(0xe000_0000u32 | 0x4 | 0x8).to_le_bytes());
    bytes[0x2c..0x2e].copy_from_slice(&0x10eeu16.to_le_bytes());
    bytes[0x2e..0x30].copy_from_slice(&0x0007u16.to_le_bytes());
    bytes[0x34] = 0x70;
    // MSI-X at 0x70: table_size=7, table BAR4 @0, PBA BAR4 @0x1000.
    bytes[0x70] = 0x11;
    bytes[0x71] = 0x00;
    bytes[0x72..0x74].copy_from_slice(&7u16.to_le_bytes());
    bytes[0x74..0x78].copy_from_slice(&4u32.to_le_bytes());
    bytes[0x78..0x7c].copy_from_slice(&(0x1000u32 | 4).to_le_bytes());
    bytes
}

/// Writes a device directory under a fake sysfs root.
pub fn write_fake_device(root: &Path, bdf: &str, config: &[u8], resource_lines: &[String]) {
    let dir = root.join(bdf);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("config"), config).unwrap();
    fs::write(dir.join("resource"), resource_lines.join("\n")).unwrap();
    let vendor = u16::from_le_bytes([config[0], config[1]]);
    let device = u16::from_le_bytes([config[2], config[3]]);
    fs::write(dir.join("vendor"), format!("0x{vendor:04x}\n")).unwrap();
    fs::write(dir.join("device"), format!("0x{device:04x}\n")).unwrap();
}

pub fn empty_resource_line() -> String {
    "0x0000000000000000 0x0000000000000000 0x0000000000000000".to_string()
}

pub fn nic_resource_lines() -> Vec<String> {
    let mut lines = vec!["0x00000000f0000000 0x00000000f001ffff 0x0000000000040200".to_string()];
    lines.extend(std::iter::repeat_with(empty_resource_line).take(6));
    lines
}

pub fn msix_resource_lines() -> Vec<String> {
    let mut lines = vec![empty_resource_line(); 7];
    lines[0] = "0x00000000f0000000 0x00000000f001ffff 0x0000000000040200".to_string();
    lines[4] = "0x00000000e0000000 0x00000000e0001fff 0x0000000000142208".to_string();
    lines
}
