//! Donor extraction against a fake sysfs tree of regular files.

use std::fs;
use std::path::Path;

use fwgen_pci::{
    analyze_bars, analyze_msix, parse_capabilities, Bdf, ConfigSpace, PciError, SysfsReader,
};
use tempfile::tempdir;

const BDF: &str = "0000:03:00.0";

/// Minimal Intel I210-alike: one 128 KiB 32-bit memory BAR, no capabilities.
fn nic_config_image() -> Vec<u8> {
    let mut bytes = vec![0u8; 256];
    bytes[0x00..0x02].copy_from_slice(&0x8086u16.to_le_bytes());
    bytes[0x02..0x04].copy_from_slice(&0x1533u16.to_le_bytes());
    bytes[0x08] = 0x03;
    bytes[0x0b] = 0x02; // network controller
    bytes[0x10..0x14].copy_from_slice(&0xf000_0000u32.to_le_bytes());
    bytes[0x2c..0x2e].copy_from_slice(&0x8086u16.to_le_bytes());
    bytes[0x2e..0x30].copy_from_slice(&0x0001u16.to_le_bytes());
    bytes
}

fn write_device(root: &Path, bdf: &str, config: &[u8], resource: &str) {
    let dir = root.join(bdf);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("config"), config).unwrap();
    fs::write(dir.join("resource"), resource).unwrap();
    let vendor = u16::from_le_bytes([config[0], config[1]]);
    let device = u16::from_le_bytes([config[2], config[3]]);
    fs::write(dir.join("vendor"), format!("0x{vendor:04x}\n")).unwrap();
    fs::write(dir.join("device"), format!("0x{device:04x}\n")).unwrap();
}

fn nic_resource_table() -> String {
    let mut lines = vec![
        "0x00000000f0000000 0x00000000f001ffff 0x0000000000040200".to_string(),
    ];
    for _ in 0..6 {
        lines.push("0x0000000000000000 0x0000000000000000 0x0000000000000000".to_string());
    }
    lines.join("\n")
}

#[test]
fn reads_and_parses_a_minimal_nic() {
    let dir = tempdir().unwrap();
    write_device(dir.path(), BDF, &nic_config_image(), &nic_resource_table());

    let reader = SysfsReader::new(dir.path());
    let bdf: Bdf = BDF.parse().unwrap();

    let (vendor, device) = reader.read_vendor_device(bdf).unwrap();
    assert_eq!((vendor, device), (0x8086, 0x1533));

    let cfg = ConfigSpace::new(reader.read_config(bdf).unwrap()).unwrap();
    assert_eq!(cfg.vendor_id(), 0x8086);
    assert_eq!(cfg.class_code(), 0x020000);

    let resources = reader.read_resource_table(bdf).unwrap();
    let bars = analyze_bars(&cfg, &resources).unwrap();
    assert!(bars.bars[0].present);
    assert_eq!(bars.bars[0].size_bytes, 0x2_0000);
    assert!(!bars.bars[0].is_64bit);
    assert!(!bars.bars[0].is_prefetchable);

    let caps = parse_capabilities(&cfg).unwrap();
    assert!(caps.is_empty());
    assert_eq!(analyze_msix(&caps, &bars).unwrap(), None);
}

#[test]
fn msix_device_extracts_full_geometry() {
    // MSI-X at 0x70: table_size=7, table in BAR4 @0x0, PBA in BAR4 @0x1000;
    // BAR4 is 64-bit prefetchable memory, 8 KiB.
    let mut config = nic_config_image();
    config[0x06] = 0x10;
    config[0x34] = 0x70;
    config[0x70] = 0x11;
    config[0x71] = 0x00;
    config[0x72..0x74].copy_from_slice(&7u16.to_le_bytes());
    config[0x74..0x78].copy_from_slice(&4u32.to_le_bytes());
    config[0x78..0x7c].copy_from_slice(&(0x1000u32 | 4).to_le_bytes());
    config[0x20..0x24].copy_from_slice(&(0xe000_0000u32 | 0x4 | 0x8).to_le_bytes());

    let mut lines: Vec<String> = Vec::new();
    lines.push("0x00000000f0000000 0x00000000f001ffff 0x0000000000040200".into());
    for _ in 1..4 {
        lines.push("0x0000000000000000 0x0000000000000000 0x0000000000000000".into());
    }
    lines.push("0x00000000e0000000 0x00000000e0001fff 0x0000000000142208".into());
    for _ in 5..7 {
        lines.push("0x0000000000000000 0x0000000000000000 0x0000000000000000".into());
    }

    let dir = tempdir().unwrap();
    write_device(dir.path(), BDF, &config, &lines.join("\n"));

    let reader = SysfsReader::new(dir.path());
    let bdf: Bdf = BDF.parse().unwrap();
    let cfg = ConfigSpace::new(reader.read_config(bdf).unwrap()).unwrap();
    let resources = reader.read_resource_table(bdf).unwrap();
    let bars = analyze_bars(&cfg, &resources).unwrap();

    assert!(bars.bars[4].present && bars.bars[4].is_64bit);
    assert_eq!(bars.bars[4].size_bytes, 0x2000);
    assert!(!bars.bars[5].present);

    let caps = parse_capabilities(&cfg).unwrap();
    let msix = analyze_msix(&caps, &bars).unwrap().expect("MSI-X geometry");
    assert_eq!(msix.num_vectors, 8);
    assert_eq!(msix.table_bar, 4);
    assert_eq!(msix.table_offset, 0);
    assert_eq!(msix.pba_bar, 4);
    assert_eq!(msix.pba_offset, 0x1000);
}

#[test]
fn missing_device_is_device_not_found() {
    let dir = tempdir().unwrap();
    let reader = SysfsReader::new(dir.path());
    let bdf: Bdf = "0000:00:1f.3".parse().unwrap();
    let err = reader.read_config(bdf).unwrap_err();
    assert!(matches!(err, PciError::DeviceNotFound { .. }));
}

#[test]
fn list_devices_enumerates_sorted_functions() {
    let dir = tempdir().unwrap();
    for bdf in ["0000:03:00.0", "0000:00:1f.3", "0000:01:00.0"] {
        write_device(dir.path(), bdf, &nic_config_image(), &nic_resource_table());
    }
    // Non-BDF entries are ignored.
    fs::create_dir(dir.path().join("rescan")).unwrap();

    let reader = SysfsReader::new(dir.path());
    let devices = reader.list_devices().unwrap();
    let names: Vec<String> = devices.iter().map(|b| b.to_string()).collect();
    assert_eq!(names, ["0000:00:1f.3", "0000:01:00.0", "0000:03:00.0"]);
}

#[test]
fn garbled_resource_line_is_a_parse_error() {
    let dir = tempdir().unwrap();
    write_device(dir.path(), BDF, &nic_config_image(), "0xf0000000 junk 0x200");
    let reader = SysfsReader::new(dir.path());
    let err = reader
        .read_resource_table(BDF.parse().unwrap())
        .unwrap_err();
    assert!(matches!(err, PciError::ResourceParse { line: 0, .. }));
}
