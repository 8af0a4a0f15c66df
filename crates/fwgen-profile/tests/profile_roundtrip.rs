//! Lossless serialization of donor profiles, unknown capability bytes
//! included.

use pretty_assertions::assert_eq;

use fwgen_pci::{
    analyze_bars, analyze_msix, parse_capabilities, BarKind, ConfigSpace, ResourceEntry,
    ResourceFlags,
};
use fwgen_profile::schema::{merge_template, ProfileDocument};
use fwgen_profile::{DonorIdentity, DonorProfile, Provenance, GENERATOR_VERSION};

/// Config space with PM, an unknown vendor capability, and MSI-X pointing at
/// BAR4; plus matching resource windows.
fn donor_fixture() -> (ConfigSpace, Vec<ResourceEntry>) {
    let mut bytes = vec![0u8; 256];
    bytes[0x00..0x02].copy_from_slice(&0x10eeu16.to_le_bytes());
    bytes[0x02..0x04].copy_from_slice(&0x7024u16.to_le_bytes());
    bytes[0x06] = 0x10;
    bytes[0x08] = 0x02;
    bytes[0x0b] = 0x02;
    bytes[0x2c..0x2e].copy_from_slice(&0x10eeu16.to_le_bytes());
    bytes[0x2e..0x30].copy_from_slice(&0x0007u16.to_le_bytes());
    bytes[0x20..0x24].copy_from_slice(&(0xe000_0000u32 | 0x4 | 0x8).to_le_bytes());
    bytes[0x34] = 0x40;

    // PM -> unknown 0x42 -> MSI-X.
    bytes[0x40] = 0x01;
    bytes[0x41] = 0x50;
    bytes[0x42..0x44].copy_from_slice(&0x0003u16.to_le_bytes());
    bytes[0x50] = 0x42;
    bytes[0x51] = 0x60;
    bytes[0x54] = 0xa5;
    bytes[0x5b] = 0x5a;
    bytes[0x60] = 0x11;
    bytes[0x61] = 0x00;
    bytes[0x62..0x64].copy_from_slice(&7u16.to_le_bytes());
    bytes[0x64..0x68].copy_from_slice(&4u32.to_le_bytes());
    bytes[0x68..0x6c].copy_from_slice(&(0x1000u32 | 4).to_le_bytes());

    let empty = ResourceEntry {
        start: 0,
        end: 0,
        flags: ResourceFlags::empty(),
    };
    let mut resources = vec![empty; 7];
    resources[4] = ResourceEntry {
        start: 0xe000_0000,
        end: 0xe000_1fff,
        flags: ResourceFlags::MEM | ResourceFlags::MEM_64 | ResourceFlags::PREFETCH,
    };
    (ConfigSpace::new(bytes).unwrap(), resources)
}

fn assemble_profile() -> DonorProfile {
    let (config_space, resources) = donor_fixture();
    let capabilities = parse_capabilities(&config_space).unwrap();
    let bars = analyze_bars(&config_space, &resources).unwrap();
    let msix = analyze_msix(&capabilities, &bars).unwrap();
    DonorProfile {
        identity: DonorIdentity::from_config(&config_space),
        config_space,
        capabilities,
        bars,
        msix,
        behavior: None,
        provenance: Provenance {
            source_bdf: Some("0000:04:00.0".parse().unwrap()),
            captured_at: 1_720_000_000,
            generator_version: GENERATOR_VERSION.to_string(),
            profile_duration_s: None,
        },
    }
}

#[test]
fn document_round_trip_is_value_equal() {
    let profile = assemble_profile();
    let document = ProfileDocument::from_profile(&profile);
    let text = serde_json::to_string_pretty(&document).unwrap();
    let reloaded: ProfileDocument = serde_json::from_str(&text).unwrap();
    let restored = reloaded.into_profile().unwrap();
    assert_eq!(profile, restored);
}

#[test]
fn unknown_capability_bytes_survive_the_round_trip() {
    let profile = assemble_profile();
    let unknown = profile
        .capabilities
        .iter()
        .find_map(|cap| match &cap.kind {
            fwgen_pci::CapabilityKind::Unknown { id: 0x42, raw } => Some(raw.clone()),
            _ => None,
        })
        .expect("fixture carries an unknown capability");
    assert_eq!(unknown[4], 0xa5);
    assert_eq!(unknown[11], 0x5a);

    let document = ProfileDocument::from_profile(&profile);
    let text = serde_json::to_string(&document).unwrap();
    let restored = serde_json::from_str::<ProfileDocument>(&text)
        .unwrap()
        .into_profile()
        .unwrap();
    assert_eq!(profile.capabilities, restored.capabilities);
}

#[test]
fn profile_serialization_is_deterministic() {
    let profile = assemble_profile();
    let a = serde_json::to_string_pretty(&ProfileDocument::from_profile(&profile)).unwrap();
    let b = serde_json::to_string_pretty(&ProfileDocument::from_profile(&profile)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn merging_a_profile_derived_template_is_idempotent() {
    let profile = assemble_profile();
    let document = ProfileDocument::from_profile(&profile);
    let merged = merge_template(&document, &document).unwrap();
    assert_eq!(document, merged);
}

#[test]
fn template_vendor_override_flows_into_the_profile() {
    let profile = assemble_profile();
    let discovered = ProfileDocument::from_profile(&profile);

    let mut template = ProfileDocument::blank();
    template.device_info.identification.vendor_id = Some(0x8086);

    let merged = merge_template(&discovered, &template).unwrap();
    let rebuilt = merged.into_profile().unwrap();
    assert_eq!(rebuilt.identity.vendor_id, 0x8086);
    assert_eq!(rebuilt.identity.device_id, profile.identity.device_id);
    assert_eq!(rebuilt.bars.bars[4].kind, BarKind::Memory);
}
