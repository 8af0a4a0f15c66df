//! On-disk profile schema.
//!
//! The JSON form doubles as the donor-template format: every identification
//! and BAR field may be `null`, meaning "unknown, use the discovered value".
//! Unknown keys are preserved on round-trip so profiles written by newer
//! generators survive older ones.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use fwgen_pci::{
    BarDescriptor, BarKind, BarSet, Capability, ConfigSpace, ExpansionRomDescriptor, MsixInfo,
};

use crate::behavior::BehaviorProfile;
use crate::error::ProfileError;
use crate::profile::{DonorIdentity, DonorProfile, Provenance, GENERATOR_VERSION};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileDocument {
    pub metadata: Metadata,
    pub device_info: DeviceInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavioral_profile: Option<BehaviorProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcileech_optimizations: Option<Optimizations>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advanced_features: Option<AdvancedFeatures>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub generator_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_bdf: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_duration_s: Option<f32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub identification: Identification,
    pub bars: BarMap,
    /// Hex-encoded configuration-space image; absent in hand-written
    /// templates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_space: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<Capability>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msix: Option<MsixInfo>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Identification registers; `null` fields inherit the discovered value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identification {
    pub vendor_id: Option<u32>,
    pub device_id: Option<u32>,
    pub subsystem_vendor_id: Option<u32>,
    pub subsystem_device_id: Option<u32>,
    pub class_code: Option<u32>,
    pub revision_id: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BarMap {
    pub bar0: Option<BarEntry>,
    pub bar1: Option<BarEntry>,
    pub bar2: Option<BarEntry>,
    pub bar3: Option<BarEntry>,
    pub bar4: Option<BarEntry>,
    pub bar5: Option<BarEntry>,
    pub expansion_rom: Option<RomEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarEntry {
    pub enabled: bool,
    pub size: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub prefetchable: bool,
    #[serde(rename = "64bit")]
    pub is_64bit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RomEntry {
    pub enabled: bool,
    pub size: u64,
}

/// Tuning knobs that override the class-derived defaults in the render
/// context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Optimizations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_sources: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing_class: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Advanced-feature gates for the optional generated modules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvancedFeatures {
    #[serde(default)]
    pub power_management: bool,
    #[serde(default)]
    pub error_handling: bool,
    #[serde(default)]
    pub performance_counters: bool,
    #[serde(default)]
    pub clock_crossing: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProfileDocument {
    /// Serializes a profile into its canonical on-disk form.
    pub fn from_profile(profile: &DonorProfile) -> Self {
        let identity = profile.identity;
        Self {
            metadata: Metadata {
                generator_version: profile.provenance.generator_version.clone(),
                captured_at: Some(profile.provenance.captured_at),
                source_bdf: profile.provenance.source_bdf.map(|b| b.to_string()),
                profile_duration_s: profile.provenance.profile_duration_s,
                extra: Map::new(),
            },
            device_info: DeviceInfo {
                identification: Identification {
                    vendor_id: Some(identity.vendor_id.into()),
                    device_id: Some(identity.device_id.into()),
                    subsystem_vendor_id: Some(identity.subsystem_vendor_id.into()),
                    subsystem_device_id: Some(identity.subsystem_device_id.into()),
                    class_code: Some(identity.class_code),
                    revision_id: Some(identity.revision_id.into()),
                },
                bars: BarMap::from_bar_set(&profile.bars),
                config_space: Some(hex::encode(profile.config_space.bytes())),
                capabilities: Some(profile.capabilities.clone()),
                msix: profile.msix,
                extra: Map::new(),
            },
            behavioral_profile: profile.behavior.clone(),
            pcileech_optimizations: None,
            advanced_features: None,
            extra: Map::new(),
        }
    }

    /// A template with every overridable field nulled out.
    pub fn blank() -> Self {
        Self {
            metadata: Metadata {
                generator_version: GENERATOR_VERSION.to_string(),
                captured_at: None,
                source_bdf: None,
                profile_duration_s: None,
                extra: Map::new(),
            },
            device_info: DeviceInfo {
                identification: Identification::default(),
                bars: BarMap::default(),
                config_space: None,
                capabilities: None,
                msix: None,
                extra: Map::new(),
            },
            behavioral_profile: None,
            pcileech_optimizations: None,
            advanced_features: None,
            extra: Map::new(),
        }
    }

    /// Checks schema-level constraints without requiring completeness, so a
    /// sparse template validates as long as what it does say is consistent.
    pub fn validate(&self) -> Result<(), ProfileError> {
        let ident = &self.device_info.identification;
        for (field, value, max) in [
            ("vendor_id", ident.vendor_id, 0xffff),
            ("device_id", ident.device_id, 0xffff),
            ("subsystem_vendor_id", ident.subsystem_vendor_id, 0xffff),
            ("subsystem_device_id", ident.subsystem_device_id, 0xffff),
            ("class_code", ident.class_code, 0xff_ffff),
            ("revision_id", ident.revision_id, 0xff),
        ] {
            if let Some(value) = value {
                if value > max {
                    return Err(ProfileError::schema(format!(
                        "identification.{field} {value:#x} exceeds {max:#x}"
                    )));
                }
            }
        }

        for (name, entry) in self.device_info.bars.iter() {
            let Some(entry) = entry else { continue };
            if entry.kind != "memory" && entry.kind != "io" {
                return Err(ProfileError::schema(format!(
                    "{name}.type must be \"memory\" or \"io\", got \"{}\"",
                    entry.kind
                )));
            }
            if entry.enabled && !entry.size.is_power_of_two() {
                return Err(ProfileError::schema(format!(
                    "{name}.size {:#x} is not a power of two",
                    entry.size
                )));
            }
            if entry.kind == "io" && entry.prefetchable {
                return Err(ProfileError::schema(format!(
                    "{name} is an I/O window and cannot be prefetchable"
                )));
            }
        }

        if let Some(msix) = &self.device_info.msix {
            if !(1..=2048).contains(&msix.num_vectors) {
                return Err(ProfileError::schema(format!(
                    "msix.num_vectors {} outside 1..=2048",
                    msix.num_vectors
                )));
            }
            if msix.table_bar > 5 || msix.pba_bar > 5 {
                return Err(ProfileError::schema(
                    "msix BIR fields must name BAR0..BAR5",
                ));
            }
        }

        if let Some(hex_image) = &self.device_info.config_space {
            let bytes = hex::decode(hex_image)
                .map_err(|_| ProfileError::schema("config_space is not valid hex"))?;
            if bytes.len() < 64 {
                return Err(ProfileError::schema(format!(
                    "config_space holds {} bytes, expected at least 64",
                    bytes.len()
                )));
            }
        }

        Ok(())
    }

    /// Reconstructs a full [`DonorProfile`]. Fails when a required field is
    /// still null: templates must be merged over a discovered profile first.
    pub fn into_profile(self) -> Result<DonorProfile, ProfileError> {
        self.validate()?;

        let ident = &self.device_info.identification;
        let required = |field: &str, value: Option<u32>| {
            value.ok_or_else(|| {
                ProfileError::schema(format!("identification.{field} is null; not buildable"))
            })
        };
        let identity = DonorIdentity {
            vendor_id: required("vendor_id", ident.vendor_id)? as u16,
            device_id: required("device_id", ident.device_id)? as u16,
            subsystem_vendor_id: required("subsystem_vendor_id", ident.subsystem_vendor_id)? as u16,
            subsystem_device_id: required("subsystem_device_id", ident.subsystem_device_id)? as u16,
            class_code: required("class_code", ident.class_code)?,
            revision_id: required("revision_id", ident.revision_id)? as u8,
        };

        let config_space = match &self.device_info.config_space {
            Some(hex_image) => ConfigSpace::new(
                hex::decode(hex_image)
                    .map_err(|_| ProfileError::schema("config_space is not valid hex"))?,
            )?,
            None => ConfigSpace::new(synthesize_header(&identity))?,
        };

        let bars = self.device_info.bars.to_bar_set()?;
        let source_bdf = match &self.metadata.source_bdf {
            Some(text) => Some(text.parse().map_err(|_| {
                ProfileError::schema(format!("metadata.source_bdf `{text}` is malformed"))
            })?),
            None => None,
        };

        let profile = DonorProfile {
            identity,
            config_space,
            capabilities: self.device_info.capabilities.unwrap_or_default(),
            bars,
            msix: self.device_info.msix,
            behavior: self.behavioral_profile,
            provenance: Provenance {
                source_bdf,
                captured_at: self.metadata.captured_at.unwrap_or(0),
                generator_version: self.metadata.generator_version,
                profile_duration_s: self.metadata.profile_duration_s,
            },
        };
        profile.validate()?;
        Ok(profile)
    }
}

impl BarMap {
    pub fn from_bar_set(bars: &BarSet) -> Self {
        let entry = |bar: &BarDescriptor| -> Option<BarEntry> {
            if !bar.present {
                return None;
            }
            Some(BarEntry {
                enabled: true,
                size: bar.size_bytes,
                kind: match bar.kind {
                    BarKind::Io => "io".to_string(),
                    _ => "memory".to_string(),
                },
                prefetchable: bar.is_prefetchable,
                is_64bit: bar.is_64bit,
            })
        };
        Self {
            bar0: entry(&bars.bars[0]),
            bar1: entry(&bars.bars[1]),
            bar2: entry(&bars.bars[2]),
            bar3: entry(&bars.bars[3]),
            bar4: entry(&bars.bars[4]),
            bar5: entry(&bars.bars[5]),
            expansion_rom: bars.expansion_rom.map(|rom| RomEntry {
                enabled: rom.present,
                size: rom.size_bytes,
            }),
        }
    }

    pub fn to_bar_set(&self) -> Result<BarSet, ProfileError> {
        let mut set = BarSet::empty();
        for (index, (_, entry)) in self.iter().enumerate().take(6) {
            let Some(entry) = entry else { continue };
            if !entry.enabled {
                continue;
            }
            let is_memory = entry.kind == "memory";
            set.bars[index] = BarDescriptor {
                index,
                present: true,
                kind: if is_memory { BarKind::Memory } else { BarKind::Io },
                size_bytes: entry.size,
                is_64bit: entry.is_64bit && is_memory,
                is_prefetchable: entry.prefetchable && is_memory,
                consumes_next_index: entry.is_64bit && is_memory,
            };
        }
        set.expansion_rom = self.expansion_rom.as_ref().map(|rom| ExpansionRomDescriptor {
            present: rom.enabled,
            size_bytes: rom.size,
        });
        Ok(set)
    }

    fn iter(&self) -> impl Iterator<Item = (&'static str, &Option<BarEntry>)> {
        [
            ("bar0", &self.bar0),
            ("bar1", &self.bar1),
            ("bar2", &self.bar2),
            ("bar3", &self.bar3),
            ("bar4", &self.bar4),
            ("bar5", &self.bar5),
        ]
        .into_iter()
    }
}

/// Deep-merges `overlay` into `base`. Objects merge key-wise; `null` overlay
/// values are skipped (they mean "keep the discovered value"); scalars and
/// arrays replace.
pub fn overlay_document(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => overlay_document(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_slot, value) => *base_slot = value.clone(),
    }
}

/// Applies a donor template over a discovered document, returning the merged
/// document. Both sides keep their unknown keys.
pub fn merge_template(
    discovered: &ProfileDocument,
    template: &ProfileDocument,
) -> Result<ProfileDocument, ProfileError> {
    let mut base = serde_json::to_value(discovered)?;
    let overlay = serde_json::to_value(template)?;
    overlay_document(&mut base, &overlay);
    let merged: ProfileDocument = serde_json::from_value(base)?;
    merged.validate()?;
    Ok(merged)
}

/// A minimal header image for template-only builds with no captured config
/// space: identity registers populated, everything else zero.
fn synthesize_header(identity: &DonorIdentity) -> Vec<u8> {
    let mut bytes = vec![0u8; 256];
    bytes[0x00..0x02].copy_from_slice(&identity.vendor_id.to_le_bytes());
    bytes[0x02..0x04].copy_from_slice(&identity.device_id.to_le_bytes());
    bytes[0x08] = identity.revision_id;
    bytes[0x09] = (identity.class_code & 0xff) as u8;
    bytes[0x0a] = ((identity.class_code >> 8) & 0xff) as u8;
    bytes[0x0b] = ((identity.class_code >> 16) & 0xff) as u8;
    bytes[0x2c..0x2e].copy_from_slice(&identity.subsystem_vendor_id.to_le_bytes());
    bytes[0x2e..0x30].copy_from_slice(&identity.subsystem_device_id.to_le_bytes());
    bytes
}
