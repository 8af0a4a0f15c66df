use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use fwgen_pci::{BarSet, Bdf, Capability, ConfigSpace, MsixInfo};

use crate::behavior::BehaviorProfile;
use crate::error::ProfileError;

/// Version string stamped into provenance headers and `donor_info.json`.
pub const GENERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The identity registers a host uses to match drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonorIdentity {
    pub vendor_id: u16,
    pub device_id: u16,
    pub subsystem_vendor_id: u16,
    pub subsystem_device_id: u16,
    /// 24-bit class code (base, sub, prog-if).
    pub class_code: u32,
    pub revision_id: u8,
}

impl DonorIdentity {
    pub fn from_config(cfg: &ConfigSpace) -> Self {
        Self {
            vendor_id: cfg.vendor_id(),
            device_id: cfg.device_id(),
            subsystem_vendor_id: cfg.subsystem_vendor_id(),
            subsystem_device_id: cfg.subsystem_id(),
            class_code: cfg.class_code(),
            revision_id: cfg.revision_id(),
        }
    }

    /// Short content hash of the identity registers, stamped into every
    /// generated file's provenance banner.
    pub fn signature_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.vendor_id.to_le_bytes());
        hasher.update(self.device_id.to_le_bytes());
        hasher.update(self.subsystem_vendor_id.to_le_bytes());
        hasher.update(self.subsystem_device_id.to_le_bytes());
        hasher.update(self.class_code.to_le_bytes());
        hasher.update([self.revision_id]);
        let digest = hasher.finalize();
        hex::encode(&digest[..8])
    }
}

/// Where a profile came from and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_bdf: Option<Bdf>,
    /// Seconds since the Unix epoch, captured once at extraction time.
    pub captured_at: u64,
    pub generator_version: String,
    pub profile_duration_s: Option<f32>,
}

/// Canonical description of a donor device. Immutable once assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonorProfile {
    pub identity: DonorIdentity,
    pub config_space: ConfigSpace,
    pub capabilities: Vec<Capability>,
    pub bars: BarSet,
    pub msix: Option<MsixInfo>,
    pub behavior: Option<BehaviorProfile>,
    pub provenance: Provenance,
}

impl DonorProfile {
    /// Re-checks the structural invariants a build depends on. Profiles from
    /// extraction already satisfy these; profiles from disk may not.
    pub fn validate(&self) -> Result<(), ProfileError> {
        for bar in &self.bars.bars {
            if bar.present && bar.size_bytes != 0 && !bar.size_bytes.is_power_of_two() {
                return Err(ProfileError::schema(format!(
                    "BAR{} size {:#x} is not a power of two",
                    bar.index, bar.size_bytes
                )));
            }
            if bar.is_64bit {
                let upper = self.bars.bars.get(bar.index + 1);
                if upper.map(|b| b.present).unwrap_or(true) {
                    return Err(ProfileError::schema(format!(
                        "64-bit BAR{} requires an absent upper half at index {}",
                        bar.index,
                        bar.index + 1
                    )));
                }
            }
        }

        if let Some(msix) = &self.msix {
            if !(1..=2048).contains(&msix.num_vectors) {
                return Err(ProfileError::schema(format!(
                    "MSI-X vector count {} outside 1..=2048",
                    msix.num_vectors
                )));
            }
            let cap = fwgen_pci::MsixCapability {
                table_size: msix.num_vectors - 1,
                num_vectors: msix.num_vectors,
                table_bar: msix.table_bar,
                table_offset: msix.table_offset,
                pba_bar: msix.pba_bar,
                pba_offset: msix.pba_offset,
                function_mask: false,
                enabled: false,
            };
            fwgen_pci::msix::from_capability(&cap, &self.bars)?;
        }

        Ok(())
    }

    pub fn has_msix(&self) -> bool {
        self.msix.is_some()
    }
}
