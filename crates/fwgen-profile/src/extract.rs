//! Assembles a [`DonorProfile`] from a live donor device.

use std::time::{SystemTime, UNIX_EPOCH};

use fwgen_pci::{analyze_bars, analyze_msix, parse_capabilities, Bdf, ConfigSpace, SysfsReader};

use crate::behavior::{BehaviorProfiler, CancelToken};
use crate::error::ProfileError;
use crate::profile::{DonorIdentity, DonorProfile, Provenance, GENERATOR_VERSION};

#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractionOptions {
    /// When set, run the behavior profiler for this many seconds.
    pub profile_duration_s: Option<f32>,
}

/// Reads, parses and cross-validates the donor at `bdf`.
///
/// This is the C1→C6 leg of the pipeline: config space, capability chain,
/// BARs and MSI-X geometry, plus optional behavior sampling. The returned
/// profile has already passed structural validation.
pub fn extract_profile(
    reader: &SysfsReader,
    bdf: Bdf,
    options: ExtractionOptions,
    cancel: &CancelToken,
) -> Result<DonorProfile, ProfileError> {
    let span = tracing::info_span!("extract", %bdf);
    let _guard = span.enter();

    let config_space = ConfigSpace::new(reader.read_config(bdf)?)?;
    let resources = reader.read_resource_table(bdf)?;

    let identity = DonorIdentity::from_config(&config_space);
    let capabilities = parse_capabilities(&config_space)?;
    let bars = analyze_bars(&config_space, &resources)?;
    let msix = analyze_msix(&capabilities, &bars)?;

    let behavior = match options.profile_duration_s {
        Some(duration) if duration > 0.0 => {
            Some(BehaviorProfiler::new(reader, bdf).run(duration, cancel)?)
        }
        _ => None,
    };

    let captured_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let profile = DonorProfile {
        identity,
        config_space,
        capabilities,
        bars,
        msix,
        behavior,
        provenance: Provenance {
            source_bdf: Some(bdf),
            captured_at,
            generator_version: GENERATOR_VERSION.to_string(),
            profile_duration_s: options.profile_duration_s,
        },
    };
    profile.validate()?;

    tracing::info!(
        vendor = profile.identity.vendor_id,
        device = profile.identity.device_id,
        caps = profile.capabilities.len(),
        msix = profile.msix.is_some(),
        "extracted donor profile"
    );
    Ok(profile)
}
