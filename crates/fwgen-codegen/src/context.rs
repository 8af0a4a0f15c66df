//! Render-context construction.
//!
//! One flat, string-keyed map feeds every template. Every key is declared
//! here with an explicit default, so a build with no MSI-X, no behavior
//! profile and no upstream constraints is still fully specified.
//!
//! Key groups:
//!
//! | group | contents |
//! |-------|----------|
//! | `device.*` | identity registers plus the donor signature hash |
//! | `bars` | list of six entries: `index`, `present`, `is_memory`, `is_io`, `is_64bit`, `is_prefetchable`, `size` |
//! | `bar0.*` | BAR0 aperture for the IP-core script (`size`, `size_kb`) |
//! | `msix.*` | geometry, `enabled`, `table_size_minus_one`, `addr_width` |
//! | `board.*` | name, FPGA part, IP family, default BAR0 size |
//! | `pcie.*` | link parameters and the IP-family selectors |
//! | `active_device_config.*` | class heuristics refined by profiling/overrides |
//! | `features.*` | advanced-feature gates |
//! | `variance.*` | variance-mode flag |
//! | `build.*` | synthesis gating |
//! | `constraints.*` | upstream pinout text, or the fallback marker |
//! | `header.*` | provenance banner fields |

use std::collections::BTreeMap;

use fwgen_boards::{BoardDescriptor, IpFamily};
use fwgen_pci::CapabilityKind;
use fwgen_profile::schema::{AdvancedFeatures, Optimizations};
use fwgen_profile::DonorProfile;

use crate::error::CodegenError;

/// A context value. Lists hold uniform string-keyed items and are only
/// consumed by `#each`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(u64),
    Bool(bool),
    List(Vec<BTreeMap<String, Value>>),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Str(s) => !s.is_empty(),
            Value::Int(v) => *v != 0,
            Value::Bool(v) => *v,
            Value::List(items) => !items.is_empty(),
        }
    }
}

/// Immutable once built; the renderer only reads.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    map: BTreeMap<String, Value>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_str(&mut self, key: &str, value: impl Into<String>) {
        self.map.insert(key.to_string(), Value::Str(value.into()));
    }

    pub fn insert_int(&mut self, key: &str, value: u64) {
        self.map.insert(key.to_string(), Value::Int(value));
    }

    pub fn insert_bool(&mut self, key: &str, value: bool) {
        self.map.insert(key.to_string(), Value::Bool(value));
    }

    pub fn insert_list(&mut self, key: &str, items: Vec<BTreeMap<String, Value>>) {
        self.map.insert(key.to_string(), Value::List(items));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    pub fn int(&self, key: &str) -> Option<u64> {
        match self.map.get(key) {
            Some(Value::Int(v)) => Some(*v),
            Some(Value::Bool(v)) => Some(u64::from(*v)),
            _ => None,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }
}

/// Options that shape the context beyond the profile itself.
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    pub enable_variance: bool,
    pub skip_synthesis: bool,
    pub features: AdvancedFeatures,
    pub overrides: Optimizations,
    /// Upstream pinout text resolved by the repo cache; `None` selects the
    /// built-in fallback.
    pub upstream_constraints: Option<String>,
}

/// Synthetic MSI-X defaults used when the donor has no MSI-X capability.
const DEFAULT_MSIX_VECTORS: u64 = 1;
const DEFAULT_MSIX_PBA_OFFSET: u64 = 2048;

/// Pure function: profile + board + options → validated context.
pub fn build_context(
    profile: &DonorProfile,
    board: &BoardDescriptor,
    options: &ContextOptions,
) -> Result<RenderContext, CodegenError> {
    // Re-check the structural invariants; a profile straight from disk may
    // never have passed extraction.
    if let Err(err) = profile.validate() {
        return Err(CodegenError::ContextInvalid {
            missing_keys: Vec::new(),
            inconsistent_fields: vec![err.to_string()],
        });
    }

    let mut ctx = RenderContext::new();
    let identity = &profile.identity;

    ctx.insert_int("device.vendor_id", identity.vendor_id.into());
    ctx.insert_int("device.device_id", identity.device_id.into());
    ctx.insert_int("device.subsys_vendor_id", identity.subsystem_vendor_id.into());
    ctx.insert_int("device.subsys_device_id", identity.subsystem_device_id.into());
    ctx.insert_int("device.class_code", identity.class_code.into());
    ctx.insert_int("device.class_base", u64::from(identity.class_code >> 16) & 0xff);
    ctx.insert_int("device.class_sub", u64::from(identity.class_code >> 8) & 0xff);
    ctx.insert_int("device.class_prog", u64::from(identity.class_code) & 0xff);
    ctx.insert_int("device.revision_id", identity.revision_id.into());
    ctx.insert_str("device.signature_hash", identity.signature_hash());

    let mut bars = Vec::with_capacity(6);
    for bar in &profile.bars.bars {
        let mut item = BTreeMap::new();
        item.insert("index".to_string(), Value::Int(bar.index as u64));
        item.insert("present".to_string(), Value::Bool(bar.present));
        item.insert("is_memory".to_string(), Value::Bool(bar.is_memory()));
        item.insert(
            "is_io".to_string(),
            Value::Bool(bar.kind == fwgen_pci::BarKind::Io),
        );
        item.insert("is_64bit".to_string(), Value::Bool(bar.is_64bit));
        item.insert(
            "is_prefetchable".to_string(),
            Value::Bool(bar.is_prefetchable),
        );
        item.insert("size".to_string(), Value::Int(bar.size_bytes));
        bars.push(item);
    }
    ctx.insert_list("bars", bars);

    let bar0_size = if profile.bars.bars[0].present {
        profile.bars.bars[0].size_bytes
    } else {
        u64::from(board.default_bar0_size_kb) * 1024
    };
    ctx.insert_int("bar0.size", bar0_size);
    ctx.insert_int("bar0.size_kb", bar0_size.div_ceil(1024));

    match &profile.msix {
        Some(msix) => {
            ctx.insert_bool("msix.enabled", true);
            ctx.insert_int("msix.num_vectors", msix.num_vectors.into());
            ctx.insert_int(
                "msix.table_size_minus_one",
                msix.table_size_minus_one().into(),
            );
            ctx.insert_int("msix.table_bar", msix.table_bar.into());
            ctx.insert_int("msix.table_offset", msix.table_offset.into());
            ctx.insert_int("msix.pba_bar", msix.pba_bar.into());
            ctx.insert_int("msix.pba_offset", msix.pba_offset.into());
            // Offset/BIR register images, exactly as they appear at cap+4
            // and cap+8.
            ctx.insert_int(
                "msix.table_offset_bir",
                u64::from(msix.table_offset | u32::from(msix.table_bar)),
            );
            ctx.insert_int(
                "msix.pba_offset_bir",
                u64::from(msix.pba_offset | u32::from(msix.pba_bar)),
            );
            ctx.insert_int("msix.addr_width", addr_width(msix.num_vectors.into()));
        }
        None => {
            ctx.insert_bool("msix.enabled", false);
            ctx.insert_int("msix.num_vectors", DEFAULT_MSIX_VECTORS);
            ctx.insert_int("msix.table_size_minus_one", DEFAULT_MSIX_VECTORS - 1);
            ctx.insert_int("msix.table_bar", 0);
            ctx.insert_int("msix.table_offset", 0);
            ctx.insert_int("msix.pba_bar", 0);
            ctx.insert_int("msix.pba_offset", DEFAULT_MSIX_PBA_OFFSET);
            ctx.insert_int("msix.table_offset_bir", 0);
            ctx.insert_int("msix.pba_offset_bir", DEFAULT_MSIX_PBA_OFFSET);
            ctx.insert_int("msix.addr_width", addr_width(DEFAULT_MSIX_VECTORS));
        }
    }

    ctx.insert_str("board.name", board.name);
    ctx.insert_str("board.fpga_part", board.fpga_part);
    ctx.insert_str("board.ip_family", board.ip_family.context_value());
    ctx.insert_int(
        "board.default_bar0_size_kb",
        board.default_bar0_size_kb.into(),
    );
    ctx.insert_bool("pcie.is_pcie7x", board.ip_family == IpFamily::Pcie7Series);
    ctx.insert_bool("pcie.is_ultrascale", board.ip_family == IpFamily::UltraScale);

    // Link parameters from the PCIe capability, with conservative defaults
    // for donors that do not expose one.
    let mut max_payload = 128u64;
    let mut max_read_request = 512u64;
    let mut link_width = 1u64;
    let mut link_speed = 1u64;
    for cap in &profile.capabilities {
        if let CapabilityKind::PciExpress {
            max_payload_supported,
            max_read_request: mrr,
            link_speed: speed,
            link_width: width,
            ..
        } = &cap.kind
        {
            max_payload = 128u64 << u64::from(*max_payload_supported.min(&5));
            max_read_request = 128u64 << u64::from(*mrr.min(&5));
            link_width = u64::from(*width).max(1);
            link_speed = u64::from(*speed).max(1);
        }
    }
    ctx.insert_int("pcie.max_payload", max_payload);
    ctx.insert_int("pcie.max_read_request", max_read_request);
    ctx.insert_int("pcie.link_width", link_width);
    ctx.insert_int("pcie.link_speed", link_speed);

    // Class-derived source count, refined by explicit overrides.
    let base_class = (identity.class_code >> 16) as u8;
    let num_sources = options.overrides.num_sources.map(u64::from).unwrap_or(match base_class {
        0x01 => 8, // storage
        0x02 => 4, // network
        0x03 => 2, // display
        _ => 1,
    });
    ctx.insert_int("active_device_config.num_sources", num_sources);

    let counter_width = options
        .overrides
        .counter_width
        .map(u64::from)
        .or_else(|| {
            profile
                .behavior
                .as_ref()
                .map(|b| u64::from(b.suggested_counter_width()))
        })
        .unwrap_or(32);
    ctx.insert_int("active_device_config.counter_width", counter_width);

    let timing_class = options
        .overrides
        .timing_class
        .clone()
        .or_else(|| {
            profile
                .behavior
                .as_ref()
                .map(|b| b.timing_class().to_string())
        })
        .unwrap_or_else(|| "default".to_string());
    ctx.insert_str("active_device_config.timing_class", timing_class);

    ctx.insert_bool("features.power_management", options.features.power_management);
    ctx.insert_bool("features.error_handling", options.features.error_handling);
    ctx.insert_bool(
        "features.performance_counters",
        options.features.performance_counters,
    );
    ctx.insert_bool("features.clock_crossing", options.features.clock_crossing);
    ctx.insert_bool("variance.enabled", options.enable_variance);
    ctx.insert_bool("build.run_synthesis", !options.skip_synthesis);

    match &options.upstream_constraints {
        Some(text) => {
            ctx.insert_bool("constraints.from_upstream", true);
            ctx.insert_str("constraints.body", text.clone());
        }
        None => {
            ctx.insert_bool("constraints.from_upstream", false);
            ctx.insert_str("constraints.body", "");
        }
    }

    ctx.insert_str(
        "header.generator_version",
        profile.provenance.generator_version.clone(),
    );
    ctx.insert_str("header.donor_hash", identity.signature_hash());
    ctx.insert_str("header.board", board.name);
    ctx.insert_int("header.captured_at", profile.provenance.captured_at);
    ctx.insert_str(
        "header.source_bdf",
        profile
            .provenance
            .source_bdf
            .map(|b| b.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    );

    Ok(ctx)
}

/// Table addressing width: enough bits to index `num_vectors` entries,
/// never below one.
fn addr_width(num_vectors: u64) -> u64 {
    u64::from((64 - num_vectors.saturating_sub(1).leading_zeros()).max(1))
}
