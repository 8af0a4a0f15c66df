//! The template library and the per-build output plan.
//!
//! Template text is data, not code: the built-in set is compiled in from
//! `templates/`, and an operator can substitute a compatible external tree
//! via [`TemplateLibrary::from_root`] (the upstream project shipped two
//! near-duplicate trees; we refuse to guess and make the root explicit).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::context::RenderContext;
use crate::engine::Template;
use crate::error::CodegenError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TemplateId {
    DeviceConfig,
    MsixCapabilityRegisters,
    MsixImplementation,
    TopWrapper,
    PowerManagement,
    ErrorHandling,
    PerformanceCounters,
    ClockCrossing,
    ProjectSetup,
    IpConfigPcie7x,
    IpConfigUltraScale,
    AddSources,
    Constraints,
    Synthesis,
    Implementation,
    Bitstream,
    BuildAll,
    PinoutXdc,
    TimingXdc,
}

impl TemplateId {
    pub const ALL: [TemplateId; 19] = [
        TemplateId::DeviceConfig,
        TemplateId::MsixCapabilityRegisters,
        TemplateId::MsixImplementation,
        TemplateId::TopWrapper,
        TemplateId::PowerManagement,
        TemplateId::ErrorHandling,
        TemplateId::PerformanceCounters,
        TemplateId::ClockCrossing,
        TemplateId::ProjectSetup,
        TemplateId::IpConfigPcie7x,
        TemplateId::IpConfigUltraScale,
        TemplateId::AddSources,
        TemplateId::Constraints,
        TemplateId::Synthesis,
        TemplateId::Implementation,
        TemplateId::Bitstream,
        TemplateId::BuildAll,
        TemplateId::PinoutXdc,
        TemplateId::TimingXdc,
    ];

    /// Source file, relative to the template root.
    pub fn source_path(self) -> &'static str {
        match self {
            TemplateId::DeviceConfig => "hw/device_config.sv.tpl",
            TemplateId::MsixCapabilityRegisters => "hw/msix_capability_registers.sv.tpl",
            TemplateId::MsixImplementation => "hw/msix_implementation.sv.tpl",
            TemplateId::TopWrapper => "hw/top_wrapper.sv.tpl",
            TemplateId::PowerManagement => "hw/power_management.sv.tpl",
            TemplateId::ErrorHandling => "hw/error_handling.sv.tpl",
            TemplateId::PerformanceCounters => "hw/performance_counters.sv.tpl",
            TemplateId::ClockCrossing => "hw/clock_crossing.sv.tpl",
            TemplateId::ProjectSetup => "tcl/01_project_setup.tcl.tpl",
            TemplateId::IpConfigPcie7x => "tcl/02_ip_config_pcie7x.tcl.tpl",
            TemplateId::IpConfigUltraScale => "tcl/02_ip_config_ultrascale.tcl.tpl",
            TemplateId::AddSources => "tcl/03_add_sources.tcl.tpl",
            TemplateId::Constraints => "tcl/04_constraints.tcl.tpl",
            TemplateId::Synthesis => "tcl/05_synthesis.tcl.tpl",
            TemplateId::Implementation => "tcl/06_implementation.tcl.tpl",
            TemplateId::Bitstream => "tcl/07_bitstream.tcl.tpl",
            TemplateId::BuildAll => "tcl/build_all.tcl.tpl",
            TemplateId::PinoutXdc => "constraints/pinout.xdc.tpl",
            TemplateId::TimingXdc => "constraints/timing.xdc.tpl",
        }
    }

    fn builtin_text(self) -> &'static str {
        match self {
            TemplateId::DeviceConfig => include_str!("../templates/hw/device_config.sv.tpl"),
            TemplateId::MsixCapabilityRegisters => {
                include_str!("../templates/hw/msix_capability_registers.sv.tpl")
            }
            TemplateId::MsixImplementation => {
                include_str!("../templates/hw/msix_implementation.sv.tpl")
            }
            TemplateId::TopWrapper => include_str!("../templates/hw/top_wrapper.sv.tpl"),
            TemplateId::PowerManagement => include_str!("../templates/hw/power_management.sv.tpl"),
            TemplateId::ErrorHandling => include_str!("../templates/hw/error_handling.sv.tpl"),
            TemplateId::PerformanceCounters => {
                include_str!("../templates/hw/performance_counters.sv.tpl")
            }
            TemplateId::ClockCrossing => include_str!("../templates/hw/clock_crossing.sv.tpl"),
            TemplateId::ProjectSetup => include_str!("../templates/tcl/01_project_setup.tcl.tpl"),
            TemplateId::IpConfigPcie7x => {
                include_str!("../templates/tcl/02_ip_config_pcie7x.tcl.tpl")
            }
            TemplateId::IpConfigUltraScale => {
                include_str!("../templates/tcl/02_ip_config_ultrascale.tcl.tpl")
            }
            TemplateId::AddSources => include_str!("../templates/tcl/03_add_sources.tcl.tpl"),
            TemplateId::Constraints => include_str!("../templates/tcl/04_constraints.tcl.tpl"),
            TemplateId::Synthesis => include_str!("../templates/tcl/05_synthesis.tcl.tpl"),
            TemplateId::Implementation => include_str!("../templates/tcl/06_implementation.tcl.tpl"),
            TemplateId::Bitstream => include_str!("../templates/tcl/07_bitstream.tcl.tpl"),
            TemplateId::BuildAll => include_str!("../templates/tcl/build_all.tcl.tpl"),
            TemplateId::PinoutXdc => include_str!("../templates/constraints/pinout.xdc.tpl"),
            TemplateId::TimingXdc => include_str!("../templates/constraints/timing.xdc.tpl"),
        }
    }
}

/// Parsed templates keyed by id.
#[derive(Debug, Clone)]
pub struct TemplateLibrary {
    templates: BTreeMap<TemplateId, Template>,
}

impl TemplateLibrary {
    /// The compiled-in authoritative tree.
    pub fn builtin() -> Result<Self, CodegenError> {
        let mut templates = BTreeMap::new();
        for id in TemplateId::ALL {
            templates.insert(id, Template::parse(id.source_path(), id.builtin_text())?);
        }
        Ok(Self { templates })
    }

    /// Loads a compatible external tree laid out like `templates/`.
    pub fn from_root(root: &Path) -> Result<Self, CodegenError> {
        let mut templates = BTreeMap::new();
        for id in TemplateId::ALL {
            let path = root.join(id.source_path());
            let text = fs::read_to_string(&path).map_err(|err| {
                CodegenError::input(format!(
                    "template root is missing {}: {err}",
                    path.display()
                ))
            })?;
            templates.insert(id, Template::parse(id.source_path(), &text)?);
        }
        Ok(Self { templates })
    }

    pub fn get(&self, id: TemplateId) -> &Template {
        &self.templates[&id]
    }
}

/// One entry of the build plan: which template produces which output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedFile {
    pub template: TemplateId,
    pub output_path: &'static str,
}

/// Deterministic output plan: a pure function of the context, no I/O.
///
/// `ip_family` selects exactly one of the two IP-configuration templates;
/// MSI-X and advanced-feature modules are planned only when enabled, so a
/// feature that is off leaves no file behind to dangle.
pub fn plan_outputs(ctx: &RenderContext) -> Vec<PlannedFile> {
    let flag = |key: &str| ctx.get(key).map(|v| v.is_truthy()).unwrap_or(false);
    let mut plan = vec![PlannedFile {
        template: TemplateId::DeviceConfig,
        output_path: "generated/device_config.sv",
    }];

    if flag("msix.enabled") {
        plan.push(PlannedFile {
            template: TemplateId::MsixCapabilityRegisters,
            output_path: "generated/msix_capability_registers.sv",
        });
        plan.push(PlannedFile {
            template: TemplateId::MsixImplementation,
            output_path: "generated/msix_implementation.sv",
        });
    }
    plan.push(PlannedFile {
        template: TemplateId::TopWrapper,
        output_path: "generated/top_wrapper.sv",
    });
    if flag("features.power_management") {
        plan.push(PlannedFile {
            template: TemplateId::PowerManagement,
            output_path: "generated/power_management.sv",
        });
    }
    if flag("features.error_handling") {
        plan.push(PlannedFile {
            template: TemplateId::ErrorHandling,
            output_path: "generated/error_handling.sv",
        });
    }
    if flag("features.performance_counters") {
        plan.push(PlannedFile {
            template: TemplateId::PerformanceCounters,
            output_path: "generated/performance_counters.sv",
        });
    }
    if flag("features.clock_crossing") {
        plan.push(PlannedFile {
            template: TemplateId::ClockCrossing,
            output_path: "generated/clock_crossing.sv",
        });
    }

    plan.push(PlannedFile {
        template: TemplateId::ProjectSetup,
        output_path: "tcl/01_project_setup.tcl",
    });
    plan.push(PlannedFile {
        template: if flag("pcie.is_ultrascale") {
            TemplateId::IpConfigUltraScale
        } else {
            TemplateId::IpConfigPcie7x
        },
        output_path: "tcl/02_ip_config.tcl",
    });
    for (template, output_path) in [
        (TemplateId::AddSources, "tcl/03_add_sources.tcl"),
        (TemplateId::Constraints, "tcl/04_constraints.tcl"),
        (TemplateId::Synthesis, "tcl/05_synthesis.tcl"),
        (TemplateId::Implementation, "tcl/06_implementation.tcl"),
        (TemplateId::Bitstream, "tcl/07_bitstream.tcl"),
        (TemplateId::BuildAll, "tcl/build_all.tcl"),
        (TemplateId::PinoutXdc, "constraints/pinout.xdc"),
        (TemplateId::TimingXdc, "constraints/timing.xdc"),
    ] {
        plan.push(PlannedFile {
            template,
            output_path,
        });
    }
    plan
}

/// Pre-render validation: every key any planned template references must be
/// declared. Returns the full missing set, not just the first.
pub fn validate_plan(
    library: &TemplateLibrary,
    plan: &[PlannedFile],
    ctx: &RenderContext,
) -> Result<(), CodegenError> {
    let mut missing = Vec::new();
    for file in plan {
        missing.extend(library.get(file.template).missing_keys(ctx));
    }
    missing.sort();
    missing.dedup();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(CodegenError::ContextInvalid {
            missing_keys: missing,
            inconsistent_fields: Vec::new(),
        })
    }
}

/// Renders the whole plan to `(relative path, content)` pairs.
pub fn render_plan(
    library: &TemplateLibrary,
    plan: &[PlannedFile],
    ctx: &RenderContext,
) -> Result<Vec<(String, String)>, CodegenError> {
    validate_plan(library, plan, ctx)?;
    let mut outputs = Vec::with_capacity(plan.len());
    for file in plan {
        let content = library.get(file.template).render(ctx)?;
        outputs.push((file.output_path.to_string(), content));
    }
    Ok(outputs)
}
