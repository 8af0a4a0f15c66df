//! Donor-cloning PCIe firmware generator for the PCILeech FPGA family.
//!
//! `build` extracts a donor profile (or loads a saved one), renders the
//! firmware source tree and commits it atomically; `donor-template` manages
//! the JSON template workflow; `list-devices` enumerates the sysfs root.

use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fwgen_boards::{BoardError, MirrorFetcher, RepoCache};
use fwgen_codegen::{BuildOptions, BuildRequest, CodegenError, DonorSource, Orchestrator};
use fwgen_pci::{Bdf, PciError, SysfsReader};
use fwgen_profile::schema::{AdvancedFeatures, ProfileDocument};
use fwgen_profile::store::{load_document, write_document};
use fwgen_profile::{extract_profile, CancelToken, ExtractionOptions, ProfileError};

/// Local mirror of the upstream board-constraint repo; constraint caching is
/// disabled when unset.
const REPO_MIRROR_ENV: &str = "PCILEECH_REPO_MIRROR";

#[derive(Parser)]
#[command(
    name = "pcileech-fwgen",
    version,
    about = "Generate donor-cloned PCIe firmware sources for PCILeech boards"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a firmware source tree from a donor device or saved profile.
    Build(BuildArgs),
    /// Create, prefill or validate donor template files.
    DonorTemplate(DonorTemplateArgs),
    /// List PCI functions visible under the sysfs root.
    ListDevices,
}

#[derive(Args)]
struct BuildArgs {
    /// Donor device address, `DDDD:BB:DD.F`.
    #[arg(long, conflicts_with = "donor_profile")]
    bdf: Option<String>,

    /// Build from a prerecorded profile instead of a live device.
    #[arg(long)]
    donor_profile: Option<PathBuf>,

    /// Target board name (see the board catalog).
    #[arg(long)]
    board: String,

    /// Output directory; replaced atomically on success.
    #[arg(long, default_value = "output")]
    out: PathBuf,

    /// Sample donor register timing for this many seconds.
    #[arg(long)]
    profile_duration: Option<f32>,

    /// Derive timing variance parameters from the behavior profile.
    #[arg(long)]
    enable_variance: bool,

    /// Donor template merged over the discovered profile (non-null wins).
    #[arg(long)]
    donor_template: Option<PathBuf>,

    /// Also write the merged profile back out as a compact template.
    #[arg(long)]
    output_template: Option<PathBuf>,

    /// Stop the master script after constraints; skip synth/impl/bitstream.
    #[arg(long = "no-synth")]
    no_synth: bool,

    /// Substitute template tree (defaults to the built-in set).
    #[arg(long)]
    template_root: Option<PathBuf>,

    #[arg(long)]
    enable_power_management: bool,

    #[arg(long)]
    enable_error_handling: bool,

    #[arg(long)]
    enable_perf_counters: bool,

    #[arg(long)]
    enable_clock_crossing: bool,
}

#[derive(Args)]
struct DonorTemplateArgs {
    /// Prefill the template from this donor device.
    #[arg(long, conflicts_with = "blank")]
    bdf: Option<String>,

    /// Emit an all-null template.
    #[arg(long)]
    blank: bool,

    /// Omit null members for hand editing.
    #[arg(long)]
    compact: bool,

    /// Output path; stdout when omitted.
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Validate an existing template instead of generating one.
    #[arg(long, conflicts_with_all = ["bdf", "blank", "out"])]
    validate: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Build(args) => run_build(args),
        Command::DonorTemplate(args) => run_donor_template(args),
        Command::ListDevices => run_list_devices(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error[{}]: {err}", error_kind(&err));
            ExitCode::from(exit_status(&err))
        }
    }
}

fn run_build(args: BuildArgs) -> Result<(), CodegenError> {
    let source = match (&args.bdf, &args.donor_profile) {
        (Some(bdf), None) => DonorSource::Device(Bdf::from_str(bdf)?),
        (None, Some(path)) => DonorSource::ProfileFile(path.clone()),
        (None, None) => {
            return Err(CodegenError::input("one of --bdf or --donor-profile is required"))
        }
        (Some(_), Some(_)) => {
            return Err(CodegenError::input("--bdf conflicts with --donor-profile"))
        }
    };

    let reader = SysfsReader::from_env();
    let mut orchestrator = Orchestrator::new(reader);
    if let Ok(mirror) = std::env::var(REPO_MIRROR_ENV) {
        if !mirror.is_empty() {
            let mirror = PathBuf::from(mirror);
            orchestrator = orchestrator.with_repo_cache(
                RepoCache::new(mirror.join(".cache")),
                std::sync::Arc::new(MirrorFetcher::new(&mirror)),
                "local",
            );
        }
    }

    let request = BuildRequest {
        source,
        board: args.board,
        output_dir: args.out,
        options: BuildOptions {
            enable_variance: args.enable_variance,
            profile_duration_s: args.profile_duration,
            donor_template: args.donor_template,
            output_template: args.output_template,
            skip_synthesis: args.no_synth,
            template_root: args.template_root,
            features: AdvancedFeatures {
                power_management: args.enable_power_management,
                error_handling: args.enable_error_handling,
                performance_counters: args.enable_perf_counters,
                clock_crossing: args.enable_clock_crossing,
                extra: Default::default(),
            },
        },
    };

    let outcome = orchestrator.run(&request)?;
    println!(
        "wrote {} files to {}",
        outcome.file_count,
        outcome.output_dir.display()
    );
    for warning in &outcome.warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

fn run_donor_template(args: DonorTemplateArgs) -> Result<(), CodegenError> {
    if let Some(path) = &args.validate {
        let document = load_document(path)?;
        document.validate()?;
        println!("{}: valid donor template", path.display());
        return Ok(());
    }

    let document = match (&args.bdf, args.blank) {
        (Some(bdf), _) => {
            let reader = SysfsReader::from_env();
            let profile = extract_profile(
                &reader,
                Bdf::from_str(bdf)?,
                ExtractionOptions::default(),
                &CancelToken::new(),
            )?;
            ProfileDocument::from_profile(&profile)
        }
        // No donor given: --blank is the default behavior.
        (None, _) => ProfileDocument::blank(),
    };

    match &args.out {
        Some(path) => {
            write_document(path, &document, args.compact).map_err(CodegenError::Profile)?;
            println!("wrote donor template to {}", path.display());
        }
        None => {
            let mut value = serde_json::to_value(&document)?;
            if args.compact {
                strip_nulls(&mut value);
            }
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }
    Ok(())
}

fn run_list_devices() -> Result<(), CodegenError> {
    let reader = SysfsReader::from_env();
    for bdf in reader.list_devices()? {
        match reader.read_vendor_device(bdf) {
            Ok((vendor, device)) => println!("{bdf}  {vendor:04x}:{device:04x}"),
            Err(_) => println!("{bdf}  ????:????"),
        }
    }
    Ok(())
}

fn strip_nulls(value: &mut serde_json::Value) {
    if let serde_json::Value::Object(map) = value {
        map.retain(|_, v| !v.is_null());
        for child in map.values_mut() {
            strip_nulls(child);
        }
    }
}

/// §6.1 exit statuses: 2 validation, 3 extraction, 4 codegen inconsistency,
/// 1 anything else.
fn exit_status(err: &CodegenError) -> u8 {
    match err {
        CodegenError::Input { .. } | CodegenError::ContextInvalid { .. } => 2,
        CodegenError::Board(BoardError::UnknownBoard { .. }) => 2,
        CodegenError::Inconsistency { .. } => 4,
        CodegenError::Pci(err) => pci_exit_status(err),
        CodegenError::Profile(err) => profile_exit_status(err),
        CodegenError::Json(_) => 2,
        _ => 1,
    }
}

fn profile_exit_status(err: &ProfileError) -> u8 {
    match err {
        ProfileError::Pci(err) => pci_exit_status(err),
        ProfileError::Schema { .. } | ProfileError::Json(_) | ProfileError::NotFound { .. } => 2,
        ProfileError::Io(_) => 3,
    }
}

fn pci_exit_status(err: &PciError) -> u8 {
    match err {
        PciError::MalformedBdf { .. } => 2,
        PciError::DeviceNotFound { .. } | PciError::PermissionDenied { .. } | PciError::Io(_) => 3,
        // Structural decode failures: the device answered, its data did not
        // validate.
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_exit_2() {
        let malformed: PciError = "not-a-bdf".parse::<Bdf>().unwrap_err();
        assert_eq!(exit_status(&CodegenError::Pci(malformed)), 2);
        assert_eq!(
            exit_status(&CodegenError::Pci(PciError::CapabilityOutOfRange {
                offset: 0x30
            })),
            2
        );
        assert_eq!(
            exit_status(&CodegenError::Profile(ProfileError::Pci(
                PciError::MsixTableOutOfBar {
                    bar: 0,
                    offset: 0x4000,
                    end: 0x4400,
                    bar_size: 0x2000,
                }
            ))),
            2
        );
        assert_eq!(
            exit_status(&CodegenError::ContextInvalid {
                missing_keys: vec!["device.vendor_id".into()],
                inconsistent_fields: Vec::new(),
            }),
            2
        );
        assert_eq!(
            exit_status(&CodegenError::Board(BoardError::UnknownBoard {
                name: "devboard_9000".into()
            })),
            2
        );
    }

    #[test]
    fn extraction_errors_exit_3() {
        assert_eq!(
            exit_status(&CodegenError::Profile(ProfileError::Pci(
                PciError::DeviceNotFound {
                    bdf: "0000:03:00.0".parse().unwrap(),
                    root: "/sys/bus/pci/devices".into(),
                }
            ))),
            3
        );
        assert_eq!(
            exit_status(&CodegenError::Profile(ProfileError::Pci(
                PciError::PermissionDenied {
                    path: "/sys/bus/pci/devices/0000:03:00.0/config".into(),
                }
            ))),
            3
        );
    }

    #[test]
    fn inconsistency_exits_4_and_everything_else_1() {
        assert_eq!(
            exit_status(&CodegenError::Inconsistency {
                detail: "vendor drift".into()
            }),
            4
        );
        assert_eq!(exit_status(&CodegenError::Cancelled), 1);
        assert_eq!(
            exit_status(&CodegenError::TemplateRender {
                template: "hw/device_config.sv.tpl".into(),
                reason: "undeclared key".into(),
            }),
            1
        );
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

fn error_kind(err: &CodegenError) -> &'static str {
    match err {
        CodegenError::Input { .. } => "input",
        CodegenError::ContextInvalid { .. } => "context-invalid",
        CodegenError::TemplateRender { .. } => "template-render",
        CodegenError::Inconsistency { .. } => "codegen-inconsistency",
        CodegenError::Cancelled => "cancelled",
        CodegenError::Board(BoardError::UnknownBoard { .. }) => "unknown-board",
        CodegenError::Board(_) => "board",
        CodegenError::Profile(ProfileError::Pci(err)) | CodegenError::Pci(err) => match err {
            PciError::MalformedBdf { .. } => "malformed-bdf",
            PciError::DeviceNotFound { .. } => "device-not-found",
            PciError::PermissionDenied { .. } => "permission-denied",
            PciError::CapabilityCycle { .. } => "capability-cycle",
            PciError::CapabilityOutOfRange { .. } => "capability-out-of-range",
            PciError::TruncatedCapability { .. } => "truncated-capability",
            PciError::TruncatedConfigSpace { .. } => "truncated-config-space",
            PciError::BarInvalid { .. } => "bar-invalid",
            PciError::MsixTableOutOfBar { .. } => "msix-table-out-of-bar",
            PciError::MsixPbaOutOfBar { .. } => "msix-pba-out-of-bar",
            PciError::MsixOverlap { .. } => "msix-overlap",
            PciError::ResourceParse { .. } => "resource-parse",
            PciError::Io(_) => "io",
        },
        CodegenError::Profile(ProfileError::Schema { .. }) => "profile-schema",
        CodegenError::Profile(_) => "profile",
        CodegenError::Json(_) => "json",
        CodegenError::Io(_) => "io",
    }
}
