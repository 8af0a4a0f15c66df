//! The build pipeline.
//!
//! Strictly sequential stages, one mutable filesystem handle: everything is
//! rendered into a staging directory beside the target, verified there, and
//! only then moved into place with a single rename. Any failure (or a
//! cancellation observed between stages) discards the staging tree.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fwgen_boards::{BoardDescriptor, RepoCache, UpstreamFetcher};
use fwgen_pci::{Bdf, SysfsReader};
use fwgen_profile::schema::{merge_template, AdvancedFeatures, ProfileDocument};
use fwgen_profile::store::{load_document, write_document};
use fwgen_profile::{extract_profile, CancelToken, ExtractionOptions};

use crate::context::{build_context, ContextOptions, RenderContext};
use crate::crosscheck::verify_output_tree;
use crate::error::CodegenError;
use crate::templates::{plan_outputs, render_plan, TemplateLibrary};

#[derive(Debug, Clone)]
pub enum DonorSource {
    /// Extract from the live device at this address.
    Device(Bdf),
    /// Build from a prerecorded profile document.
    ProfileFile(PathBuf),
}

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub enable_variance: bool,
    pub profile_duration_s: Option<f32>,
    /// Donor template merged over the discovered profile (non-null wins).
    pub donor_template: Option<PathBuf>,
    /// When set, the merged profile is also written here as a template.
    pub output_template: Option<PathBuf>,
    pub skip_synthesis: bool,
    /// Substitute template tree; the built-in set is used when unset.
    pub template_root: Option<PathBuf>,
    pub features: AdvancedFeatures,
}

#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub source: DonorSource,
    pub board: String,
    pub output_dir: PathBuf,
    pub options: BuildOptions,
}

#[derive(Debug)]
pub struct BuildOutcome {
    pub output_dir: PathBuf,
    pub file_count: usize,
    pub warnings: Vec<String>,
}

/// Owns the pipeline and the only mutable filesystem handle.
pub struct Orchestrator {
    reader: SysfsReader,
    cache: Option<(RepoCache, Arc<dyn UpstreamFetcher>, String)>,
    cancel: CancelToken,
}

impl Orchestrator {
    pub fn new(reader: SysfsReader) -> Self {
        Self {
            reader,
            cache: None,
            cancel: CancelToken::new(),
        }
    }

    /// Enables the external constraint cache: entries are keyed by
    /// `(board, upstream_commit)` and fetched through `fetcher` at most once
    /// per build.
    pub fn with_repo_cache(
        mut self,
        cache: RepoCache,
        fetcher: Arc<dyn UpstreamFetcher>,
        upstream_commit: impl Into<String>,
    ) -> Self {
        self.cache = Some((cache, fetcher, upstream_commit.into()));
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    fn checkpoint(&self) -> Result<(), CodegenError> {
        if self.cancel.is_cancelled() {
            Err(CodegenError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Runs a build to completion. On success the output tree has been
    /// committed to `request.output_dir`; on failure nothing of the staging
    /// tree remains.
    pub fn run(&self, request: &BuildRequest) -> Result<BuildOutcome, CodegenError> {
        let span = tracing::info_span!("build", board = %request.board);
        let _guard = span.enter();

        self.checkpoint()?;
        let board = fwgen_boards::board(&request.board)?;
        let mut warnings = Vec::new();

        // Stage 1: resolve the donor profile.
        let document = self.resolve_document(request, &mut warnings)?;
        self.checkpoint()?;

        // Stage 2: structural validation (BAR pairing, MSI-X windows).
        let profile = document.clone().into_profile()?;

        // Stage 3/4: board constraints, best effort.
        let upstream_constraints = self.resolve_constraints(board, &mut warnings)?;
        self.checkpoint()?;

        // Stage 3 continued: one immutable context for every output file.
        let features = merge_features(&request.options.features, document.advanced_features.as_ref());
        let ctx_options = ContextOptions {
            enable_variance: request.options.enable_variance,
            skip_synthesis: request.options.skip_synthesis,
            features,
            overrides: document.pcileech_optimizations.clone().unwrap_or_default(),
            upstream_constraints,
        };
        let ctx = build_context(&profile, board, &ctx_options)?;

        // Stage 5: deterministic plan, then render everything in memory.
        let library = match &request.options.template_root {
            Some(root) => TemplateLibrary::from_root(root)?,
            None => TemplateLibrary::builtin()?,
        };
        let plan = plan_outputs(&ctx);
        let rendered = render_plan(&library, &plan, &ctx)?;
        self.checkpoint()?;

        // Stages 6–8: stage, verify, commit.
        let staged = self.create_staging_dir(&request.output_dir)?;
        let outcome = self.stage_verify_commit(request, &document, &ctx, &rendered, &staged, warnings);
        if outcome.is_err() {
            let _ = fs::remove_dir_all(&staged);
        }
        outcome
    }

    fn resolve_document(
        &self,
        request: &BuildRequest,
        warnings: &mut Vec<String>,
    ) -> Result<ProfileDocument, CodegenError> {
        let discovered = match &request.source {
            DonorSource::Device(bdf) => {
                let options = ExtractionOptions {
                    profile_duration_s: request.options.profile_duration_s,
                };
                let profile = extract_profile(&self.reader, *bdf, options, &self.cancel)?;
                ProfileDocument::from_profile(&profile)
            }
            DonorSource::ProfileFile(path) => load_document(path)?,
        };

        let Some(template_path) = &request.options.donor_template else {
            return Ok(discovered);
        };
        let template = load_document(template_path)?;
        let merged = merge_template(&discovered, &template)?;

        let before = &discovered.device_info.identification;
        let after = &merged.device_info.identification;
        for (field, old, new) in [
            ("vendor_id", before.vendor_id, after.vendor_id),
            ("device_id", before.device_id, after.device_id),
            ("class_code", before.class_code, after.class_code),
        ] {
            if old.is_some() && new.is_some() && old != new {
                warnings.push(format!(
                    "donor template overrides {field}: {:#06x} -> {:#06x}",
                    old.unwrap_or(0),
                    new.unwrap_or(0)
                ));
            }
        }
        Ok(merged)
    }

    fn resolve_constraints(
        &self,
        board: &BoardDescriptor,
        warnings: &mut Vec<String>,
    ) -> Result<Option<String>, CodegenError> {
        let Some((cache, fetcher, commit)) = &self.cache else {
            if board.pinout_xdc_source.is_some() {
                warnings.push(format!(
                    "no constraint cache configured; {} uses the fallback pinout",
                    board.name
                ));
            }
            return Ok(None);
        };
        let constraints = cache.constraints(board, commit, Arc::clone(fetcher))?;
        if constraints.is_none() && board.pinout_xdc_source.is_some() {
            warnings.push(format!(
                "upstream constraints for {} unavailable; using the fallback pinout",
                board.name
            ));
        }
        Ok(constraints)
    }

    fn create_staging_dir(&self, output_dir: &Path) -> Result<PathBuf, CodegenError> {
        let name = output_dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| CodegenError::input("output directory has no name"))?;
        let parent = match output_dir.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;
        let staged = parent.join(format!(".{name}.staging.{}", std::process::id()));
        if staged.exists() {
            fs::remove_dir_all(&staged)?;
        }
        fs::create_dir_all(&staged)?;
        Ok(staged)
    }

    fn stage_verify_commit(
        &self,
        request: &BuildRequest,
        document: &ProfileDocument,
        ctx: &RenderContext,
        rendered: &[(String, String)],
        staged: &Path,
        warnings: Vec<String>,
    ) -> Result<BuildOutcome, CodegenError> {
        let mut file_count = 0usize;
        for (rel_path, content) in rendered {
            let path = staged.join(rel_path);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, content)?;
            file_count += 1;
        }

        // The exact profile this tree was generated from, for reproducibility.
        write_document(&staged.join("donor_info.json"), document, false)?;
        file_count += 1;

        if !warnings.is_empty() {
            for warning in &warnings {
                tracing::warn!("{warning}");
            }
            let generated = staged.join("generated");
            fs::create_dir_all(&generated)?;
            fs::write(
                generated.join("build_warnings.txt"),
                warnings.join("\n") + "\n",
            )?;
            file_count += 1;
        }

        // Stage 7: the staged tree must agree with the context everywhere.
        verify_output_tree(staged, ctx)?;
        self.checkpoint()?;

        if let Some(template_out) = &request.options.output_template {
            write_document(template_out, document, true)?;
        }

        // Stage 8: single-rename commit, replacing any previous tree.
        if request.output_dir.exists() {
            fs::remove_dir_all(&request.output_dir)?;
        }
        fs::rename(staged, &request.output_dir)?;

        tracing::info!(
            output = %request.output_dir.display(),
            files = file_count,
            warnings = warnings.len(),
            "build committed"
        );
        Ok(BuildOutcome {
            output_dir: request.output_dir.clone(),
            file_count,
            warnings,
        })
    }
}

fn merge_features(
    requested: &AdvancedFeatures,
    from_document: Option<&AdvancedFeatures>,
) -> AdvancedFeatures {
    let doc = from_document.cloned().unwrap_or_default();
    AdvancedFeatures {
        power_management: requested.power_management || doc.power_management,
        error_handling: requested.error_handling || doc.error_handling,
        performance_counters: requested.performance_counters || doc.performance_counters,
        clock_crossing: requested.clock_crossing || doc.clock_crossing,
        extra: doc.extra,
    }
}
