//! Template-driven code generation.
//!
//! The donor profile flows through one immutable [`context::RenderContext`]
//! into a deterministic, non-Turing-complete [`engine::Template`] evaluator;
//! the [`orchestrator::Orchestrator`] sequences extraction, rendering, the
//! post-render cross-check and the atomic commit of the output tree.

pub mod context;
pub mod crosscheck;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod templates;

pub use context::{build_context, ContextOptions, RenderContext, Value};
pub use engine::Template;
pub use error::CodegenError;
pub use orchestrator::{BuildOptions, BuildOutcome, BuildRequest, DonorSource, Orchestrator};
pub use templates::{plan_outputs, render_plan, PlannedFile, TemplateId, TemplateLibrary};
