/// Errors from context construction, rendering and the build pipeline.
#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    #[error("invalid build input: {reason}")]
    Input { reason: String },

    #[error("render context invalid: missing keys [{}], inconsistent fields [{}]",
            missing_keys.join(", "), inconsistent_fields.join(", "))]
    ContextInvalid {
        missing_keys: Vec<String>,
        inconsistent_fields: Vec<String>,
    },

    #[error("template `{template}` failed to render: {reason}")]
    TemplateRender { template: String, reason: String },

    #[error("generated output is internally inconsistent: {detail}")]
    Inconsistency { detail: String },

    #[error("build cancelled")]
    Cancelled,

    #[error(transparent)]
    Board(#[from] fwgen_boards::BoardError),

    #[error(transparent)]
    Profile(#[from] fwgen_profile::ProfileError),

    #[error(transparent)]
    Pci(#[from] fwgen_pci::PciError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CodegenError {
    pub fn input(reason: impl Into<String>) -> Self {
        Self::Input {
            reason: reason.into(),
        }
    }

    pub fn render(template: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TemplateRender {
            template: template.into(),
            reason: reason.into(),
        }
    }

    pub fn inconsistency(detail: impl Into<String>) -> Self {
        Self::Inconsistency {
            detail: detail.into(),
        }
    }
}
