/// Errors from profile assembly, serialization and the on-disk store.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("profile schema invalid: {reason}")]
    Schema { reason: String },

    #[error("no profile named `{name}` in the store")]
    NotFound { name: String },

    #[error(transparent)]
    Pci(#[from] fwgen_pci::PciError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProfileError {
    pub fn schema(reason: impl Into<String>) -> Self {
        Self::Schema {
            reason: reason.into(),
        }
    }
}
