#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("unknown board `{name}`")]
    UnknownBoard { name: String },

    #[error("constraint fetch for `{board}` failed: {reason}")]
    CacheFetch { board: String, reason: String },

    #[error("cached constraints for `{board}` failed checksum verification")]
    ChecksumMismatch { board: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
