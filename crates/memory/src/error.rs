use thiserror::Error;

/// The store's error taxonomy.
///
/// Operation-layer code renders these as `{text, is_error: true}`; inside the
/// engine they travel through `anyhow::Result` and can be recovered with
/// `err.downcast_ref::<PalaceError>()` where a caller branches on the kind.
#[derive(Debug, Error)]
pub enum PalaceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("scratch entry {0} already promoted to {1}")]
    AlreadyPromoted(String, String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("clock moved backwards: today {today} predates last seen id date {last_seen}")]
    InvalidTime { today: String, last_seen: String },

    #[error("backing store: {0}")]
    BackingStore(String),

    #[error("version control: {0}")]
    VersionControl(String),

    #[error("language model unavailable: {0}")]
    LlmUnavailable(String),

    #[error("language model produced malformed output: {0}")]
    LlmMalformed(String),

    #[error("external tool: {0}")]
    Transport(String),
}
