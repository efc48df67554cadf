use thiserror::Error;

pub type TransferResult<T> = Result<T, TransferError>;

/// Shared error taxonomy for the transfer engine.
///
/// Validation errors are recoverable (the caller adjusts input and retries).
/// Crypto and framing errors abort the whole stream and are never partially
/// suppressed. `Cancelled` is a distinguished result, not a failure.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("file too big: {size} bytes (limit {limit})")]
    FileTooBig { size: u64, limit: u64 },

    #[error("too many files: {count} (limit {limit})")]
    TooManyFiles { count: usize, limit: usize },

    #[error("password must not be empty")]
    EmptyPassword,

    #[error("entropy source failure: {0}")]
    Entropy(String),

    #[error("authentication failed: ciphertext corrupted or tampered")]
    AuthenticationFailed,

    #[error("stream truncated: input ended mid-record")]
    TruncatedStream,

    #[error("unsupported framing: {0}")]
    UnsupportedFraming(String),

    #[error("a password is required to decrypt this bundle")]
    PasswordRequired,

    #[error("invalid password")]
    InvalidPassword,

    #[error("not found or expired")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("transfer cancelled")]
    Cancelled,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TransferError {
    /// Map a store status code into the taxonomy.
    ///
    /// 410 (gone) maps to `NotFound`: an expired bundle and a never-existing
    /// one are indistinguishable to the caller by design.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Unauthorized,
            404 | 410 => Self::NotFound,
            s => Self::Transport(format!("unexpected status {s}")),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
