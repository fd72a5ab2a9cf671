//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    /// Revision token missing or malformed in the platform info blob.
    #[error("revision parse error: {0}")]
    IdentityParse(String),

    /// Platform info file unreadable. Unlike a parse failure this may be
    /// transient, so callers are allowed to retry.
    #[error("platform info unavailable: {0}")]
    PlatformUnavailable(String),

    #[error("settings write error: {0}")]
    DocumentWrite(String),

    #[error("key generation error: {0}")]
    KeyGeneration(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
