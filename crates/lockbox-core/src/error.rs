use thiserror::Error;

pub type LockboxResult<T> = Result<T, LockboxError>;

/// Errors raised while loading or validating lockbox configuration.
#[derive(Debug, Error)]
pub enum LockboxError {
    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
