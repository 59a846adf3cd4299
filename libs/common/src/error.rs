use thiserror::Error;

/// Basic library error type
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid scope or name
    #[error("Invalid name: {0}")]
    InvalidName(String),
}

/// Error result type
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<Error> for errors::StellarError {
    fn from(err: Error) -> Self {
        match err {
            Error::Config(msg) | Error::InvalidName(msg) => errors::StellarError::Config(msg),
            Error::Io(e) => errors::StellarError::Io(e.to_string()),
            Error::Serialization(msg) => errors::StellarError::Serialization(msg),
        }
    }
}
