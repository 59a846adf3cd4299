//! Error types for stellar-bus

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Bus closed")]
    Closed,

    #[error("Timeout waiting for {0}")]
    Timeout(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BusError>;

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<BusError> for errors::StellarError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::KeyNotFound(key) => Self::NotFound(key),
            BusError::SerializationError(msg) => Self::Serialization(msg),
            BusError::Closed => Self::Internal("Bus closed".to_string()),
            BusError::Timeout(what) => Self::Timeout(what),
            BusError::Other(err) => Self::Other(err),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_key_not_found_error() {
        let err = BusError::KeyNotFound("DEFAULT__INTERFACES".to_string());
        assert_eq!(err.to_string(), "Key not found: DEFAULT__INTERFACES");
    }

    #[test]
    fn test_from_serde_error() {
        let err: BusError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, BusError::SerializationError(_)));
    }

    #[test]
    fn test_into_stellar_error() {
        let err: errors::StellarError = BusError::Timeout("ack".to_string()).into();
        assert!(matches!(err, errors::StellarError::Timeout(_)));
    }
}
