//! Rule Engine Error Types

use thiserror::Error;

/// Result type for rule operations
pub type Result<T> = std::result::Result<T, RuleError>;

/// Rule engine errors
#[derive(Debug, Error)]
pub enum RuleError {
    /// Trigger or reaction not found
    #[error("Rule not found: {0}")]
    NotFound(String),

    /// Trigger or reaction already exists
    #[error("Rule already exists: {0}")]
    AlreadyExists(String),

    /// Trigger definition rejected
    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    /// Reaction definition rejected
    #[error("Invalid reaction: {0}")]
    InvalidReaction(String),

    /// Delete refused while other rules depend on this one
    #[error("Failed to delete {name} dependents: {dependents:?}")]
    HasDependents {
        name: String,
        dependents: Vec<String>,
    },

    /// Trigger references form a loop
    #[error("Circular trigger reference: {0}")]
    Cycle(String),

    /// Condition evaluation error
    #[error("Condition evaluation error: {0}")]
    ConditionError(String),

    /// Action execution error
    #[error("Action execution error: {0}")]
    ActionError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Message bus error
    #[error("Bus error: {0}")]
    BusError(String),

    /// Worker pool or sweep thread error
    #[error("Scheduler error: {0}")]
    SchedulerError(String),
}

impl From<serde_json::Error> for RuleError {
    fn from(err: serde_json::Error) -> Self {
        RuleError::SerializationError(err.to_string())
    }
}

impl From<stellar_bus::BusError> for RuleError {
    fn from(err: stellar_bus::BusError) -> Self {
        RuleError::BusError(err.to_string())
    }
}

impl From<RuleError> for errors::StellarError {
    fn from(err: RuleError) -> Self {
        match err {
            RuleError::NotFound(name) => Self::NotFound(name),
            RuleError::InvalidTrigger(_)
            | RuleError::InvalidReaction(_)
            | RuleError::AlreadyExists(_)
            | RuleError::HasDependents { .. } => Self::Config(err.to_string()),
            RuleError::Cycle(msg) => Self::CircularDependency(msg),
            RuleError::ConditionError(msg) => Self::RuleEvaluation(msg),
            RuleError::ActionError(msg) => Self::ActionExecution(msg),
            RuleError::SerializationError(msg) => Self::Serialization(msg),
            RuleError::BusError(msg) | RuleError::SchedulerError(msg) => Self::Internal(msg),
        }
    }
}
