//! Stellar basic library
//!
//! Shared by all crates and services:
//! - logging initialization and runtime level changes
//! - figment configuration loading
//! - shutdown signals and thread cancellation
//! - hex rendering
//! - scope names

pub mod config_loader;
pub mod error;
pub mod hex;
pub mod logging;
pub mod scope;
pub mod shutdown;

pub use error::{Error, Result};
pub use scope::{Scope, DEFAULT_SCOPE};
pub use shutdown::CancelSignal;

// Re-export common dependencies
pub use anyhow;
pub use serde;
pub use serde_json;
pub use tokio;
