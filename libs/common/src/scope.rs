//! Scope - the namespace every topic, status key and rule lives in

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_SCOPE: &str = "DEFAULT";

/// Uppercase identifier made of ASCII letters, digits and underscores
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Scope(String);

impl Scope {
    pub fn new(name: &str) -> Result<Self> {
        let upper = name.trim().to_uppercase();
        if upper.is_empty() {
            return Err(Error::InvalidName("scope must not be empty".to_string()));
        }
        if !upper.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::InvalidName(format!(
                "scope '{}' may only contain letters, digits and underscores",
                name
            )));
        }
        Ok(Self(upper))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self(DEFAULT_SCOPE.to_string())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Scope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Scope {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.0
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_scope_normalizes_case() {
        assert_eq!(Scope::new("default").unwrap().as_str(), "DEFAULT");
        assert_eq!(Scope::default().to_string(), "DEFAULT");
    }

    #[test]
    fn test_scope_rejects_separators() {
        assert!(Scope::new("").is_err());
        assert!(Scope::new("A__B:C").is_err());
        assert!(Scope::new("MY SCOPE").is_err());
    }

    #[test]
    fn test_scope_serde() {
        let scope: Scope = serde_json::from_str("\"ops\"").unwrap();
        assert_eq!(scope.as_str(), "OPS");
        assert!(serde_json::from_str::<Scope>("\"a-b\"").is_err());
    }
}
