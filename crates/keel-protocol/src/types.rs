//! Identifier and shard types shared across process boundaries

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

/// Unique identifier for an application
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationId(pub String);

impl ApplicationId {
    /// Create a new application ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ApplicationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ApplicationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a consensus (one partition of an application)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConsensusId(pub String);

impl ConsensusId {
    /// Create a new consensus ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsensusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConsensusId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConsensusId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Fully qualified name of a service hosted inside a consensus
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceName(pub String);

impl ServiceName {
    /// Create a new service name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the raw name string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ServiceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ServiceName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One disjoint slice of an application's state space, assigned to exactly
/// one consensus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardInfo {
    /// Shard identifier
    pub shard_id: String,
    /// First key of the shard's key range (inclusive)
    pub shard_first_key: Bytes,
}

impl ShardInfo {
    /// Create a new shard descriptor
    pub fn new(shard_id: impl Into<String>, shard_first_key: impl Into<Bytes>) -> Self {
        Self {
            shard_id: shard_id.into(),
            shard_first_key: shard_first_key.into(),
        }
    }
}

/// How strictly a consensus validates declared side effects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectValidation {
    /// Validate effects and fail loudly on violations
    Enabled,
    /// Validate effects but only log violations
    Quiet,
    /// No effect validation
    Disabled,
}

impl Default for EffectValidation {
    fn default() -> Self {
        Self::Enabled
    }
}

impl FromStr for EffectValidation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "enabled" => Ok(Self::Enabled),
            "quiet" => Ok(Self::Quiet),
            "disabled" => Ok(Self::Disabled),
            other => Err(format!("unknown effect validation mode: '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        assert_eq!(format!("{}", ConsensusId::new("c1")), "c1");
        assert_eq!(ApplicationId::from("app").as_str(), "app");
    }

    #[test]
    fn test_id_equality() {
        assert_eq!(ConsensusId::new("a"), ConsensusId::from("a"));
        assert_ne!(ConsensusId::new("a"), ConsensusId::new("b"));
    }

    #[test]
    fn test_effect_validation_from_str() {
        assert_eq!(
            "ENABLED".parse::<EffectValidation>().unwrap(),
            EffectValidation::Enabled
        );
        assert_eq!(
            "quiet".parse::<EffectValidation>().unwrap(),
            EffectValidation::Quiet
        );
        assert!("sometimes".parse::<EffectValidation>().is_err());
    }
}
