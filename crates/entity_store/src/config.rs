//! Tuning parameters for chunk placement and reclamation.

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Storage tuning shared by every container of a database.
///
/// Neither value affects correctness, only memory use and how many
/// partially-filled chunks an iteration visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Entity slots per chunk.
    pub chunk_capacity: usize,
    /// Number of completely empty chunks a container keeps around before
    /// it starts releasing them.
    pub empty_chunk_slack: usize,
}

impl StoreConfig {
    /// Default slots per chunk.
    pub const DEFAULT_CHUNK_CAPACITY: usize = 32;

    /// Default number of retained empty chunks.
    pub const DEFAULT_EMPTY_CHUNK_SLACK: usize = 2;

    /// Override the slots per chunk.
    #[must_use]
    pub fn with_chunk_capacity(mut self, chunk_capacity: usize) -> Self {
        self.chunk_capacity = chunk_capacity;
        self
    }

    /// Override the number of retained empty chunks.
    #[must_use]
    pub fn with_empty_chunk_slack(mut self, empty_chunk_slack: usize) -> Self {
        self.empty_chunk_slack = empty_chunk_slack;
        self
    }

    /// Parse a config from a JSON document. Missing fields take their
    /// defaults.
    pub fn from_json_str(json: &str) -> StoreResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the containers cannot operate with.
    pub fn validate(&self) -> StoreResult<()> {
        if self.chunk_capacity == 0 {
            return Err(StoreError::InvalidConfig(
                "chunk_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            chunk_capacity: Self::DEFAULT_CHUNK_CAPACITY,
            empty_chunk_slack: Self::DEFAULT_EMPTY_CHUNK_SLACK,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = StoreConfig::default();
        assert_eq!(config.chunk_capacity, 32);
        assert_eq!(config.empty_chunk_slack, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_overrides() {
        let config = StoreConfig::default()
            .with_chunk_capacity(4)
            .with_empty_chunk_slack(0);
        assert_eq!(config.chunk_capacity, 4);
        assert_eq!(config.empty_chunk_slack, 0);
    }

    #[test]
    fn test_from_json_fills_missing_fields() {
        let config = StoreConfig::from_json_str(r#"{ "chunk_capacity": 8 }"#).unwrap();
        assert_eq!(config.chunk_capacity, 8);
        assert_eq!(config.empty_chunk_slack, StoreConfig::DEFAULT_EMPTY_CHUNK_SLACK);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = StoreConfig::from_json_str(r#"{ "chunk_capacity": 0 }"#).unwrap_err();
        assert!(matches!(err, StoreError::InvalidConfig(_)));
    }

    #[test]
    fn test_malformed_json_rejected() {
        let err = StoreConfig::from_json_str("chunk_capacity = 8").unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }
}
