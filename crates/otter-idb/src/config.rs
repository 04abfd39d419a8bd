//! Durable transaction settings.

use serde::{Deserialize, Serialize};

/// Attempts a read or commit makes before giving up on an inactive
/// transaction.
pub const DEFAULT_MAX_ATTEMPTS: usize = 10;

/// Settings shared by every durable transaction opened with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurableConfig {
    /// Restart attempts for reads, cursor resumes and commit
    pub max_attempts: usize,
}

impl DurableConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the attempt bound. Values below 1 are raised to 1.
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Attempt bound, never less than 1 even when deserialized as 0
    pub fn attempts(&self) -> usize {
        self.max_attempts.max(1)
    }
}

impl Default for DurableConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(DurableConfig::default().max_attempts, 10);
        assert_eq!(DurableConfig::new().with_max_attempts(0).max_attempts, 1);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: DurableConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, DurableConfig::default());

        let config: DurableConfig = serde_json::from_str(r#"{"max_attempts": 0}"#).unwrap();
        assert_eq!(config.attempts(), 1);
    }
}
