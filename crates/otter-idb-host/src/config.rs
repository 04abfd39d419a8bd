//! Host configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Where committed data lives
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Storage {
    /// Lost when the host shuts down
    #[default]
    Memory,
    /// redb file, reloaded on startup
    File(PathBuf),
}

/// When the host commits a transaction nobody committed explicitly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AutoCommit {
    /// After `idle_ms` without a request, the way a browser commits once the
    /// task that owns the transaction yields
    Idle { idle_ms: u64 },
    /// Right after the transaction has served `requests` requests
    AfterRequests { requests: usize },
    /// Only on explicit commit, release of the last handle, or shutdown
    Never,
}

pub const DEFAULT_IDLE_MS: u64 = 25;

impl AutoCommit {
    pub fn idle(window: Duration) -> Self {
        AutoCommit::Idle {
            idle_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn after_requests(requests: usize) -> Self {
        AutoCommit::AfterRequests {
            requests: requests.max(1),
        }
    }

    pub(crate) fn idle_window(&self) -> Option<Duration> {
        match self {
            AutoCommit::Idle { idle_ms } => Some(Duration::from_millis(*idle_ms)),
            _ => None,
        }
    }

    pub(crate) fn request_budget(&self) -> Option<usize> {
        match self {
            AutoCommit::AfterRequests { requests } => Some((*requests).max(1)),
            _ => None,
        }
    }
}

impl Default for AutoCommit {
    fn default() -> Self {
        AutoCommit::Idle {
            idle_ms: DEFAULT_IDLE_MS,
        }
    }
}

/// Settings for an [`crate::IndexedDb`] host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub storage: Storage,
    pub auto_commit: AutoCommit,
    /// Pending requests accepted before callers block
    pub queue_capacity: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            storage: Storage::Memory,
            auto_commit: AutoCommit::default(),
            queue_capacity: 1024,
        }
    }
}

impl HostConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn storage(mut self, storage: Storage) -> Self {
        self.storage = storage;
        self
    }

    /// Persist committed data to a redb file at `path`
    pub fn file(self, path: impl Into<PathBuf>) -> Self {
        self.storage(Storage::File(path.into()))
    }

    pub fn auto_commit(mut self, auto_commit: AutoCommit) -> Self {
        self.auto_commit = auto_commit;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.storage, Storage::Memory);
        assert_eq!(config.auto_commit, AutoCommit::Idle { idle_ms: 25 });
        assert_eq!(config.queue_capacity, 1024);
    }

    #[test]
    fn test_builder_min_values() {
        let config = HostConfig::new()
            .queue_capacity(0)
            .auto_commit(AutoCommit::after_requests(0));
        assert_eq!(config.queue_capacity, 1);
        assert_eq!(config.auto_commit.request_budget(), Some(1));
        assert_eq!(config.auto_commit.idle_window(), None);
    }

    #[test]
    fn test_json_shape() {
        let config: HostConfig = serde_json::from_str(
            r#"{"storage": {"file": "data.redb"}, "auto_commit": {"mode": "after_requests", "requests": 3}}"#,
        )
        .unwrap();
        assert_eq!(config.storage, Storage::File(PathBuf::from("data.redb")));
        assert_eq!(config.auto_commit, AutoCommit::AfterRequests { requests: 3 });
        assert_eq!(config.queue_capacity, 1024);

        let config: HostConfig =
            serde_json::from_str(r#"{"storage": "memory", "auto_commit": {"mode": "never"}}"#)
                .unwrap();
        assert_eq!(config.auto_commit, AutoCommit::Never);
    }
}
