//! Publishing and hub connection settings

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Per-request timeout derived from the largest artifact in a batch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    pub base: Duration,
    /// Slowest throughput we still expect the registry to sustain
    pub min_bytes_per_sec: u64,
    pub ceiling: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(60),
            min_bytes_per_sec: 5 * 1024 * 1024,
            ceiling: Duration::from_secs(2 * 60 * 60),
        }
    }
}

impl TimeoutPolicy {
    pub fn timeout_for(&self, largest_bytes: u64) -> Duration {
        let transfer = Duration::from_secs_f64(largest_bytes as f64 / self.min_bytes_per_sec.max(1) as f64);
        (self.base + transfer).min(self.ceiling)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// First batch size; `None` sends every pending shard in one commit
    pub initial_batch_size: Option<usize>,
    /// Failed attempts tolerated before the session is marked failed
    pub retry_budget: u32,
    /// At most `max_commits` commits per `commit_window`
    pub max_commits: usize,
    pub commit_window: Duration,
    pub timeout: TimeoutPolicy,
    /// Listing polls after each upload round
    pub verify_polls: u32,
    pub verify_interval: Duration,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            initial_batch_size: None,
            retry_budget: 5,
            max_commits: 100,
            commit_window: Duration::from_secs(3600),
            timeout: TimeoutPolicy::default(),
            verify_polls: 5,
            verify_interval: Duration::from_secs(10),
        }
    }
}

impl PublishConfig {
    /// Defaults overridden by `BIDS_HUB_*` variables
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            initial_batch_size: env_parse("BIDS_HUB_BATCH_SIZE").or(d.initial_batch_size),
            retry_budget: env_parse("BIDS_HUB_RETRY_BUDGET").unwrap_or(d.retry_budget),
            max_commits: env_parse("BIDS_HUB_MAX_COMMITS").unwrap_or(d.max_commits),
            commit_window: env_parse("BIDS_HUB_COMMIT_WINDOW_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.commit_window),
            timeout: TimeoutPolicy {
                base: env_parse("BIDS_HUB_TIMEOUT_BASE_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(d.timeout.base),
                min_bytes_per_sec: env_parse("BIDS_HUB_MIN_BYTES_PER_SEC")
                    .unwrap_or(d.timeout.min_bytes_per_sec),
                ceiling: env_parse("BIDS_HUB_TIMEOUT_CEILING_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(d.timeout.ceiling),
            },
            verify_polls: env_parse("BIDS_HUB_VERIFY_POLLS").unwrap_or(d.verify_polls),
            verify_interval: env_parse("BIDS_HUB_VERIFY_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.verify_interval),
        }
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.initial_batch_size = Some(size.max(1));
        self
    }

    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    pub fn with_rate_limit(mut self, max_commits: usize, window: Duration) -> Self {
        self.max_commits = max_commits.max(1);
        self.commit_window = window;
        self
    }

    pub fn with_verification(mut self, polls: u32, interval: Duration) -> Self {
        self.verify_polls = polls.max(1);
        self.verify_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: TimeoutPolicy) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Connection to a Hub-style dataset registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    pub endpoint: String,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub repo_type: String,
    pub revision: String,
    pub private: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://huggingface.co".to_string(),
            token: None,
            repo_type: "dataset".to_string(),
            revision: "main".to_string(),
            private: false,
        }
    }
}

impl HubConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            endpoint: env::var("HF_ENDPOINT").unwrap_or(d.endpoint),
            token: env::var("HF_TOKEN")
                .or_else(|_| env::var("HUGGING_FACE_HUB_TOKEN"))
                .ok()
                .filter(|t| !t.is_empty()),
            repo_type: d.repo_type,
            revision: env::var("BIDS_HUB_REVISION").unwrap_or(d.revision),
            private: env_parse("BIDS_HUB_PRIVATE").unwrap_or(d.private),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }
}
