//! Client upload settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{DEFAULT_CHUNK_SIZE, DEFAULT_CONCURRENCY_LIMIT};

/// Settings shared by every session created from one [`Uploader`](crate::Uploader).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSettings {
    /// Resumable upload endpoint handed to each transport.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Maximum number of transports running at once per session.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Retry backoff schedule in milliseconds, consumed by the transport.
    #[serde(default = "default_retry_delays_ms")]
    pub retry_delays_ms: Vec<u64>,

    /// Progress tracker tick in milliseconds.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Upper bound for waiting on a session to settle. `None` waits forever.
    #[serde(default)]
    pub wait_timeout_ms: Option<u64>,
}

fn default_endpoint() -> String {
    "http://localhost:8080/api/tus".into()
}

fn default_concurrency_limit() -> usize {
    DEFAULT_CONCURRENCY_LIMIT
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_retry_delays_ms() -> Vec<u64> {
    vec![0, 1000, 3000, 5000, 10000]
}

fn default_progress_interval_ms() -> u64 {
    500
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            concurrency_limit: default_concurrency_limit(),
            chunk_size: default_chunk_size(),
            retry_delays_ms: default_retry_delays_ms(),
            progress_interval_ms: default_progress_interval_ms(),
            wait_timeout_ms: None,
        }
    }
}

impl UploadSettings {
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }
}
