use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::cache::CacheCapacities;

#[derive(Serialize, Deserialize, Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Configuration {
    #[clap(long, env = "LSIF_STORAGE_ROOT", default_value_os_t = default_storage_root())]
    #[serde(default = "default_storage_root")]
    /// Directory holding uploads, temp files and converted dumps
    pub storage_root: PathBuf,

    #[clap(long, env = "HTTP_PORT", default_value_t = default_http_port())]
    #[serde(default = "default_http_port")]
    /// Port the HTTP surface listens on
    pub http_port: u16,

    #[clap(long, env = "WORKER_METRICS_PORT", default_value_t = default_worker_metrics_port())]
    #[serde(default = "default_worker_metrics_port")]
    /// Port the worker serves its metrics on
    pub worker_metrics_port: u16,

    #[clap(long, default_value_t = default_host())]
    #[serde(default = "default_host")]
    /// Bind address for both servers
    pub host: String,

    #[clap(long, env = "HEADS_JOB_SCHEDULE_INTERVAL", default_value_t = default_heads_interval_secs())]
    #[serde(default = "default_heads_interval_secs")]
    /// Seconds between update-tips jobs
    pub heads_interval_secs: u64,

    #[clap(long, default_value_t = default_connection_cache_capacity())]
    #[serde(default = "default_connection_cache_capacity")]
    /// Open dump-database handles kept resident
    pub connection_cache_capacity: u64,

    #[clap(long, default_value_t = default_data_cache_capacity())]
    #[serde(default = "default_data_cache_capacity")]
    /// Decoded document cache capacity, in estimated bytes
    pub document_cache_capacity: u64,

    #[clap(long, default_value_t = default_data_cache_capacity())]
    #[serde(default = "default_data_cache_capacity")]
    /// Decoded result-chunk cache capacity, in estimated bytes
    pub result_chunk_cache_capacity: u64,

    #[clap(long, default_value_t = default_max_attempts())]
    #[serde(default = "default_max_attempts")]
    /// Executions a job gets before it is marked errored
    pub job_max_attempts: i64,

    #[clap(long, default_value_t = default_job_poll_interval_ms())]
    #[serde(default = "default_job_poll_interval_ms")]
    /// Worker poll interval when the queue is empty, in milliseconds
    pub job_poll_interval_ms: u64,

    #[clap(long, default_value_t = default_job_timeout_secs())]
    #[serde(default = "default_job_timeout_secs")]
    /// Wall-clock limit for a single job execution, in seconds
    pub job_timeout_secs: u64,

    #[clap(long, default_value_t = default_backoff_base_secs())]
    #[serde(default = "default_backoff_base_secs")]
    /// Base of the exponential retry backoff
    pub job_backoff_base_secs: u64,

    #[clap(long, default_value_t = default_request_timeout_secs())]
    #[serde(default = "default_request_timeout_secs")]
    /// Deadline applied to each code-intelligence request
    pub request_timeout_secs: u64,
}

impl Configuration {
    /// Directory where logs are written to
    pub fn log_dir(&self) -> PathBuf {
        self.storage_root.join("logs")
    }

    /// Path of the shared cross-repo/job database
    pub fn shared_db_path(&self) -> PathBuf {
        self.storage_root.join("xrepo.db")
    }

    pub fn cache_capacities(&self) -> CacheCapacities {
        CacheCapacities {
            connections: self.connection_cache_capacity,
            documents: self.document_cache_capacity,
            result_chunks: self.result_chunk_cache_capacity,
        }
    }

    pub fn job_poll_interval(&self) -> Duration {
        Duration::from_millis(self.job_poll_interval_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn job_backoff_base(&self) -> Duration {
        Duration::from_secs(self.job_backoff_base_secs)
    }

    pub fn heads_interval(&self) -> Duration {
        Duration::from_secs(self.heads_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[cfg(test)]
    pub(crate) fn for_tests(storage_root: PathBuf) -> Self {
        let mut config = Self::parse_from(["codenav"]);
        config.storage_root = storage_root;
        config.job_backoff_base_secs = 0;
        config.job_poll_interval_ms = 10;
        config
    }
}

fn default_storage_root() -> PathBuf {
    match directories::ProjectDirs::from("dev", "codenav", "codenav") {
        Some(dirs) => dirs.data_dir().to_owned(),
        None => "lsif-storage".into(),
    }
}

fn default_http_port() -> u16 {
    3186
}

fn default_worker_metrics_port() -> u16 {
    3187
}

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

fn default_heads_interval_secs() -> u64 {
    30
}

fn default_connection_cache_capacity() -> u64 {
    100
}

fn default_data_cache_capacity() -> u64 {
    100 * 1024 * 1024
}

fn default_max_attempts() -> i64 {
    10
}

fn default_job_poll_interval_ms() -> u64 {
    1000
}

fn default_job_timeout_secs() -> u64 {
    600
}

fn default_backoff_base_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    30
}
