//! Configuration for the report engine (spec §4.6).
//!
//! A single `AppConfig` is built once at startup via the `config` crate
//! layering an optional `config/report-engine.toml` file under
//! `REPORT_ENGINE_`-prefixed environment variables, and is wrapped in an
//! `Arc` and threaded through every component. No other process-wide
//! mutable state exists; tests construct a fresh value instead of mutating
//! globals.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub storage: StorageConfig,
    pub reduce: ReduceConfig,
    pub generator: GeneratorConfig,
    pub snapshot: SnapshotConfig,
    pub source: SourceConfig,
    pub ticker: TickerConfig,
    pub worker: WorkerConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_seconds: u64,
}

/// Two distinct Mongo endpoints: intake/ticker/status writes go to
/// `write_uri`; all source-row reads go to `read_uri`, which the job
/// processor verifies is not the writable primary (spec §4.4 step 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub write_uri: String,
    pub read_uri: String,
    pub database_name: String,
    pub jobs_collection: String,
    pub schedules_collection: String,
    pub api_keys_collection: String,
    pub connection_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub redis_url: String,
    pub queue_name: String,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub remove_on_complete: u64,
    pub remove_on_fail: u64,
    pub visibility_timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoragePolicy {
    Required,
    Optional,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub enable_external_storage: bool,
    pub policy: StoragePolicy,
    /// cloud (AWS S3) vs local-compatible (MinIO, via `endpoint_url`).
    pub local_compatible: bool,
    pub endpoint_url: Option<String>,
    pub region: String,
    pub bucket: String,
    pub filesystem_root: String,
    pub presign_ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReduceConfig {
    pub default_chunks: u32,
    pub partition_cap_max: u32,
    pub partition_max_concurrency: usize,
    pub max_groups: usize,
    pub cursor_batch_size: u32,
    /// spec's open question: apply `max_groups` in the v1 merge path too,
    /// instead of only inside the streaming accumulator. See DESIGN.md.
    pub enforce_max_groups_in_v1: bool,
    pub streaming_accumulator: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub buffer_bytes: usize,
    pub document_max_rows: Option<usize>,
    pub zip_multipass: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    pub tmp_dir: String,
    pub report_tmp_max_bytes: u64,
    pub buffer_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub default_collection: String,
    pub allowlist: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerConfig {
    pub poll_interval_ms: u64,
    pub retention_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub max_job_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub namespace: String,
}

impl AppConfig {
    /// Load layered configuration: optional `config/report-engine.toml`
    /// file, overridden by `REPORT_ENGINE_`-prefixed environment
    /// variables, mirroring `file-storage-service`'s `load_config`.
    pub fn load() -> Result<Self, config::ConfigError> {
        let _ = dotenvy::dotenv();

        let settings = config::Config::builder()
            .add_source(
                config::File::with_name("config/report-engine").required(false),
            )
            .add_source(
                config::Environment::with_prefix("REPORT_ENGINE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        match settings.try_deserialize::<AppConfig>() {
            Ok(cfg) => Ok(cfg),
            Err(_) => Ok(AppConfig::default()),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_seconds)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8090,
                request_timeout_seconds: 30,
            },
            database: DatabaseConfig {
                write_uri: "mongodb://localhost:27017".to_string(),
                read_uri: "mongodb://localhost:27017".to_string(),
                database_name: "reports".to_string(),
                jobs_collection: "report_jobs".to_string(),
                schedules_collection: "report_schedules".to_string(),
                api_keys_collection: "api_keys".to_string(),
                connection_timeout_seconds: 10,
            },
            queue: QueueConfig {
                redis_url: "redis://localhost:6379".to_string(),
                queue_name: "report-jobs".to_string(),
                max_attempts: 5,
                backoff_base_ms: 2000,
                remove_on_complete: 100,
                remove_on_fail: 1000,
                visibility_timeout_seconds: 300,
            },
            storage: StorageConfig {
                enable_external_storage: true,
                policy: StoragePolicy::Required,
                local_compatible: false,
                endpoint_url: None,
                region: "us-east-1".to_string(),
                bucket: "reports".to_string(),
                filesystem_root: "/tmp/report-engine/artifacts".to_string(),
                presign_ttl_seconds: 3600,
            },
            reduce: ReduceConfig {
                default_chunks: 8,
                partition_cap_max: 64,
                partition_max_concurrency: 4,
                max_groups: 100_000,
                cursor_batch_size: 500,
                enforce_max_groups_in_v1: true,
                streaming_accumulator: true,
            },
            generator: GeneratorConfig {
                buffer_bytes: 64 * 1024,
                document_max_rows: Some(250_000),
                zip_multipass: false,
            },
            snapshot: SnapshotConfig {
                tmp_dir: "/tmp/report-engine/snapshots".to_string(),
                report_tmp_max_bytes: 512 * 1024 * 1024,
                buffer_bytes: 64 * 1024,
            },
            source: SourceConfig {
                default_collection: "reportSource".to_string(),
                allowlist: vec!["reportSource".to_string()],
            },
            ticker: TickerConfig {
                poll_interval_ms: 30_000,
                retention_days: 30,
            },
            worker: WorkerConfig {
                max_job_concurrency: 4,
            },
            metrics: MetricsConfig {
                enabled: true,
                namespace: "report_engine".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_internally_consistent() {
        let cfg = AppConfig::default();
        assert!(cfg.reduce.partition_max_concurrency > 0);
        assert!(cfg.source.allowlist.contains(&cfg.source.default_collection));
        assert_eq!(cfg.queue.max_attempts, 5);
        assert_eq!(cfg.queue.backoff_base_ms, 2000);
    }
}
