use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{ArtifactDescriptor, PartitionSpec, ReduceSpec};

/// Lifecycle state. Transitions are monotone along
/// `queued -> running -> uploading -> uploaded`; `failed` is reachable
/// from any non-terminal state (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Uploading,
    Uploaded,
    Failed,
    Expired,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Uploaded | JobState::Failed | JobState::Expired)
    }

    /// The wire/storage representation, matching the `snake_case` serde rename.
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Uploading => "uploading",
            JobState::Uploaded => "uploaded",
            JobState::Failed => "failed",
            JobState::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportFormat {
    Delimited,
    StructuredObject,
    Spreadsheet,
    Paginated,
    Archive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    None,
    Zip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZipStrategy {
    Multipass,
    Snapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub message: String,
    pub code: Option<String>,
}

/// `{durationMs, throughputRowsPerSecond, memoryPeakBytes, zipStrategy}`
/// — spec §4.4 step 7, ambient per §4.4 ProcessingStats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub duration_ms: u64,
    pub throughput_rows_per_second: f64,
    pub memory_peak_bytes: u64,
    pub zip_strategy: Option<ZipStrategy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobTimestamps {
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportJob {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub tenant_id: String,
    pub state: JobState,
    pub progress: u8,
    pub row_count: u64,

    pub report_definition_id: String,
    pub format: ReportFormat,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<Compression>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_formats: Option<Vec<ReportFormat>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduce_spec: Option<ReduceSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_spec: Option<PartitionSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_collection: Option<String>,

    pub artifact: ArtifactDescriptor,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_stats: Option<ProcessingStats>,

    #[serde(flatten)]
    pub timestamps: JobTimestamps,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}
