//! Error taxonomy for the report engine.
//!
//! Every internal component raises a variant of [`EngineError`]. The job
//! processor (`crate::processor`) catches all of them at its top level,
//! persists `failed` with the message, and re-raises so the queue's
//! retry/backoff policy applies (see spec §7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// §4.4 step 2: the read endpoint resolved to a writable primary.
    #[error("read endpoint is the writable primary")]
    ReadEndpointIsPrimary,

    /// §4.4 step 3: `sourceCollection` failed the name pattern or allowlist check.
    #[error("sourceCollection '{name}' is not allowed")]
    SourceCollectionNotAllowed { name: String },

    /// §4.4.2 / intake validation: archive format without includeFormats.
    #[error("archive format requires a non-empty includeFormats list")]
    ArchiveRequiresIncludeFormats,

    #[error("includeFormats is only allowed when format = archive")]
    IncludeFormatsNotAllowed,

    #[error("includeFormats contains duplicate entries")]
    DuplicateIncludeFormats,

    #[error("compression = zip is incompatible with format = archive")]
    CompressionArchiveConflict,

    /// §4.3 validation: malformed reduceSpec.
    #[error("reduceSpec validation failed: {message}")]
    ReduceValidation { message: String },

    /// §4.3 accumulator: group cardinality exceeded `maxGroups`.
    #[error("reduce cardinality exceeded maxGroups={max_groups}")]
    ReduceCardinalityExceeded { max_groups: usize },

    /// §4.2 paginated-document generator: row count exceeded `documentMaxRows`.
    #[error("document row limit exceeded: max {max_rows} rows")]
    DocumentRowLimitExceeded { max_rows: usize },

    /// §4.4.1 NDJSON snapshot: cumulative bytes would exceed `maxBytes`.
    #[error("snapshot size exceeded maxBytes={max_bytes}")]
    SnapshotSizeExceeded { max_bytes: u64 },

    /// §6 object storage: policy = required and upload failed.
    #[error("required storage integration failed: {message}")]
    IntegrationRequiredFailure { message: String },

    /// §7: job id not found for {tenant_id}; processor drops the message.
    #[error("report job {job_id} not found for tenant {tenant_id}")]
    NotFound { job_id: String, tenant_id: String },

    /// §4.5 step 3: cron expression failed to parse.
    #[error("invalid cron expression: {message}")]
    InvalidCron { message: String },

    #[error("database error: {message}")]
    Database { message: String },

    #[error("queue error: {message}")]
    Queue { message: String },

    #[error("storage error: {message}")]
    Storage { message: String },

    #[error("io error: {message}")]
    Io { message: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("serialization error: {message}")]
    Serialization { message: String },

    #[error("validation error: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("authentication error: {message}")]
    Auth { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::ReadEndpointIsPrimary => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::SourceCollectionNotAllowed { .. } => StatusCode::BAD_REQUEST,
            EngineError::ArchiveRequiresIncludeFormats
            | EngineError::IncludeFormatsNotAllowed
            | EngineError::DuplicateIncludeFormats
            | EngineError::CompressionArchiveConflict => StatusCode::BAD_REQUEST,
            EngineError::ReduceValidation { .. } => StatusCode::BAD_REQUEST,
            EngineError::ReduceCardinalityExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::DocumentRowLimitExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::SnapshotSizeExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::IntegrationRequiredFailure { .. } => StatusCode::BAD_GATEWAY,
            EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::InvalidCron { .. } => StatusCode::BAD_REQUEST,
            EngineError::Database { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Queue { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Storage { .. } => StatusCode::BAD_GATEWAY,
            EngineError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Serialization { .. } => StatusCode::BAD_REQUEST,
            EngineError::Validation { .. } => StatusCode::BAD_REQUEST,
            EngineError::Auth { .. } => StatusCode::UNAUTHORIZED,
            EngineError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::ReadEndpointIsPrimary => "READ_ENDPOINT_IS_PRIMARY",
            EngineError::SourceCollectionNotAllowed { .. } => "SOURCE_COLLECTION_NOT_ALLOWED",
            EngineError::ArchiveRequiresIncludeFormats => "ARCHIVE_REQUIRES_INCLUDE_FORMATS",
            EngineError::IncludeFormatsNotAllowed => "INCLUDE_FORMATS_NOT_ALLOWED",
            EngineError::DuplicateIncludeFormats => "DUPLICATE_INCLUDE_FORMATS",
            EngineError::CompressionArchiveConflict => "COMPRESSION_ARCHIVE_CONFLICT",
            EngineError::ReduceValidation { .. } => "REDUCE_VALIDATION",
            EngineError::ReduceCardinalityExceeded { .. } => "REDUCE_CARDINALITY_EXCEEDED",
            EngineError::DocumentRowLimitExceeded { .. } => "DOCUMENT_ROW_LIMIT_EXCEEDED",
            EngineError::SnapshotSizeExceeded { .. } => "SNAPSHOT_SIZE_EXCEEDED",
            EngineError::IntegrationRequiredFailure { .. } => "INTEGRATION_REQUIRED_FAILURE",
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::InvalidCron { .. } => "INVALID_CRON",
            EngineError::Database { .. } => "DATABASE_ERROR",
            EngineError::Queue { .. } => "QUEUE_ERROR",
            EngineError::Storage { .. } => "STORAGE_ERROR",
            EngineError::Io { .. } => "IO_ERROR",
            EngineError::Config { .. } => "CONFIG_ERROR",
            EngineError::Serialization { .. } => "SERIALIZATION_ERROR",
            EngineError::Validation { .. } => "VALIDATION_ERROR",
            EngineError::Auth { .. } => "AUTH_ERROR",
            EngineError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Whether the queue should retry a job that failed with this error.
    /// Mirrors §7: validation/shape errors are not productively retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            EngineError::SourceCollectionNotAllowed { .. }
                | EngineError::ArchiveRequiresIncludeFormats
                | EngineError::IncludeFormatsNotAllowed
                | EngineError::DuplicateIncludeFormats
                | EngineError::CompressionArchiveConflict
                | EngineError::ReduceValidation { .. }
                | EngineError::DocumentRowLimitExceeded { .. }
                | EngineError::Validation { .. }
                | EngineError::NotFound { .. }
                | EngineError::InvalidCron { .. }
        )
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}

impl From<mongodb::error::Error> for EngineError {
    fn from(err: mongodb::error::Error) -> Self {
        EngineError::Database {
            message: err.to_string(),
        }
    }
}

impl From<mongodb::bson::oid::Error> for EngineError {
    fn from(err: mongodb::bson::oid::Error) -> Self {
        EngineError::Validation {
            field: "_id".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for EngineError {
    fn from(err: redis::RedisError) -> Self {
        EngineError::Queue {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config {
            message: err.to_string(),
        }
    }
}

impl From<aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::put_object::PutObjectError>>
    for EngineError
{
    fn from(
        err: aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::put_object::PutObjectError>,
    ) -> Self {
        EngineError::Storage {
            message: err.to_string(),
        }
    }
}

impl From<zip::result::ZipError> for EngineError {
    fn from(err: zip::result::ZipError) -> Self {
        EngineError::Internal {
            message: format!("zip error: {err}"),
        }
    }
}
