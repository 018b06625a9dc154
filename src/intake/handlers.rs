//! Route handlers (spec §6 "Concrete intake routes"), grounded on
//! `file-storage-service/src/handlers.rs`'s `State<AppState>` + typed JSON
//! body/response handler shape.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::intake::auth::TenantContext;
use crate::intake::validation::{validate_report_shape, ReportShape};
use crate::intake::AppState;
use crate::model::{
    ArtifactDescriptor, Compression, JobTimestamps, PartitionSpec, ProcessingStats, ReduceSpec,
    ReportFormat, ReportJob, Schedule,
};

#[derive(Debug, Deserialize)]
pub struct SubmitReportRequest {
    pub report_definition_id: String,
    pub format: ReportFormat,
    #[serde(default)]
    pub filters: Option<serde_json::Value>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub compression: Option<Compression>,
    #[serde(default)]
    pub include_formats: Option<Vec<ReportFormat>>,
    #[serde(default)]
    pub reduce_spec: Option<ReduceSpec>,
    #[serde(default)]
    pub partition_spec: Option<PartitionSpec>,
    #[serde(default)]
    pub source_collection: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitReportResponse {
    pub id: String,
    pub status: &'static str,
}

pub async fn submit_report(
    State(state): State<AppState>,
    tenant: TenantContext,
    Json(request): Json<SubmitReportRequest>,
) -> Result<Json<SubmitReportResponse>, EngineError> {
    validate_report_shape(&ReportShape {
        format: request.format,
        include_formats: request.include_formats.as_deref(),
        compression: request.compression,
        reduce_spec: request.reduce_spec.as_ref(),
        source_collection: request.source_collection.as_deref(),
        allowlist: &state.config.source.allowlist,
    })?;

    let now = Utc::now();
    let expire_at = now + chrono::Duration::seconds(state.config.ticker.retention_days * 86_400);
    let job = ReportJob {
        id: None,
        tenant_id: tenant.tenant_id.clone(),
        state: crate::model::JobState::Queued,
        progress: 0,
        row_count: 0,
        report_definition_id: request.report_definition_id,
        format: request.format,
        filters: request.filters,
        timezone: request.timezone,
        locale: request.locale,
        compression: request.compression,
        include_formats: request.include_formats,
        reduce_spec: request.reduce_spec,
        partition_spec: request.partition_spec,
        source_collection: request.source_collection,
        artifact: ArtifactDescriptor::pending(),
        error: None,
        processing_stats: None,
        timestamps: JobTimestamps {
            created_at: Some(now),
            started_at: None,
            finished_at: None,
        },
        expire_at: Some(expire_at),
        extra: Default::default(),
    };

    let job_id = state.jobs.insert(&job).await?;
    state.queue.enqueue(&job_id.to_hex(), &tenant.tenant_id).await?;
    state.metrics.record_started(&tenant.tenant_id);

    Ok(Json(SubmitReportResponse {
        id: job_id.to_hex(),
        status: "queued",
    }))
}

#[derive(Debug, Serialize)]
pub struct ReportStatusResponse {
    pub id: String,
    pub state: &'static str,
    pub progress: u8,
    pub row_count: u64,
    pub processing_stats: Option<ProcessingStats>,
    pub error_message: Option<String>,
}

pub async fn get_report_status(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<String>,
) -> Result<Json<ReportStatusResponse>, EngineError> {
    let object_id = parse_object_id(&id)?;
    let job = find_job_or_404(&state, object_id, &tenant.tenant_id, &id).await?;

    Ok(Json(ReportStatusResponse {
        id,
        state: job.state.as_str(),
        progress: job.progress,
        row_count: job.row_count,
        processing_stats: job.processing_stats,
        error_message: job.error.map(|e| e.message),
    }))
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum DownloadResponse {
    Available {
        available: bool,
        url: String,
    },
    Unavailable {
        available: bool,
        mode: crate::model::ArtifactMode,
        reason: Option<crate::model::ArtifactReason>,
    },
}

pub async fn download_report(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<String>,
) -> Result<Json<DownloadResponse>, EngineError> {
    let object_id = parse_object_id(&id)?;
    let job = find_job_or_404(&state, object_id, &tenant.tenant_id, &id).await?;

    match state.storage.sign_download(&job.artifact).await? {
        Some(url) => Ok(Json(DownloadResponse::Available { available: true, url })),
        None => Ok(Json(DownloadResponse::Unavailable {
            available: false,
            mode: job.artifact.mode,
            reason: job.artifact.reason,
        })),
    }
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub name: String,
    pub cron_expression: String,
    pub timezone: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub report_definition_id: String,
    pub format: ReportFormat,
    #[serde(default)]
    pub filters: Option<serde_json::Value>,
    #[serde(default)]
    pub reduce_spec: Option<ReduceSpec>,
    #[serde(default)]
    pub partition_spec: Option<PartitionSpec>,
    #[serde(default)]
    pub include_formats: Option<Vec<ReportFormat>>,
    #[serde(default)]
    pub compression: Option<Compression>,
    #[serde(default)]
    pub source_collection: Option<String>,
}

fn default_enabled() -> bool {
    true
}

pub async fn create_schedule(
    State(state): State<AppState>,
    tenant: TenantContext,
    Json(request): Json<ScheduleRequest>,
) -> Result<(StatusCode, Json<Schedule>), EngineError> {
    validate_report_shape(&ReportShape {
        format: request.format,
        include_formats: request.include_formats.as_deref(),
        compression: request.compression,
        reduce_spec: request.reduce_spec.as_ref(),
        source_collection: request.source_collection.as_deref(),
        allowlist: &state.config.source.allowlist,
    })?;

    let now = Utc::now();
    let next_run_at = crate::ticker::next_run_for_new_schedule(&request.cron_expression, &request.timezone, now)?;

    let mut schedule = Schedule {
        id: None,
        tenant_id: tenant.tenant_id.clone(),
        name: request.name,
        cron_expression: request.cron_expression,
        timezone: request.timezone,
        enabled: request.enabled,
        report_definition_id: request.report_definition_id,
        format: request.format,
        filters: request.filters,
        reduce_spec: request.reduce_spec,
        partition_spec: request.partition_spec,
        include_formats: request.include_formats,
        compression: request.compression,
        source_collection: request.source_collection,
        next_run_at: if request.enabled { Some(next_run_at) } else { None },
        last_run_at: None,
        created_at: now,
        updated_at: now,
    };

    let id = state.schedules.create(&schedule).await?;
    schedule.id = Some(id);
    Ok((StatusCode::CREATED, Json(schedule)))
}

pub async fn list_schedules(
    State(state): State<AppState>,
    tenant: TenantContext,
) -> Result<Json<Vec<Schedule>>, EngineError> {
    Ok(Json(state.schedules.list(&tenant.tenant_id).await?))
}

pub async fn get_schedule(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<String>,
) -> Result<Json<Schedule>, EngineError> {
    let object_id = parse_object_id(&id)?;
    state
        .schedules
        .get(object_id, &tenant.tenant_id)
        .await?
        .map(Json)
        .ok_or(EngineError::NotFound {
            job_id: id,
            tenant_id: tenant.tenant_id,
        })
}

pub async fn update_schedule(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<String>,
    Json(request): Json<ScheduleRequest>,
) -> Result<Json<Schedule>, EngineError> {
    validate_report_shape(&ReportShape {
        format: request.format,
        include_formats: request.include_formats.as_deref(),
        compression: request.compression,
        reduce_spec: request.reduce_spec.as_ref(),
        source_collection: request.source_collection.as_deref(),
        allowlist: &state.config.source.allowlist,
    })?;

    let object_id = parse_object_id(&id)?;
    let existing = state
        .schedules
        .get(object_id, &tenant.tenant_id)
        .await?
        .ok_or_else(|| EngineError::NotFound {
            job_id: id.clone(),
            tenant_id: tenant.tenant_id.clone(),
        })?;

    let now = Utc::now();
    let next_run_at = crate::ticker::next_run_for_new_schedule(&request.cron_expression, &request.timezone, now)?;

    let schedule = Schedule {
        id: Some(object_id),
        tenant_id: tenant.tenant_id.clone(),
        name: request.name,
        cron_expression: request.cron_expression,
        timezone: request.timezone,
        enabled: request.enabled,
        report_definition_id: request.report_definition_id,
        format: request.format,
        filters: request.filters,
        reduce_spec: request.reduce_spec,
        partition_spec: request.partition_spec,
        include_formats: request.include_formats,
        compression: request.compression,
        source_collection: request.source_collection,
        next_run_at: if request.enabled { Some(next_run_at) } else { None },
        last_run_at: existing.last_run_at,
        created_at: existing.created_at,
        updated_at: now,
    };

    state.schedules.update(object_id, &tenant.tenant_id, &schedule).await?;
    Ok(Json(schedule))
}

pub async fn delete_schedule(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(id): Path<String>,
) -> Result<StatusCode, EngineError> {
    let object_id = parse_object_id(&id)?;
    state.schedules.delete(object_id, &tenant.tenant_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn metrics(State(state): State<AppState>) -> Result<impl axum::response::IntoResponse, EngineError> {
    let body = state.metrics.export()?;
    Ok((
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

fn parse_object_id(id: &str) -> Result<ObjectId, EngineError> {
    ObjectId::parse_str(id).map_err(|_| EngineError::Validation {
        field: "id".to_string(),
        message: "not a valid id".to_string(),
    })
}

async fn find_job_or_404(
    state: &AppState,
    id: ObjectId,
    tenant_id: &str,
    raw_id: &str,
) -> Result<ReportJob, EngineError> {
    state
        .jobs
        .find_by_id_and_tenant(id, tenant_id)
        .await?
        .ok_or_else(|| EngineError::NotFound {
            job_id: raw_id.to_string(),
            tenant_id: tenant_id.to_string(),
        })
}

