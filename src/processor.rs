//! C4: Job Processor (spec §4.4) — the per-job control flow from load
//! through terminal persistence, plus the worker-pool dispatch loop that
//! pulls jobs off the queue with a concurrency cap. The dispatch loop
//! mirrors `notification-service/src/manager.rs::send_bulk_notifications`'s
//! `Semaphore`-gated fan-out rather than a fixed pool of long-lived worker
//! tasks, since job arrival is queue-driven rather than batch-driven.

use crate::config::AppConfig;
use crate::error::EngineError;
use crate::generators::{self, generate_archive, ArchiveEntry, GeneratedStream, RowStream, StreamOptions};
use crate::model::{Compression, JobError, ProcessingStats, ReportFormat, ReportJob, ZipStrategy};
use crate::queue::{QueueMessage, ReportQueue};
use crate::reduce;
use crate::snapshot;
use crate::store::{resolve_source_collection, verify_not_primary, JobStore, SourceClient};
use crate::storage::{ObjectStorage, UploadContext};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::Database;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct Processor {
    config: Arc<AppConfig>,
    read_database: Database,
    job_store: JobStore,
    storage: ObjectStorage,
}

struct PlanOutcome {
    generated: GeneratedStream,
    rows_in: Arc<AtomicU64>,
    rows_out: Arc<AtomicU64>,
    zip_strategy: Option<ZipStrategy>,
    entries: Option<Vec<String>>,
}

impl Processor {
    pub fn new(
        config: Arc<AppConfig>,
        read_database: Database,
        job_store: JobStore,
        storage: ObjectStorage,
    ) -> Self {
        Self {
            config,
            read_database,
            job_store,
            storage,
        }
    }

    /// Runs the full §4.4 control flow for one queue message. Callers
    /// (`run_worker_pool`) ack on `Ok`, and nack/ack-and-drop on `Err`
    /// depending on `EngineError::is_retryable`.
    #[tracing::instrument(skip(self, message), fields(job_id = %message.report_job_id, tenant_id = %message.tenant_id))]
    pub async fn process_job(&self, message: &QueueMessage) -> Result<(), EngineError> {
        let id = ObjectId::parse_str(&message.report_job_id)?;
        let tenant_id = message.tenant_id.clone();

        let Some(job) = self.job_store.find_by_id_and_tenant(id, &tenant_id).await? else {
            tracing::warn!("report job not found for tenant, dropping message");
            return Ok(());
        };

        let started_at = Utc::now();
        self.job_store.mark_running(id, &tenant_id, started_at).await?;

        let mut snapshot_path: Option<PathBuf> = None;
        let outcome = self.run_job(&job, id, &tenant_id, started_at, &mut snapshot_path).await;

        if let Some(path) = &snapshot_path {
            snapshot::cleanup_snapshot(path).await;
        }

        match outcome {
            Ok(()) => Ok(()),
            Err(err) => {
                let finished_at = Utc::now();
                let job_error = JobError {
                    message: err.to_string(),
                    code: Some(err.error_code().to_string()),
                };
                if let Err(persist_err) = self
                    .job_store
                    .mark_failed(id, &tenant_id, &job_error, finished_at)
                    .await
                {
                    tracing::error!(error = %persist_err, "failed to persist job failure state");
                }
                Err(err)
            }
        }
    }

    /// Steps 2-8 of §4.4: everything between `running` and the terminal
    /// `uploaded` state. Errors here are caught by `process_job`, which
    /// persists `failed` and re-raises.
    async fn run_job(
        &self,
        job: &ReportJob,
        id: ObjectId,
        tenant_id: &str,
        started_at: DateTime<Utc>,
        snapshot_path: &mut Option<PathBuf>,
    ) -> Result<(), EngineError> {
        verify_not_primary(&self.read_database).await?;

        let collection_name = resolve_source_collection(
            job.source_collection.as_deref(),
            &self.config.source.default_collection,
            &self.config.source.allowlist,
        )?;

        // §4.1 C1: filters are untrusted input and must be stripped of
        // `$`-operator and dotted-path keys before they ever reach a Mongo
        // filter document (§4.3/§4.4 step 4, §8 sanitizeFilters invariant).
        let sanitized_filters = job
            .filters
            .as_ref()
            .map(crate::normalize::sanitize_filters)
            .unwrap_or_default();

        let source = SourceClient::new(
            &self.read_database,
            &collection_name,
            tenant_id,
            &sanitized_filters,
            &self.config.reduce,
        )?;

        let plan = self.build_plan(job, id, &source, snapshot_path).await?;

        self.job_store.mark_uploading(id, tenant_id).await?;

        let key = format!("{}/{}/report.{}", tenant_id, id.to_hex(), plan.generated.extension);
        let ctx = UploadContext {
            tenant_id: tenant_id.to_string(),
            job_id: id.to_hex(),
        };
        let mut artifact = self
            .storage
            .upload(&key, plan.generated.content_type, plan.generated.body, &ctx)
            .await?;
        artifact.entries = plan.entries;

        let rows_out = plan.rows_out.load(Ordering::Acquire);
        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(1) as u64;
        let throughput = rows_out as f64 / (duration_ms as f64 / 1000.0);
        let processing_stats = ProcessingStats {
            duration_ms,
            throughput_rows_per_second: (throughput * 100.0).round() / 100.0,
            memory_peak_bytes: current_rss_bytes(),
            zip_strategy: plan.zip_strategy,
        };

        self.job_store
            .mark_uploaded(id, tenant_id, rows_out, &artifact, &processing_stats, finished_at)
            .await?;
        Ok(())
    }

    /// Step 4: picks exactly one of the four plan modes and returns the
    /// generator output plus the row counters the caller needs for
    /// `processingStats`/`rowCount`.
    async fn build_plan(
        &self,
        job: &ReportJob,
        id: ObjectId,
        source: &SourceClient,
        snapshot_path: &mut Option<PathBuf>,
    ) -> Result<PlanOutcome, EngineError> {
        let stream_opts = StreamOptions {
            buffer_bytes: self.config.generator.buffer_bytes,
            document_max_rows: self.config.generator.document_max_rows,
        };

        if let Some(reduce_spec) = &job.reduce_spec {
            return self.build_reduce_plan(job, source, reduce_spec, stream_opts).await;
        }

        if job.format == ReportFormat::Archive {
            let include_formats = job
                .include_formats
                .clone()
                .filter(|v| !v.is_empty())
                .ok_or(EngineError::ArchiveRequiresIncludeFormats)?;

            return if self.config.generator.zip_multipass {
                self.build_archive_multipass_plan(source, &include_formats, stream_opts).await
            } else {
                self.build_archive_snapshot_plan(id, source, &include_formats, stream_opts, snapshot_path)
                    .await
            };
        }

        self.build_raw_plan(job, source, stream_opts).await
    }

    async fn build_reduce_plan(
        &self,
        job: &ReportJob,
        source: &SourceClient,
        reduce_spec: &crate::model::ReduceSpec,
        stream_opts: StreamOptions,
    ) -> Result<PlanOutcome, EngineError> {
        let partition = job.partition_spec.clone().unwrap_or_default();
        let now_ms: Arc<dyn Fn() -> u64 + Send + Sync> =
            Arc::new(|| Utc::now().timestamp_millis().max(0) as u64);

        let result = reduce::reduce(
            Arc::new(source.clone()),
            &partition,
            reduce_spec,
            &self.config.reduce,
            now_ms,
        )
        .await?;

        let rows_in = Arc::new(AtomicU64::new(result.rows_in));
        let rows_out = Arc::new(AtomicU64::new(result.rows_out));
        let rows = result.rows;

        if job.format == ReportFormat::Archive {
            let include_formats = job
                .include_formats
                .clone()
                .filter(|v| !v.is_empty())
                .ok_or(EngineError::ArchiveRequiresIncludeFormats)?;

            let mut entries = Vec::new();
            let mut entry_names = Vec::new();
            for format in &include_formats {
                let rows_stream: RowStream = Box::pin(futures::stream::iter(rows.clone().into_iter().map(Ok)));
                let generated = generators::generate(to_single_format(*format), rows_stream, stream_opts);
                entry_names.push(format!("report.{}", generated.extension));
                entries.push(ArchiveEntry {
                    name: format!("report.{}", generated.extension),
                    body: generated.body,
                });
            }
            let generated = generate_archive(entries, stream_opts);
            return Ok(PlanOutcome {
                generated,
                rows_in,
                rows_out,
                zip_strategy: None,
                entries: Some(entry_names),
            });
        }

        let row_stream: RowStream = Box::pin(futures::stream::iter(rows.into_iter().map(Ok)));
        let generated = generators::generate(to_single_format(job.format), row_stream, stream_opts);
        Ok(PlanOutcome {
            generated,
            rows_in,
            rows_out,
            zip_strategy: None,
            entries: None,
        })
    }

    async fn build_archive_multipass_plan(
        &self,
        source: &SourceClient,
        include_formats: &[ReportFormat],
        stream_opts: StreamOptions,
    ) -> Result<PlanOutcome, EngineError> {
        let max_id = source.max_id().await?;
        let counter = Arc::new(AtomicU64::new(0));

        let mut entries = Vec::new();
        let mut entry_names = Vec::new();
        for (i, format) in include_formats.iter().enumerate() {
            let cursor = source.raw_cursor(max_id.clone());
            let rows = if i == 0 {
                counting_stream(cursor, counter.clone())
            } else {
                cursor
            };
            let generated = generators::generate(to_single_format(*format), rows, stream_opts);
            entry_names.push(format!("report.{}", generated.extension));
            entries.push(ArchiveEntry {
                name: format!("report.{}", generated.extension),
                body: generated.body,
            });
        }
        let generated = generate_archive(entries, stream_opts);
        Ok(PlanOutcome {
            generated,
            rows_in: counter.clone(),
            rows_out: counter,
            zip_strategy: Some(ZipStrategy::Multipass),
            entries: Some(entry_names),
        })
    }

    async fn build_archive_snapshot_plan(
        &self,
        id: ObjectId,
        source: &SourceClient,
        include_formats: &[ReportFormat],
        stream_opts: StreamOptions,
        snapshot_path: &mut Option<PathBuf>,
    ) -> Result<PlanOutcome, EngineError> {
        let counter = Arc::new(AtomicU64::new(0));
        let cursor = counting_stream(source.raw_cursor(None), counter.clone());

        let dir = PathBuf::from(&self.config.snapshot.tmp_dir);
        // §6 "NDJSON snapshot layout": snapshot-<jobId>-<epochMs>-<uuid>.ndjson
        let name = format!(
            "snapshot-{}-{}-{}.ndjson",
            id.to_hex(),
            Utc::now().timestamp_millis(),
            uuid::Uuid::new_v4()
        );
        let snapshot = snapshot::write_snapshot(
            cursor,
            &dir,
            &name,
            self.config.snapshot.report_tmp_max_bytes,
            self.config.snapshot.buffer_bytes,
        )
        .await?;
        *snapshot_path = Some(snapshot.path.clone());

        let mut entries = Vec::new();
        let mut entry_names = Vec::new();
        for format in include_formats {
            let rows = snapshot::snapshot_rows(snapshot.path.clone(), self.config.snapshot.buffer_bytes);
            let generated = generators::generate(to_single_format(*format), rows, stream_opts);
            entry_names.push(format!("report.{}", generated.extension));
            entries.push(ArchiveEntry {
                name: format!("report.{}", generated.extension),
                body: generated.body,
            });
        }
        let generated = generate_archive(entries, stream_opts);
        Ok(PlanOutcome {
            generated,
            rows_in: counter.clone(),
            rows_out: Arc::new(AtomicU64::new(snapshot.row_count)),
            zip_strategy: Some(ZipStrategy::Snapshot),
            entries: Some(entry_names),
        })
    }

    async fn build_raw_plan(
        &self,
        job: &ReportJob,
        source: &SourceClient,
        stream_opts: StreamOptions,
    ) -> Result<PlanOutcome, EngineError> {
        let counter = Arc::new(AtomicU64::new(0));
        let cursor = counting_stream(source.raw_cursor(None), counter.clone());
        let mut generated = generators::generate(to_single_format(job.format), cursor, stream_opts);

        if job.compression == Some(Compression::Zip) {
            let entry_name = format!("report.{}", generated.extension);
            generated = generate_archive(
                vec![ArchiveEntry {
                    name: entry_name,
                    body: generated.body,
                }],
                stream_opts,
            );
        }

        Ok(PlanOutcome {
            generated,
            rows_in: counter.clone(),
            rows_out: counter,
            zip_strategy: None,
            entries: None,
        })
    }
}

fn to_single_format(format: ReportFormat) -> generators::SingleFormat {
    match format {
        ReportFormat::Delimited => generators::SingleFormat::Delimited,
        ReportFormat::StructuredObject => generators::SingleFormat::StructuredObject,
        ReportFormat::Spreadsheet => generators::SingleFormat::Spreadsheet,
        ReportFormat::Paginated => generators::SingleFormat::Paginated,
        ReportFormat::Archive => unreachable!("archive is handled by the caller before reaching a single generator"),
    }
}

/// Wraps a row stream with a pass-through counter, incremented once per
/// successfully-yielded row. Errors are not counted.
fn counting_stream(rows: RowStream, counter: Arc<AtomicU64>) -> RowStream {
    Box::pin(rows.inspect(move |row| {
        if row.is_ok() {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }))
}

/// Best-effort peak resident-set size in bytes, read from
/// `/proc/self/status`. Returns 0 on platforms without `/proc` (the stat is
/// advisory per spec §4.4 step 7, not load-bearing).
fn current_rss_bytes() -> u64 {
    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        return 0;
    };
    status
        .lines()
        .find(|line| line.starts_with("VmHWM:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
        .unwrap_or(0)
}

/// Dispatches queue messages with a bound of `max_concurrency` concurrent
/// jobs, the same `Semaphore`-gated fan-out
/// `notification-service/src/manager.rs` uses for its bulk-send path.
/// `shutdown` going to `true` stops claiming new work; jobs already
/// dispatched onto the semaphore keep running to completion (§5 "drain the
/// worker pool").
pub async fn run_worker_pool(
    processor: Arc<Processor>,
    queue: ReportQueue,
    max_concurrency: usize,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let semaphore = Arc::new(tokio::sync::Semaphore::new(max_concurrency.max(1)));

    loop {
        if *shutdown.borrow() {
            tracing::info!("worker pool draining in-flight jobs before shutdown");
            let _ = semaphore.acquire_many(max_concurrency.max(1) as u32).await;
            break;
        }

        if let Err(err) = queue.requeue_due(Utc::now().timestamp_millis()).await {
            tracing::warn!(error = %err, "failed to requeue delayed report jobs");
        }

        match queue.claim().await {
            Ok(Some(message)) => {
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("worker pool semaphore is never closed");
                let processor = Arc::clone(&processor);
                let queue = queue.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    match processor.process_job(&message).await {
                        Ok(()) => {
                            if let Err(err) = queue.ack(&message).await {
                                tracing::error!(error = %err, "failed to ack completed report job");
                            }
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, retryable = err.is_retryable(), "report job failed");
                            if err.is_retryable() {
                                if let Err(err) = queue.nack(message, Utc::now().timestamp_millis()).await {
                                    tracing::error!(error = %err, "failed to nack failed report job");
                                }
                            } else if let Err(err) = queue.ack(&message).await {
                                tracing::error!(error = %err, "failed to ack non-retryable failed report job");
                            }
                        }
                    }
                });
            }
            Ok(None) => tokio::time::sleep(Duration::from_millis(250)).await,
            Err(err) => {
                tracing::error!(error = %err, "failed to claim a report job from the queue");
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Row;

    #[test]
    fn to_single_format_maps_every_non_archive_variant() {
        assert!(matches!(to_single_format(ReportFormat::Delimited), generators::SingleFormat::Delimited));
        assert!(matches!(
            to_single_format(ReportFormat::StructuredObject),
            generators::SingleFormat::StructuredObject
        ));
        assert!(matches!(to_single_format(ReportFormat::Spreadsheet), generators::SingleFormat::Spreadsheet));
        assert!(matches!(to_single_format(ReportFormat::Paginated), generators::SingleFormat::Paginated));
    }

    #[test]
    #[should_panic(expected = "archive is handled by the caller")]
    fn to_single_format_rejects_archive() {
        to_single_format(ReportFormat::Archive);
    }

    #[tokio::test]
    async fn counting_stream_counts_only_successful_rows() {
        let rows: Vec<Result<Row, EngineError>> = vec![
            Ok(Row::default()),
            Err(EngineError::Internal { message: "boom".to_string() }),
            Ok(Row::default()),
        ];
        let counter = Arc::new(AtomicU64::new(0));
        let mut counted = counting_stream(Box::pin(futures::stream::iter(rows)), counter.clone());

        let mut yielded = 0;
        while counted.next().await.is_some() {
            yielded += 1;
        }

        assert_eq!(yielded, 3);
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn current_rss_bytes_never_panics() {
        let _ = current_rss_bytes();
    }
}
