//! C5: Schedule Ticker (spec §4.5). Grounded on the teacher's
//! `notification-service/src/scheduler.rs` background-task shape (a
//! `tokio::time::interval` loop selected against a shutdown signal), but
//! replaces its in-process `tokio_cron_scheduler::JobScheduler` with direct
//! `cron` crate parsing: schedules are DB rows claimed with a conditional
//! update, not jobs registered in-process, so per-tick DB-driven dispatch
//! fits better than a registered-job scheduler.

use crate::config::TickerConfig;
use crate::error::EngineError;
use crate::model::{ArtifactDescriptor, JobState, JobTimestamps, ReportJob, Schedule};
use crate::queue::ReportQueue;
use crate::store::{JobStore, ScheduleStore};
use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub struct Ticker {
    schedule_store: ScheduleStore,
    job_store: JobStore,
    queue: ReportQueue,
    config: TickerConfig,
    running: AtomicBool,
}

impl Ticker {
    pub fn new(
        schedule_store: ScheduleStore,
        job_store: JobStore,
        queue: ReportQueue,
        config: TickerConfig,
    ) -> Self {
        Self {
            schedule_store,
            job_store,
            queue,
            config,
            running: AtomicBool::new(false),
        }
    }

    /// Step 1: re-entrancy guard, then loop over due schedules until none
    /// remain.
    pub async fn tick(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            tracing::debug!("skipping schedule tick: a previous tick is still running");
            return;
        }

        if let Err(err) = self.drain_due_schedules().await {
            tracing::error!(error = %err, "schedule tick failed");
        }

        self.running.store(false, Ordering::Release);
    }

    async fn drain_due_schedules(&self) -> Result<(), EngineError> {
        loop {
            let now = Utc::now();
            let Some(schedule) = self.schedule_store.find_due(now).await? else {
                return Ok(());
            };
            self.fire_schedule(schedule, now).await?;
        }
    }

    /// Steps 3-6 for one due schedule.
    async fn fire_schedule(&self, schedule: Schedule, now: DateTime<Utc>) -> Result<(), EngineError> {
        let id = schedule.id.ok_or_else(|| EngineError::Internal {
            message: "due schedule is missing its _id".to_string(),
        })?;
        let prev_next_run_at = schedule.next_run_at.unwrap_or(now);

        let computed_next_run_at =
            match compute_next_run(&schedule.cron_expression, &schedule.timezone, now) {
                Ok(next) => next,
                Err(err) => {
                    tracing::warn!(schedule_id = %id, error = %err, "disabling schedule with an invalid cron expression");
                    self.schedule_store.disable(id).await?;
                    return Ok(());
                }
            };

        let claimed = self
            .schedule_store
            .try_advance(id, prev_next_run_at, now, computed_next_run_at)
            .await?;
        if !claimed {
            // Another ticker instance (or a concurrent tick) already advanced it.
            return Ok(());
        }

        let expire_at = now + chrono::Duration::seconds(self.config.retention_days * 86_400);
        let job = ReportJob {
            id: None,
            tenant_id: schedule.tenant_id.clone(),
            state: JobState::Queued,
            progress: 0,
            row_count: 0,
            report_definition_id: schedule.report_definition_id.clone(),
            format: schedule.format,
            filters: schedule.filters.clone(),
            timezone: Some(schedule.timezone.clone()),
            locale: None,
            compression: schedule.compression,
            include_formats: schedule.include_formats.clone(),
            reduce_spec: schedule.reduce_spec.clone(),
            partition_spec: schedule.partition_spec.clone(),
            source_collection: schedule.source_collection.clone(),
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

        let job_id = self.job_store.insert(&job).await?;
        self.queue.enqueue(&job_id.to_hex(), &schedule.tenant_id).await?;
        Ok(())
    }

    /// Runs the tick loop on `config.poll_interval_ms`, firing once
    /// immediately before arming the timer. `shutdown` going to `true`
    /// cancels the timer; an in-flight tick is allowed to finish.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        self.tick().await;

        let mut interval = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        interval.tick().await; // the first tick fires immediately; consume it since we just ran one.

        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("schedule ticker shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Computes the first `next_run_at` for a schedule being created or
/// updated by the intake, using the same cron/timezone logic the ticker
/// itself advances by.
pub fn next_run_for_new_schedule(
    cron_expression: &str,
    timezone: &str,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, EngineError> {
    compute_next_run(cron_expression, timezone, now)
}

fn compute_next_run(
    cron_expression: &str,
    timezone: &str,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, EngineError> {
    let schedule = cron::Schedule::from_str(cron_expression).map_err(|e| EngineError::InvalidCron {
        message: e.to_string(),
    })?;
    let tz: chrono_tz::Tz = timezone.parse().map_err(|_| EngineError::InvalidCron {
        message: format!("unknown timezone: {timezone}"),
    })?;

    let now_in_tz = now.with_timezone(&tz);
    let next = schedule.after(&now_in_tz).next().ok_or_else(|| EngineError::InvalidCron {
        message: "cron expression has no upcoming occurrences".to_string(),
    })?;
    Ok(next.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_the_next_occurrence_in_the_given_timezone() {
        let now = DateTime::parse_from_rfc3339("2026-07-28T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let next = compute_next_run("0 0 9 * * * *", "America/New_York", now).unwrap();
        assert!(next > now);
    }

    #[test]
    fn rejects_an_invalid_cron_expression() {
        let now = Utc::now();
        let err = compute_next_run("not a cron expression", "UTC", now).unwrap_err();
        assert!(matches!(err, EngineError::InvalidCron { .. }));
    }

    #[test]
    fn rejects_an_unknown_timezone() {
        let now = Utc::now();
        let err = compute_next_run("0 0 9 * * * *", "Nowhere/Imaginary", now).unwrap_err();
        assert!(matches!(err, EngineError::InvalidCron { .. }));
    }
}
