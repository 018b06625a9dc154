//! [AMBIENT] Metrics (spec §4.8). Grounded on
//! `data-processing/src/metrics.rs::MetricsCollector`'s registry/gather
//! shape, scoped down to the handful of series this engine actually emits.

use prometheus::{Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::error::EngineError;

pub struct EngineMetrics {
    registry: Registry,
    jobs_started_total: IntCounterVec,
    jobs_completed_total: IntCounterVec,
    jobs_failed_total: IntCounterVec,
    job_row_count: HistogramVec,
    job_duration_seconds: HistogramVec,
    reduce_cardinality: IntGauge,
}

impl EngineMetrics {
    pub fn new() -> Result<Self, EngineError> {
        let registry = Registry::new();

        let jobs_started_total = IntCounterVec::new(
            Opts::new("report_jobs_started_total", "Report jobs that entered the running state"),
            &["tenant_id"],
        )
        .map_err(metrics_err)?;
        let jobs_completed_total = IntCounterVec::new(
            Opts::new("report_jobs_completed_total", "Report jobs that reached the uploaded state"),
            &["tenant_id"],
        )
        .map_err(metrics_err)?;
        let jobs_failed_total = IntCounterVec::new(
            Opts::new("report_jobs_failed_total", "Report jobs that reached the failed state"),
            &["tenant_id", "error_code"],
        )
        .map_err(metrics_err)?;
        let job_row_count = HistogramVec::new(
            HistogramOpts::new("report_job_row_count", "Output row count per completed report job")
                .buckets(vec![0.0, 10.0, 100.0, 1_000.0, 10_000.0, 100_000.0, 1_000_000.0]),
            &["tenant_id"],
        )
        .map_err(metrics_err)?;
        let job_duration_seconds = HistogramVec::new(
            HistogramOpts::new("report_job_duration_seconds", "Wall-clock duration of a completed report job")
                .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]),
            &["tenant_id"],
        )
        .map_err(metrics_err)?;
        let reduce_cardinality = IntGauge::new(
            "report_reduce_last_group_cardinality",
            "Distinct group count produced by the most recently completed reduce",
        )
        .map_err(metrics_err)?;

        registry.register(Box::new(jobs_started_total.clone())).map_err(metrics_err)?;
        registry.register(Box::new(jobs_completed_total.clone())).map_err(metrics_err)?;
        registry.register(Box::new(jobs_failed_total.clone())).map_err(metrics_err)?;
        registry.register(Box::new(job_row_count.clone())).map_err(metrics_err)?;
        registry.register(Box::new(job_duration_seconds.clone())).map_err(metrics_err)?;
        registry.register(Box::new(reduce_cardinality.clone())).map_err(metrics_err)?;

        Ok(Self {
            registry,
            jobs_started_total,
            jobs_completed_total,
            jobs_failed_total,
            job_row_count,
            job_duration_seconds,
            reduce_cardinality,
        })
    }

    pub fn record_started(&self, tenant_id: &str) {
        self.jobs_started_total.with_label_values(&[tenant_id]).inc();
    }

    pub fn record_completed(&self, tenant_id: &str, row_count: u64, duration_ms: u64) {
        self.jobs_completed_total.with_label_values(&[tenant_id]).inc();
        self.row_count_histogram(tenant_id).observe(row_count as f64);
        self.duration_histogram(tenant_id).observe(duration_ms as f64 / 1000.0);
    }

    pub fn record_failed(&self, tenant_id: &str, error_code: &str) {
        self.jobs_failed_total.with_label_values(&[tenant_id, error_code]).inc();
    }

    pub fn record_reduce_cardinality(&self, group_count: u64) {
        self.reduce_cardinality.set(group_count as i64);
    }

    fn row_count_histogram(&self, tenant_id: &str) -> Histogram {
        self.job_row_count.with_label_values(&[tenant_id])
    }

    fn duration_histogram(&self, tenant_id: &str) -> Histogram {
        self.job_duration_seconds.with_label_values(&[tenant_id])
    }

    /// Renders the registry in Prometheus text exposition format for the
    /// `/metrics` endpoint.
    pub fn export(&self) -> Result<String, EngineError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode_to_string(&metric_families).map_err(metrics_err)
    }
}

fn metrics_err(err: impl std::fmt::Display) -> EngineError {
    EngineError::Internal {
        message: format!("metrics error: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exports_text_after_recording_activity() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.record_started("tenant-a");
        metrics.record_completed("tenant-a", 42, 1_500);
        metrics.record_failed("tenant-a", "STORAGE_ERROR");
        metrics.record_reduce_cardinality(7);

        let text = metrics.export().unwrap();
        assert!(text.contains("report_jobs_started_total"));
        assert!(text.contains("report_jobs_completed_total"));
        assert!(text.contains("report_jobs_failed_total"));
        assert!(text.contains("report_reduce_last_group_cardinality"));
    }
}
