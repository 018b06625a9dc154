//! Partitioning and worker-pool orchestration for C3 (spec §4.3). The
//! engine is decoupled from Mongo specifics behind `RangeAggregator`, which
//! `store::source` implements against the real aggregation pipeline; tests
//! here use an in-memory fake.

use crate::canonical::canonical_json;
use crate::config::ReduceConfig;
use crate::error::EngineError;
use crate::model::{PartitionSpec, ReduceSpec, Row};
use crate::reduce::accumulator::GroupAccumulator;
use crate::reduce::identifier::{build_ranges, Identifier, IdentifierRange};
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Validates a `ReduceSpec` against the rules in spec §4.3: non-empty
/// metrics, unique aliases, non-`count` ops must carry a `field`.
pub fn validate_reduce_spec(spec: &ReduceSpec) -> Result<(), EngineError> {
    if spec.metrics.is_empty() {
        return Err(EngineError::ReduceValidation {
            message: "metrics must be non-empty".to_string(),
        });
    }
    let mut seen = std::collections::HashSet::new();
    for metric in &spec.metrics {
        if !seen.insert(metric.alias.as_str()) {
            return Err(EngineError::ReduceValidation {
                message: format!("duplicate metric alias: {}", metric.alias),
            });
        }
        if metric.op != crate::model::MetricOp::Count && metric.field.is_none() {
            return Err(EngineError::ReduceValidation {
                message: format!("metric '{}' requires a field", metric.alias),
            });
        }
    }
    Ok(())
}

/// Provides the two queries the engine needs against a tenant-scoped,
/// filtered source collection: the identifier bounds, and the per-range
/// grouped aggregation.
#[async_trait]
pub trait RangeAggregator: Send + Sync {
    async fn identifier_bounds(&self) -> Result<Option<(Identifier, Identifier)>, EngineError>;
    async fn aggregate_range(
        &self,
        spec: &ReduceSpec,
        range: &IdentifierRange,
    ) -> Result<Vec<Row>, EngineError>;
}

#[derive(Debug, Clone)]
pub struct ChunkMetric {
    pub index: usize,
    pub duration_ms: u64,
    pub rows_out: u64,
}

#[derive(Debug, Clone)]
pub struct ReduceResult {
    pub rows: Vec<Row>,
    pub rows_in: u64,
    pub rows_out: u64,
    pub chunks: usize,
    pub chunk_metrics: Vec<ChunkMetric>,
}

/// Runs the full partition → per-range aggregate → merge pipeline.
pub async fn reduce<A: RangeAggregator + 'static>(
    aggregator: Arc<A>,
    partition: &PartitionSpec,
    spec: &ReduceSpec,
    config: &ReduceConfig,
    now_ms: Arc<dyn Fn() -> u64 + Send + Sync>,
) -> Result<ReduceResult, EngineError> {
    validate_reduce_spec(spec)?;

    let Some((min, max)) = aggregator.identifier_bounds().await? else {
        return Ok(ReduceResult {
            rows: Vec::new(),
            rows_in: 0,
            rows_out: 0,
            chunks: 0,
            chunk_metrics: Vec::new(),
        });
    };
    if max < min {
        return Ok(ReduceResult {
            rows: Vec::new(),
            rows_in: 0,
            rows_out: 0,
            chunks: 0,
            chunk_metrics: Vec::new(),
        });
    }

    let requested = partition.chunks.unwrap_or(config.default_chunks);
    let k = requested.min(config.partition_cap_max).max(1);
    let ranges = build_ranges(min, max, k);
    if ranges.is_empty() {
        return Ok(ReduceResult {
            rows: Vec::new(),
            rows_in: 0,
            rows_out: 0,
            chunks: 0,
            chunk_metrics: Vec::new(),
        });
    }

    let concurrency = config.partition_max_concurrency.min(ranges.len()).max(1);
    let next_range = Arc::new(Mutex::new(0usize));
    let accumulator = Arc::new(Mutex::new(GroupAccumulator::new(config.max_groups)));
    let chunk_metrics = Arc::new(Mutex::new(Vec::with_capacity(ranges.len())));

    let ranges = Arc::new(ranges);
    let mut workers = FuturesUnordered::new();

    for _ in 0..concurrency {
        let ranges = Arc::clone(&ranges);
        let next_range = Arc::clone(&next_range);
        let accumulator = Arc::clone(&accumulator);
        let chunk_metrics = Arc::clone(&chunk_metrics);
        let aggregator = Arc::clone(&aggregator);
        let spec = spec.clone();
        let now_ms = Arc::clone(&now_ms);

        workers.push(tokio::spawn(async move {
            loop {
                let index = {
                    let mut cursor = next_range.lock().await;
                    if *cursor >= ranges.len() {
                        break;
                    }
                    let i = *cursor;
                    *cursor += 1;
                    i
                };
                let range = &ranges[index];
                let started = now_ms();
                let partials = aggregator.aggregate_range(&spec, range).await?;

                {
                    let mut acc = accumulator.lock().await;
                    for partial in &partials {
                        acc.consume(&spec, partial)?;
                    }
                }

                let duration_ms = now_ms().saturating_sub(started);
                chunk_metrics.lock().await.push(ChunkMetric {
                    index,
                    duration_ms,
                    rows_out: partials.len() as u64,
                });
            }
            Ok::<(), EngineError>(())
        }));
    }

    while let Some(joined) = workers.next().await {
        joined.map_err(|e| EngineError::Internal {
            message: format!("reduce worker panicked: {e}"),
        })??;
    }

    let mut metrics = Arc::try_unwrap(chunk_metrics)
        .map(|m| m.into_inner())
        .unwrap_or_default();
    metrics.sort_by_key(|m| m.index);

    let accumulator = Arc::try_unwrap(accumulator)
        .unwrap_or_else(|_| unreachable!("all workers joined"))
        .into_inner();
    let (mut rows, rows_in, rows_out) = accumulator.finalize(spec);
    rows.sort_by(|a, b| {
        canonical_json(&group_only(a, spec)).cmp(&canonical_json(&group_only(b, spec)))
    });

    Ok(ReduceResult {
        rows,
        rows_in,
        rows_out,
        chunks: ranges.len(),
        chunk_metrics: metrics,
    })
}

fn group_only(row: &Row, spec: &ReduceSpec) -> Value {
    let mut map = serde_json::Map::new();
    for field in &spec.group_by {
        map.insert(field.clone(), row.get(field).cloned().unwrap_or(Value::Null));
    }
    Value::Object(map)
}

/// The v1 merge path (spec §4.3): instead of folding partials into a
/// shared accumulator as each range completes, every range's partials are
/// appended to one buffer and merged serially afterwards. Whether
/// `max_groups` is enforced here is governed by
/// `ReduceConfig::enforce_max_groups_in_v1` (see DESIGN.md).
pub fn reduce_partition_rows(
    spec: &ReduceSpec,
    partial_rows: &[Row],
    max_groups: usize,
) -> Result<(Vec<Row>, u64, u64), EngineError> {
    validate_reduce_spec(spec)?;
    let mut accumulator = GroupAccumulator::new(max_groups);
    for partial in partial_rows {
        accumulator.consume(spec, partial)?;
    }
    let (mut rows, rows_in, rows_out) = accumulator.finalize(spec);
    rows.sort_by(|a, b| {
        canonical_json(&group_only(a, spec)).cmp(&canonical_json(&group_only(b, spec)))
    });
    Ok((rows, rows_in, rows_out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MetricOp, MetricSpec};
    use serde_json::json;
    use std::collections::HashMap;

    struct FakeAggregator {
        bounds: Option<(Identifier, Identifier)>,
        rows_by_range: HashMap<usize, Vec<Row>>,
    }

    #[async_trait]
    impl RangeAggregator for FakeAggregator {
        async fn identifier_bounds(&self) -> Result<Option<(Identifier, Identifier)>, EngineError> {
            Ok(self.bounds)
        }

        async fn aggregate_range(
            &self,
            _spec: &ReduceSpec,
            range: &IdentifierRange,
        ) -> Result<Vec<Row>, EngineError> {
            Ok(self.rows_by_range.get(&range.index).cloned().unwrap_or_default())
        }
    }

    fn spec() -> ReduceSpec {
        ReduceSpec {
            group_by: vec!["status".to_string()],
            metrics: vec![MetricSpec {
                op: MetricOp::Count,
                alias: "n".to_string(),
                field: None,
            }],
        }
    }

    fn config() -> ReduceConfig {
        ReduceConfig {
            default_chunks: 2,
            partition_cap_max: 4,
            partition_max_concurrency: 2,
            max_groups: 1000,
            cursor_batch_size: 500,
            enforce_max_groups_in_v1: true,
            streaming_accumulator: true,
        }
    }

    fn partial(status: &str, n: f64) -> Row {
        let mut row = Row::new();
        row.insert("status".to_string(), json!(status));
        row.insert("n".to_string(), json!(n));
        row.insert("__input_count".to_string(), json!(n as u64));
        row
    }

    #[tokio::test]
    async fn empty_bounds_short_circuit_to_empty_result() {
        let aggregator = Arc::new(FakeAggregator {
            bounds: None,
            rows_by_range: HashMap::new(),
        });
        let result = reduce(
            aggregator,
            &PartitionSpec::default(),
            &spec(),
            &config(),
            Arc::new(|| 0),
        )
        .await
        .unwrap();
        assert_eq!(result.chunks, 0);
        assert!(result.rows.is_empty());
    }

    #[tokio::test]
    async fn merges_partials_from_every_range_and_sorts_by_group_key() {
        let mut rows_by_range = HashMap::new();
        rows_by_range.insert(0, vec![partial("void", 1.0)]);
        rows_by_range.insert(1, vec![partial("paid", 2.0), partial("paid", 3.0)]);
        let aggregator = Arc::new(FakeAggregator {
            bounds: Some((Identifier(0), Identifier(99))),
            rows_by_range,
        });

        let result = reduce(
            aggregator,
            &PartitionSpec {
                strategy: crate::model::PartitionStrategy::IdentifierRange,
                chunks: Some(2),
            },
            &spec(),
            &config(),
            Arc::new(|| 0),
        )
        .await
        .unwrap();

        assert_eq!(result.chunks, 2);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0]["status"], json!("paid"));
        assert_eq!(result.rows[0]["n"], json!(5.0));
        assert_eq!(result.rows[1]["status"], json!("void"));
        assert_eq!(result.rows_in, 6);
        assert_eq!(result.chunk_metrics.len(), 2);
    }
}
