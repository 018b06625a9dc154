//! Group accumulator (spec §4.3): folds per-range partial aggregation rows
//! into one running total per group, keyed by the canonical JSON of the
//! group-by value mapping so merge order never affects the result.

use crate::canonical::canonical_json;
use crate::error::EngineError;
use crate::model::{MetricOp, ReduceSpec, Row};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const INPUT_COUNT_FIELD: &str = "__input_count";

fn avg_sum_field(alias: &str) -> String {
    format!("__avg_sum__{alias}")
}

fn avg_count_field(alias: &str) -> String {
    format!("__avg_count__{alias}")
}

/// The comparable projection used for `min`/`max` merging: timestamps
/// (already normalized to RFC3339 strings by C1) project to epoch
/// milliseconds, numbers compare natively, everything else that still
/// looks comparable falls back to a lexicographic string compare. Anything
/// else is not comparable and is skipped.
#[derive(Debug, Clone, PartialEq, PartialOrd)]
enum Comparable {
    Num(f64),
    Str(String),
}

fn comparable_projection(value: &Value) -> Option<Comparable> {
    match value {
        Value::Number(n) => n.as_f64().map(Comparable::Num),
        Value::String(s) => {
            if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
                Some(Comparable::Num(dt.timestamp_millis() as f64))
            } else {
                Some(Comparable::Str(s.clone()))
            }
        }
        _ => None,
    }
}

fn compare_same_projection(a: &Comparable, b: &Comparable) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Comparable::Num(x), Comparable::Num(y)) => x.partial_cmp(y),
        (Comparable::Str(x), Comparable::Str(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[derive(Debug, Clone, Default)]
struct GroupState {
    group: Map<String, Value>,
    scalars: BTreeMap<String, f64>,
    min_max: BTreeMap<String, Comparable>,
    avg_sums: BTreeMap<String, f64>,
    avg_counts: BTreeMap<String, f64>,
    input_count: u64,
}

/// Folds partial rows across ranges into one accumulated total per group,
/// rejecting new groups once `max_groups` has been reached (spec's
/// `ReduceCardinalityExceeded`). `max_groups = usize::MAX` effectively
/// disables the cap, used for the v1 merge path when
/// `enforce_max_groups_in_v1` is turned off in configuration.
pub struct GroupAccumulator {
    groups: BTreeMap<String, GroupState>,
    max_groups: usize,
}

impl GroupAccumulator {
    pub fn new(max_groups: usize) -> Self {
        Self {
            groups: BTreeMap::new(),
            max_groups,
        }
    }

    pub fn consume(&mut self, spec: &ReduceSpec, partial: &Row) -> Result<(), EngineError> {
        let mut group_value = Map::new();
        for field in &spec.group_by {
            group_value.insert(
                field.clone(),
                partial.get(field).cloned().unwrap_or(Value::Null),
            );
        }
        let key = canonical_json(&Value::Object(group_value.clone()));

        if !self.groups.contains_key(&key) && self.groups.len() >= self.max_groups {
            return Err(EngineError::ReduceCardinalityExceeded {
                max_groups: self.max_groups,
            });
        }

        let state = self.groups.entry(key).or_insert_with(|| GroupState {
            group: group_value,
            ..Default::default()
        });

        for metric in &spec.metrics {
            match metric.op {
                MetricOp::Count | MetricOp::Sum => {
                    let delta = partial
                        .get(&metric.alias)
                        .and_then(Value::as_f64)
                        .unwrap_or(0.0);
                    *state.scalars.entry(metric.alias.clone()).or_insert(0.0) += delta;
                }
                MetricOp::Min => fold_extreme(state, &metric.alias, partial, std::cmp::Ordering::Less),
                MetricOp::Max => {
                    fold_extreme(state, &metric.alias, partial, std::cmp::Ordering::Greater)
                }
                MetricOp::Avg => {
                    let sum = partial
                        .get(&avg_sum_field(&metric.alias))
                        .and_then(Value::as_f64)
                        .unwrap_or(0.0);
                    let count = partial
                        .get(&avg_count_field(&metric.alias))
                        .and_then(Value::as_f64)
                        .unwrap_or(0.0);
                    *state.avg_sums.entry(metric.alias.clone()).or_insert(0.0) += sum;
                    *state.avg_counts.entry(metric.alias.clone()).or_insert(0.0) += count;
                }
            }
        }

        state.input_count += partial.get(INPUT_COUNT_FIELD).and_then(Value::as_u64).unwrap_or(0);

        Ok(())
    }

    /// Emits one row per group in ascending canonical-key order, plus the
    /// total rows folded in (`rowsIn`) and the group count (`rowsOut`).
    pub fn finalize(self, spec: &ReduceSpec) -> (Vec<Row>, u64, u64) {
        let rows_out = self.groups.len() as u64;
        let mut rows_in = 0u64;
        let mut rows = Vec::with_capacity(self.groups.len());

        for (_, state) in self.groups {
            rows_in += state.input_count;
            let mut row = state.group.clone();
            for metric in &spec.metrics {
                let value = match metric.op {
                    MetricOp::Count | MetricOp::Sum => state
                        .scalars
                        .get(&metric.alias)
                        .copied()
                        .map(json_number)
                        .unwrap_or(Value::Null),
                    MetricOp::Min | MetricOp::Max => state
                        .min_max
                        .get(&metric.alias)
                        .map(|c| match c {
                            Comparable::Num(n) => json_number(*n),
                            Comparable::Str(s) => Value::String(s.clone()),
                        })
                        .unwrap_or(Value::Null),
                    MetricOp::Avg => {
                        let count = state.avg_counts.get(&metric.alias).copied().unwrap_or(0.0);
                        if count == 0.0 {
                            Value::Null
                        } else {
                            let sum = state.avg_sums.get(&metric.alias).copied().unwrap_or(0.0);
                            json_number(sum / count)
                        }
                    }
                };
                row.insert(metric.alias.clone(), value);
            }
            rows.push(row);
        }

        (rows, rows_in, rows_out)
    }
}

fn json_number(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Seeds the running extreme with the first non-null comparable value;
/// subsequent nulls (non-comparable values) are ignored rather than
/// resetting the running value.
fn fold_extreme(state: &mut GroupState, alias: &str, partial: &Row, favor: std::cmp::Ordering) {
    let Some(candidate) = partial.get(alias).and_then(comparable_projection) else {
        return;
    };
    match state.min_max.get(alias) {
        None => {
            state.min_max.insert(alias.to_string(), candidate);
        }
        Some(current) => {
            if let Some(ordering) = compare_same_projection(&candidate, current) {
                if ordering == favor {
                    state.min_max.insert(alias.to_string(), candidate);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetricSpec;
    use serde_json::json;

    fn spec() -> ReduceSpec {
        ReduceSpec {
            group_by: vec!["status".to_string()],
            metrics: vec![
                MetricSpec {
                    op: MetricOp::Count,
                    alias: "n".to_string(),
                    field: None,
                },
                MetricSpec {
                    op: MetricOp::Sum,
                    alias: "total".to_string(),
                    field: Some("amount".to_string()),
                },
                MetricSpec {
                    op: MetricOp::Avg,
                    alias: "avg_amount".to_string(),
                    field: Some("amount".to_string()),
                },
                MetricSpec {
                    op: MetricOp::Max,
                    alias: "max_amount".to_string(),
                    field: Some("amount".to_string()),
                },
            ],
        }
    }

    fn partial(status: &str, n: f64, total: f64, avg_sum: f64, avg_count: f64, max: f64, input: u64) -> Row {
        let mut row = Row::new();
        row.insert("status".to_string(), json!(status));
        row.insert("n".to_string(), json!(n));
        row.insert("total".to_string(), json!(total));
        row.insert(avg_sum_field("avg_amount"), json!(avg_sum));
        row.insert(avg_count_field("avg_amount"), json!(avg_count));
        row.insert("max_amount".to_string(), json!(max));
        row.insert(INPUT_COUNT_FIELD.to_string(), json!(input));
        row
    }

    #[test]
    fn merges_two_partials_into_one_group() {
        let spec = spec();
        let mut acc = GroupAccumulator::new(100);
        acc.consume(&spec, &partial("paid", 2.0, 20.0, 20.0, 2.0, 15.0, 2))
            .unwrap();
        acc.consume(&spec, &partial("paid", 3.0, 30.0, 30.0, 3.0, 25.0, 3))
            .unwrap();

        let (rows, rows_in, rows_out) = acc.finalize(&spec);
        assert_eq!(rows_out, 1);
        assert_eq!(rows_in, 5);
        assert_eq!(rows[0]["n"], json!(5.0));
        assert_eq!(rows[0]["total"], json!(50.0));
        assert_eq!(rows[0]["avg_amount"], json!(10.0));
        assert_eq!(rows[0]["max_amount"], json!(25.0));
    }

    #[test]
    fn distinct_group_keys_stay_separate() {
        let spec = spec();
        let mut acc = GroupAccumulator::new(100);
        acc.consume(&spec, &partial("paid", 1.0, 10.0, 10.0, 1.0, 10.0, 1))
            .unwrap();
        acc.consume(&spec, &partial("void", 1.0, 5.0, 5.0, 1.0, 5.0, 1))
            .unwrap();
        let (rows, _, rows_out) = acc.finalize(&spec);
        assert_eq!(rows_out, 2);
        // ascending canonical-key order: "paid" < "void"
        assert_eq!(rows[0]["status"], json!("paid"));
        assert_eq!(rows[1]["status"], json!("void"));
    }

    #[test]
    fn rejects_new_group_past_cardinality_cap() {
        let spec = spec();
        let mut acc = GroupAccumulator::new(1);
        acc.consume(&spec, &partial("paid", 1.0, 1.0, 1.0, 1.0, 1.0, 1))
            .unwrap();
        let err = acc
            .consume(&spec, &partial("void", 1.0, 1.0, 1.0, 1.0, 1.0, 1))
            .unwrap_err();
        assert!(matches!(err, EngineError::ReduceCardinalityExceeded { max_groups: 1 }));
    }

    #[test]
    fn avg_with_zero_count_is_null() {
        let spec = spec();
        let mut acc = GroupAccumulator::new(10);
        acc.consume(&spec, &partial("paid", 0.0, 0.0, 0.0, 0.0, 0.0, 0))
            .unwrap();
        let (rows, _, _) = acc.finalize(&spec);
        assert_eq!(rows[0]["avg_amount"], Value::Null);
    }
}
