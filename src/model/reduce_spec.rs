use serde::{Deserialize, Serialize};

/// §3 ReduceSpec: an ordered `groupBy` list and a non-empty `metrics` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReduceSpec {
    pub group_by: Vec<String>,
    pub metrics: Vec<MetricSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricOp {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSpec {
    pub op: MetricOp,
    /// Output alias; same identifier charset as `groupBy` fields.
    #[serde(rename = "as")]
    pub alias: String,
    /// Required unless `op = count`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}
