use serde::{Deserialize, Serialize};

/// §3 PartitionSpec: `{ strategy: "identifierRange", chunks?: positive integer }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionSpec {
    pub strategy: PartitionStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PartitionStrategy {
    IdentifierRange,
}

impl Default for PartitionSpec {
    fn default() -> Self {
        Self {
            strategy: PartitionStrategy::IdentifierRange,
            chunks: None,
        }
    }
}
