use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactMode {
    ObjectStoreCloud,
    ObjectStoreLocalCompatible,
    Filesystem,
    Noop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactReason {
    ExternalStorageDisabled,
    OptionalIntegrationFailure,
    DownloadUrlUnavailable,
    Pending,
}

/// §3 ArtifactDescriptor. Invariant: `available = true => key.is_some()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub mode: ArtifactMode,
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ArtifactReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<String>>,
}

impl ArtifactDescriptor {
    pub fn pending() -> Self {
        Self {
            mode: ArtifactMode::Noop,
            available: false,
            reason: Some(ArtifactReason::Pending),
            size_bytes: None,
            checksum: None,
            key: None,
            bucket: None,
            entries: None,
        }
    }

    /// Enforces the invariant `available = true => key.is_some()`.
    pub fn is_valid(&self) -> bool {
        !self.available || self.key.is_some()
    }
}
