//! Data model (spec §3): `ReportJob`, `ReduceSpec`, `PartitionSpec`,
//! `Schedule`, `ArtifactDescriptor`, plus the `Row` alias used throughout
//! the normalizer, generators, and reduce engine.

mod api_key;
mod artifact;
mod job;
mod partition_spec;
mod reduce_spec;
mod schedule;

pub use api_key::ApiKey;
pub use artifact::{ArtifactDescriptor, ArtifactMode, ArtifactReason};
pub use job::{
    Compression, JobError, JobState, JobTimestamps, ProcessingStats, ReportFormat, ReportJob,
    ZipStrategy,
};
pub use partition_spec::{PartitionSpec, PartitionStrategy};
pub use reduce_spec::{MetricOp, MetricSpec, ReduceSpec};
pub use schedule::Schedule;

/// A single report row: a string-keyed mapping of normalized scalars.
/// `serde_json::Map` with the `preserve_order` feature keeps insertion
/// order, which is how the header/schema of every generator is derived
/// from "the first row's key ordering" (spec §4.2).
pub type Row = serde_json::Map<String, serde_json::Value>;
