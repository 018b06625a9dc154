//! C3: Partitioned Reduce Engine (spec §4.3).

mod accumulator;
pub mod engine;
pub mod identifier;

pub use accumulator::GroupAccumulator;
pub use engine::{
    reduce, reduce_partition_rows, validate_reduce_spec, ChunkMetric, RangeAggregator,
    ReduceResult,
};
pub use identifier::{build_ranges, Identifier, IdentifierRange};
