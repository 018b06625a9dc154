//! Report engine: a multi-tenant asynchronous report generation service.
//!
//! A tenant submits a report job (or a cron schedule that produces jobs) over
//! the HTTP intake surface (`intake`). Jobs are queued in Redis (`queue`) and
//! picked up by a worker pool (`processor`) that reads tenant-scoped rows
//! from a Mongo secondary (`store`), optionally reduces them
//! (`reduce`), streams them through a format generator (`generators`), and
//! uploads the result to object storage (`storage`). A background ticker
//! (`ticker`) turns due cron schedules into jobs on the same queue.

pub mod canonical;
pub mod config;
pub mod error;
pub mod generators;
pub mod intake;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod processor;
pub mod queue;
pub mod reduce;
pub mod snapshot;
pub mod storage;
pub mod store;
pub mod ticker;

pub use config::AppConfig;
pub use error::{EngineError, Result};
