//! HTTP intake surface (spec §6 "Intake HTTP surface"), grounded on
//! `file-storage-service/src/main.rs`'s `AppState`/`create_router` shape.

pub mod auth;
pub mod handlers;
pub mod routes;
pub mod validation;

use crate::config::AppConfig;
use crate::metrics::EngineMetrics;
use crate::queue::ReportQueue;
use crate::storage::ObjectStorage;
use crate::store::{ApiKeyStore, JobStore, ScheduleStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub api_keys: ApiKeyStore,
    pub jobs: JobStore,
    pub schedules: ScheduleStore,
    pub queue: ReportQueue,
    pub storage: ObjectStorage,
    pub metrics: Arc<EngineMetrics>,
}

pub use routes::build_router;
