//! Document store adapters (spec §6 "Document store"): two Mongo clients
//! (write/read endpoints), jobs, schedules, and tenant-scoped source
//! collection access.

pub mod api_keys;
pub mod jobs;
pub mod schedules;
pub mod source;

pub use api_keys::ApiKeyStore;
pub use jobs::JobStore;
pub use schedules::ScheduleStore;
pub use source::{resolve_source_collection, verify_not_primary, SourceClient};
