//! API key store (spec §6 "API key record"), looked up by the intake's
//! auth layer via the `(tenant_id, key_hash)` unique index.

use crate::error::EngineError;
use crate::model::ApiKey;
use chrono::Utc;
use mongodb::bson::doc;
use mongodb::{Collection, Database};

#[derive(Clone)]
pub struct ApiKeyStore {
    collection: Collection<ApiKey>,
}

impl ApiKeyStore {
    pub fn new(database: &Database) -> Self {
        Self {
            collection: database.collection("apiKeys"),
        }
    }

    /// Looks up a non-revoked key for `tenant_id`, bumping `last_used_at`
    /// on a hit.
    pub async fn authenticate(&self, tenant_id: &str, key_hash: &str) -> Result<Option<ApiKey>, EngineError> {
        let filter = doc! { "tenant_id": tenant_id, "key_hash": key_hash, "revoked": false };
        let Some(key) = self.collection.find_one(filter.clone(), None).await? else {
            return Ok(None);
        };
        self.collection
            .update_one(filter, doc! { "$set": { "last_used_at": Utc::now() } }, None)
            .await?;
        Ok(Some(key))
    }
}
