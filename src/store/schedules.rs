//! Schedule document store (spec §3 `Schedule`, §4.5 ticker claiming).

use crate::error::EngineError;
use crate::model::Schedule;
use chrono::{DateTime, Utc};
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, to_document};
use mongodb::{Collection, Database};

#[derive(Clone)]
pub struct ScheduleStore {
    collection: Collection<Schedule>,
}

impl ScheduleStore {
    pub fn new(database: &Database) -> Self {
        Self {
            collection: database.collection("reportSchedules"),
        }
    }

    pub async fn create(&self, schedule: &Schedule) -> Result<ObjectId, EngineError> {
        let result = self.collection.insert_one(schedule, None).await?;
        result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| EngineError::Internal {
                message: "insert did not return an ObjectId".to_string(),
            })
    }

    pub async fn get(&self, id: ObjectId, tenant_id: &str) -> Result<Option<Schedule>, EngineError> {
        let filter = doc! { "_id": id, "tenant_id": tenant_id };
        Ok(self.collection.find_one(filter, None).await?)
    }

    pub async fn list(&self, tenant_id: &str) -> Result<Vec<Schedule>, EngineError> {
        let filter = doc! { "tenant_id": tenant_id };
        let cursor = self.collection.find(filter, None).await?;
        Ok(cursor.try_collect().await?)
    }

    pub async fn update(&self, id: ObjectId, tenant_id: &str, schedule: &Schedule) -> Result<(), EngineError> {
        let filter = doc! { "_id": id, "tenant_id": tenant_id };
        let doc = to_document(schedule)?;
        self.collection
            .update_one(filter, doc! { "$set": doc }, None)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: ObjectId, tenant_id: &str) -> Result<(), EngineError> {
        let filter = doc! { "_id": id, "tenant_id": tenant_id };
        self.collection.delete_one(filter, None).await?;
        Ok(())
    }

    /// §4.5 step 2: fetch (without claiming) one due schedule, oldest
    /// `next_run_at` first.
    pub async fn find_due(&self, now: DateTime<Utc>) -> Result<Option<Schedule>, EngineError> {
        let filter = doc! { "enabled": true, "next_run_at": { "$lte": now } };
        let options = mongodb::options::FindOneOptions::builder()
            .sort(doc! { "next_run_at": 1 })
            .build();
        Ok(self.collection.find_one(filter, options).await?)
    }

    /// §4.5 step 4: conditional update — only claims if `next_run_at`
    /// still equals `prev_next_run_at`, i.e. nobody else has advanced this
    /// schedule since step 2's read. Returns whether the claim succeeded.
    pub async fn try_advance(
        &self,
        id: ObjectId,
        prev_next_run_at: DateTime<Utc>,
        now: DateTime<Utc>,
        computed_next_run_at: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let filter = doc! {
            "_id": id,
            "enabled": true,
            "next_run_at": prev_next_run_at,
        };
        let update = doc! {
            "$set": {
                "last_run_at": now,
                "next_run_at": computed_next_run_at,
            }
        };
        let matched = self
            .collection
            .find_one_and_update(filter, update, None)
            .await?;
        Ok(matched.is_some())
    }

    /// §4.5 step 3: cron parse failure disables the schedule.
    pub async fn disable(&self, id: ObjectId) -> Result<(), EngineError> {
        self.collection
            .update_one(doc! { "_id": id }, doc! { "$set": { "enabled": false } }, None)
            .await?;
        Ok(())
    }
}
