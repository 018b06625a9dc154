//! Job document store (spec §3 `ReportJob`, §4.4 state transitions).
//! Grounded on `file-storage-service/src/services.rs::MetadataService`:
//! a plain `Collection<Document>` with manual `bson::to_document`/
//! `from_document` conversion rather than a typed `Collection<ReportJob>`,
//! since jobs are read back with partial projections in a few call sites.

use crate::error::EngineError;
use crate::model::{ArtifactDescriptor, JobError, JobState, ProcessingStats, ReportJob};
use chrono::{DateTime, Utc};
use mongodb::bson::{doc, oid::ObjectId, to_document, Document};
use mongodb::{Collection, Database};

#[derive(Clone)]
pub struct JobStore {
    collection: Collection<Document>,
}

impl JobStore {
    pub fn new(database: &Database) -> Self {
        Self {
            collection: database.collection("reportJobs"),
        }
    }

    pub async fn insert(&self, job: &ReportJob) -> Result<ObjectId, EngineError> {
        let doc = to_document(job)?;
        let result = self.collection.insert_one(doc, None).await?;
        result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| EngineError::Internal {
                message: "insert did not return an ObjectId".to_string(),
            })
    }

    pub async fn find_by_id_and_tenant(
        &self,
        id: ObjectId,
        tenant_id: &str,
    ) -> Result<Option<ReportJob>, EngineError> {
        let filter = doc! { "_id": id, "tenant_id": tenant_id };
        match self.collection.find_one(filter, None).await? {
            Some(doc) => Ok(Some(mongodb::bson::from_document(doc)?)),
            None => Ok(None),
        }
    }

    /// §4.4 step 1: transition to `running`, `progress = 10`, clear any
    /// prior error.
    pub async fn mark_running(
        &self,
        id: ObjectId,
        tenant_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.set_state(
            id,
            tenant_id,
            doc! {
                "state": JobState::Running.as_str(),
                "progress": 10,
                "started_at": started_at,
                "error": mongodb::bson::Bson::Null,
            },
        )
        .await
    }

    /// §4.4 step 5: transition to `uploading`, `progress = 75`.
    pub async fn mark_uploading(&self, id: ObjectId, tenant_id: &str) -> Result<(), EngineError> {
        self.set_state(
            id,
            tenant_id,
            doc! { "state": JobState::Uploading.as_str(), "progress": 75 },
        )
        .await
    }

    /// §4.4 step 8: terminal success state.
    #[allow(clippy::too_many_arguments)]
    pub async fn mark_uploaded(
        &self,
        id: ObjectId,
        tenant_id: &str,
        row_count: u64,
        artifact: &ArtifactDescriptor,
        processing_stats: &ProcessingStats,
        finished_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let mut update = doc! {
            "state": JobState::Uploaded.as_str(),
            "progress": 100,
            "row_count": row_count as i64,
            "finished_at": finished_at,
            "error": mongodb::bson::Bson::Null,
        };
        update.insert("artifact", to_document(artifact)?);
        update.insert("processing_stats", to_document(processing_stats)?);
        self.set_state(id, tenant_id, update).await
    }

    /// §4.4 step 9: failure path, the error is still re-raised by the caller.
    pub async fn mark_failed(
        &self,
        id: ObjectId,
        tenant_id: &str,
        error: &JobError,
        finished_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let mut update = doc! {
            "state": JobState::Failed.as_str(),
            "finished_at": finished_at,
        };
        update.insert("error", to_document(error)?);
        self.set_state(id, tenant_id, update).await
    }

    async fn set_state(
        &self,
        id: ObjectId,
        tenant_id: &str,
        fields: Document,
    ) -> Result<(), EngineError> {
        let filter = doc! { "_id": id, "tenant_id": tenant_id };
        self.collection
            .update_one(filter, doc! { "$set": fields }, None)
            .await?;
        Ok(())
    }
}
