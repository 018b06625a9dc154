//! Report job queue (spec §6 "Queue"), realized over Redis the way
//! `notification-service/src/manager.rs` wires its `ConnectionManager`:
//! `LPUSH`/`BRPOPLPUSH` for FIFO-with-visibility, a `SET NX` dedupe guard
//! keyed by job id, and a sorted set for delayed redelivery/backoff.

use crate::config::QueueConfig;
use crate::error::EngineError;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client as RedisClient};
use serde::{Deserialize, Serialize};

/// `{reportJobId, tenantId}` — spec §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub report_job_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub attempts: u32,
}

#[derive(Clone)]
pub struct ReportQueue {
    conn: ConnectionManager,
    config: QueueConfig,
}

impl ReportQueue {
    pub async fn connect(config: QueueConfig) -> Result<Self, EngineError> {
        let client = RedisClient::open(config.redis_url.as_str())?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn, config })
    }

    fn ready_key(&self) -> String {
        format!("{}:ready", self.config.queue_name)
    }

    fn processing_key(&self) -> String {
        format!("{}:processing", self.config.queue_name)
    }

    fn delayed_key(&self) -> String {
        format!("{}:delayed", self.config.queue_name)
    }

    fn dedupe_key(&self, job_id: &str) -> String {
        format!("{}:dedupe:{}", self.config.queue_name, job_id)
    }

    /// §4.5 step 6 / intake submission: enqueue once per job id. A
    /// duplicate enqueue for the same job id (e.g. a retried HTTP
    /// request) is a silent no-op.
    pub async fn enqueue(&self, job_id: &str, tenant_id: &str) -> Result<(), EngineError> {
        let mut conn = self.conn.clone();
        let dedupe_key = self.dedupe_key(job_id);
        let claimed: bool = conn.set_nx(&dedupe_key, 1).await?;
        if !claimed {
            return Ok(());
        }

        let message = QueueMessage {
            report_job_id: job_id.to_string(),
            tenant_id: tenant_id.to_string(),
            attempts: 0,
        };
        let payload = serde_json::to_string(&message)?;
        let _: () = conn.lpush(self.ready_key(), payload).await?;
        Ok(())
    }

    /// Moves any delayed message whose backoff has elapsed back onto the
    /// ready list. Call this opportunistically before `claim`.
    pub async fn requeue_due(&self, now_ms: i64) -> Result<(), EngineError> {
        let mut conn = self.conn.clone();
        let due: Vec<String> = conn
            .zrangebyscore(self.delayed_key(), "-inf", now_ms)
            .await?;
        for payload in due {
            let _: i64 = conn.zrem(self.delayed_key(), &payload).await?;
            let _: () = conn.lpush(self.ready_key(), payload).await?;
        }
        Ok(())
    }

    /// Moves one message from `ready` to `processing` (visibility) and
    /// returns it. `None` if nothing is ready.
    pub async fn claim(&self) -> Result<Option<QueueMessage>, EngineError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn
            .brpoplpush(
                self.ready_key(),
                self.processing_key(),
                self.config.visibility_timeout_seconds as usize,
            )
            .await?;
        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Job succeeded: drop the in-flight copy and the dedupe guard.
    pub async fn ack(&self, message: &QueueMessage) -> Result<(), EngineError> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(message)?;
        let _: i64 = conn.lrem(self.processing_key(), 1, payload).await?;
        let _: i64 = conn.del(self.dedupe_key(&message.report_job_id)).await?;
        Ok(())
    }

    /// Job failed: either schedule exponential-backoff redelivery, or —
    /// past `maxAttempts` — drop it for good (spec's `removeOnFail`
    /// retention is a store-side concern; the queue's job here is just to
    /// stop retrying).
    pub async fn nack(&self, mut message: QueueMessage, now_ms: i64) -> Result<(), EngineError> {
        let mut conn = self.conn.clone();
        let old_payload = serde_json::to_string(&message)?;
        let _: i64 = conn.lrem(self.processing_key(), 1, old_payload).await?;

        message.attempts += 1;
        if message.attempts >= self.config.max_attempts {
            let _: i64 = conn.del(self.dedupe_key(&message.report_job_id)).await?;
            return Ok(());
        }

        let delay_ms = self.config.backoff_base_ms * 2u64.pow(message.attempts.saturating_sub(1));
        let new_payload = serde_json::to_string(&message)?;
        let _: i64 = conn
            .zadd(self.delayed_key(), new_payload, (now_ms + delay_ms as i64) as f64)
            .await?;
        Ok(())
    }
}
