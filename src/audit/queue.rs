use super::{AuditError, AuditRecord, AuditSink};
use crate::config::RedisConfig;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{sleep, timeout, Duration};

/// Redis list used as a durable audit queue
///
/// Producers `LPUSH` JSON records; the consumer pops from the other end, so
/// records are drained oldest first.
#[derive(Clone)]
pub struct RedisAuditQueue {
    conn: ConnectionManager,
    key: String,
    attempts: u32,
}

impl RedisAuditQueue {
    pub async fn connect(config: &RedisConfig) -> Result<Self, AuditError> {
        let client = Client::open(config.url.as_str())?;

        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| AuditError::ConnectTimeout)??;

        tracing::info!(key = %config.audit_key, "Connected to audit queue");

        Ok(Self {
            conn,
            key: config.audit_key.clone(),
            attempts: config.publish_attempts.max(1),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// List holding records that were popped but not yet committed
    pub fn processing_key(&self) -> String {
        format!("{}:processing", self.key)
    }

    pub(crate) fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl AuditSink for RedisAuditQueue {
    async fn publish(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();

        let mut attempt = 1;
        loop {
            match conn.lpush::<_, _, ()>(&self.key, &payload).await {
                Ok(()) => {
                    tracing::debug!(id = %record.id, signal = record.signal.as_str(), "Audit record queued");
                    return Ok(());
                }
                Err(e) if attempt < self.attempts => {
                    tracing::warn!(attempt, error = %e, "Audit publish failed, retrying");
                    sleep(Duration::from_millis(200 * u64::from(attempt))).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Signal;
    use chrono::Utc;

    #[tokio::test]
    #[ignore] // Requires a running Redis at REDIS_URL
    async fn test_publish_pushes_json() {
        let config = RedisConfig {
            url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
            audit_key: format!("patterntrader:test:{}", uuid::Uuid::new_v4()),
            publish_attempts: 1,
        };
        let queue = RedisAuditQueue::connect(&config).await.unwrap();
        let record = AuditRecord::aborted("ETHUSDT", &"test", Utc::now());

        queue.publish(&record).await.unwrap();

        let mut conn = queue.connection();
        let stored: Vec<String> = conn.lrange(queue.key(), 0, -1).await.unwrap();
        assert_eq!(stored.len(), 1);
        let back: AuditRecord = serde_json::from_str(&stored[0]).unwrap();
        assert_eq!(back.signal, Signal::Hold);

        let _: () = conn.del(queue.key()).await.unwrap();
    }
}
