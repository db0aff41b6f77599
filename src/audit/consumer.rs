use super::{AuditError, AuditRecord, RedisAuditQueue};
use redis::AsyncCommands;
use sqlx::PgPool;
use std::future::Future;
use tokio::time::Duration;

/// Drains the audit queue into the `signal_log` table
///
/// Each record is moved atomically into a processing list before it is
/// written, and only removed from there after the insert commits. A crash in
/// between leaves the record in the processing list, which is replayed on the
/// next start; the insert is idempotent on the record id.
pub struct AuditConsumer {
    queue: RedisAuditQueue,
    pool: PgPool,
    idle_delay: Duration,
}

impl AuditConsumer {
    pub fn new(queue: RedisAuditQueue, pool: PgPool) -> Self {
        Self {
            queue,
            pool,
            idle_delay: Duration::from_secs(1),
        }
    }

    /// Process records until `shutdown` resolves
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<u64, AuditError> {
        tokio::pin!(shutdown);

        let mut stored = self.replay_pending().await?;
        tracing::info!(key = self.queue.key(), replayed = stored, "Audit consumer started");

        loop {
            let result = tokio::select! {
                _ = &mut shutdown => break,
                result = self.process_next() => result,
            };

            match result {
                Ok(true) => stored += 1,
                Ok(false) => {
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(self.idle_delay) => {}
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Audit consumer step failed");
                    tokio::time::sleep(self.idle_delay).await;
                }
            }
        }

        tracing::info!(stored, "Audit consumer stopped");
        Ok(stored)
    }

    /// Records left in the processing list by an interrupted run
    async fn replay_pending(&self) -> Result<u64, AuditError> {
        let mut conn = self.queue.connection();
        let pending: Vec<String> = conn.lrange(self.queue.processing_key(), 0, -1).await?;

        let mut stored = 0;
        for payload in pending {
            self.commit(&payload).await?;
            stored += 1;
        }
        Ok(stored)
    }

    /// Move one record from the queue to Postgres; `false` when the queue is empty
    pub async fn process_next(&self) -> Result<bool, AuditError> {
        let mut conn = self.queue.connection();
        let payload: Option<String> = conn
            .rpoplpush(self.queue.key(), self.queue.processing_key())
            .await?;

        match payload {
            Some(payload) => {
                self.commit(&payload).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn commit(&self, payload: &str) -> Result<(), AuditError> {
        match serde_json::from_str::<AuditRecord>(payload) {
            Ok(record) => {
                insert_record(&self.pool, &record).await?;
                tracing::info!(
                    id = %record.id,
                    signal = record.signal.as_str(),
                    confidence = record.confidence,
                    "Audit record stored"
                );
            }
            Err(e) => {
                // Unparseable payloads would block the processing list forever
                tracing::error!(error = %e, payload, "Dropping malformed audit record");
            }
        }

        let mut conn = self.queue.connection();
        conn.lrem::<_, _, ()>(self.queue.processing_key(), 1, payload)
            .await?;
        Ok(())
    }
}

pub async fn insert_record(pool: &PgPool, record: &AuditRecord) -> Result<(), AuditError> {
    sqlx::query(
        r#"
        INSERT INTO signal_log
            (id, symbol, signal, confidence, reason, candle_chart, pattern_chart, recorded_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(record.id)
    .bind(&record.symbol)
    .bind(record.signal.as_str())
    .bind(i16::from(record.confidence))
    .bind(&record.reason)
    .bind(&record.candle_chart)
    .bind(&record.pattern_chart)
    .bind(record.recorded_at)
    .execute(pool)
    .await?;

    Ok(())
}
