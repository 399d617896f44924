use crate::execution::{LedgerSnapshot, SettlementRecord};
use crate::models::Session;
use crate::Result;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use tokio::time::{timeout, Duration};

/// Ledger and rotation state needed to resume after a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub ledger: LedgerSnapshot,
    pub last_claimed_slot: Option<DateTime<Utc>>,
    /// Held sessions not yet settled, so open positions can still resolve
    #[serde(default)]
    pub sessions: Vec<Session>,
    pub saved_at: DateTime<Utc>,
}

/// Redis persistence for settlements and the ledger checkpoint
///
/// Settlements live in a sorted set scored by settlement time; the checkpoint
/// is a single JSON string.
pub struct RedisPersistence {
    conn: ConnectionManager,
    namespace: String,
}

impl RedisPersistence {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    /// * `namespace` - Key prefix, e.g. "updownbot"
    pub async fn new(redis_url: &str, namespace: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| "Redis connection timeout after 5 seconds")??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self {
            conn,
            namespace: namespace.to_string(),
        })
    }

    fn settlements_key(&self) -> String {
        format!("{}:settlements", self.namespace)
    }

    fn checkpoint_key(&self) -> String {
        format!("{}:checkpoint", self.namespace)
    }

    /// Append settlement records to `{namespace}:settlements`
    pub async fn save_settlements(&mut self, records: &[SettlementRecord]) -> Result<()> {
        let key = self.settlements_key();

        for record in records {
            let value = serde_json::to_string(record)?;
            let score = record.settled_at.timestamp() as f64;
            self.conn.zadd::<_, _, _, ()>(&key, value, score).await?;
        }

        tracing::debug!("Saved {} settlement records to Redis", records.len());

        Ok(())
    }

    /// Settlement records since `since`, oldest first
    pub async fn load_settlements(&mut self, since: DateTime<Utc>) -> Result<Vec<SettlementRecord>> {
        let key = self.settlements_key();
        let results: Vec<String> = self
            .conn
            .zrangebyscore(&key, since.timestamp() as f64, "+inf")
            .await?;

        let mut records = Vec::with_capacity(results.len());
        for json_str in results {
            records.push(serde_json::from_str(&json_str)?);
        }
        Ok(records)
    }

    pub async fn save_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        let key = self.checkpoint_key();
        let value = serde_json::to_string(checkpoint)?;
        self.conn.set::<_, _, ()>(&key, value).await?;
        tracing::debug!(
            cash = %checkpoint.ledger.cash_balance,
            open = checkpoint.ledger.open_positions.len(),
            "Checkpoint saved"
        );
        Ok(())
    }

    pub async fn load_checkpoint(&mut self) -> Result<Option<Checkpoint>> {
        let key = self.checkpoint_key();
        let value: Option<String> = self.conn.get(&key).await?;
        match value {
            Some(json_str) => Ok(Some(serde_json::from_str(&json_str)?)),
            None => Ok(None),
        }
    }

    /// Remove settlement records older than `keep_hours`
    pub async fn cleanup_old(&mut self, keep_hours: u64) -> Result<usize> {
        let key = self.settlements_key();
        let cutoff = Utc::now() - chrono::Duration::hours(keep_hours as i64);

        let removed: usize = self
            .conn
            .zrembyscore(&key, "-inf", cutoff.timestamp() as f64)
            .await?;

        if removed > 0 {
            tracing::debug!("Cleaned up {} old settlement records", removed);
        }

        Ok(removed)
    }

    pub async fn count_settlements(&mut self) -> Result<usize> {
        let key = self.settlements_key();
        let count: usize = self.conn.zcard(&key).await?;
        Ok(count)
    }

    /// Drop every key under the namespace
    pub async fn clear(&mut self) -> Result<()> {
        let keys = [self.settlements_key(), self.checkpoint_key()];
        self.conn.del::<_, ()>(&keys[..]).await?;
        Ok(())
    }
}
