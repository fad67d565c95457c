use std::sync::Arc;

use tracing::instrument;

use crate::api::errors::FlagError;
use crate::flags::flag_models::{FlagKey, FlagMetrics, FlagMetricsUpdate};
use crate::redis::{Client as RedisClient, CustomRedisError};

/// Per-flag rollout health, written by the measurement pipeline and read by
/// the rollout controller. Never cached: progression decisions need the
/// latest numbers.
pub struct FlagMetricsStore {
    redis_client: Arc<dyn RedisClient + Send + Sync>,
}

impl FlagMetricsStore {
    pub fn new(redis_client: Arc<dyn RedisClient + Send + Sync>) -> Self {
        Self { redis_client }
    }

    /// `Ok(None)` until the first metrics write or rollback for this flag.
    /// The rollback count lives under its own counter key and is overlaid on
    /// the stored document.
    #[instrument(skip(self), fields(flag = %flag))]
    pub async fn get(&self, flag: FlagKey) -> Result<Option<FlagMetrics>, FlagError> {
        let stored = match self.redis_client.get(flag.metrics_cache_key()).await {
            Ok(raw) => Some(serde_json::from_str::<FlagMetrics>(&raw).map_err(|e| {
                tracing::error!("failed to parse flag metrics: {}", e);
                FlagError::DataParsingError
            })?),
            Err(CustomRedisError::NotFound) => None,
            Err(e) => return Err(FlagError::from_redis_read(e)),
        };
        let rollback_count = self.read_rollback_count(flag).await?;

        Ok(match (stored, rollback_count) {
            (None, None) => None,
            (Some(metrics), None) => Some(metrics),
            (stored, Some(count)) => {
                let mut metrics = stored.unwrap_or_default();
                metrics.rollback_count = count;
                Some(metrics)
            }
        })
    }

    /// Merges the reported fields into the stored document. Two reporters
    /// writing at once can lose one of their fields: this is a read then a
    /// write, not a transaction.
    #[instrument(skip(self), fields(flag = %flag))]
    pub async fn update(
        &self,
        flag: FlagKey,
        update: FlagMetricsUpdate,
    ) -> Result<FlagMetrics, FlagError> {
        let mut metrics = self.get(flag).await?.unwrap_or_default();
        metrics.apply(update);
        self.write(flag, &metrics).await?;
        Ok(metrics)
    }

    /// Atomic on the redis side, so concurrent rollbacks are all counted.
    #[instrument(skip(self), fields(flag = %flag))]
    pub async fn increment_rollback_count(&self, flag: FlagKey) -> Result<u64, FlagError> {
        Ok(self.redis_client.incr(flag.rollback_count_key()).await?)
    }

    async fn read_rollback_count(&self, flag: FlagKey) -> Result<Option<u64>, FlagError> {
        match self.redis_client.get(flag.rollback_count_key()).await {
            Ok(raw) => raw.parse::<u64>().map(Some).map_err(|e| {
                tracing::error!("failed to parse rollback count: {}", e);
                FlagError::DataParsingError
            }),
            Err(CustomRedisError::NotFound) => Ok(None),
            Err(e) => Err(FlagError::from_redis_read(e)),
        }
    }

    async fn write(&self, flag: FlagKey, metrics: &FlagMetrics) -> Result<(), FlagError> {
        let serialized = serde_json::to_string(metrics)
            .map_err(|e| FlagError::SerializationError(e.to_string()))?;
        self.redis_client
            .set(flag.metrics_cache_key(), serialized)
            .await?;
        Ok(())
    }
}
