use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use tracing::instrument;

use crate::api::errors::FlagError;
use crate::flags::flag_models::{FlagConfig, FlagConfigUpdate, FlagKey};
use crate::metrics_consts::{
    FLAG_CONFIG_CACHE_HIT_COUNTER, FLAG_CONFIG_CACHE_MISS_COUNTER, FLAG_CONFIG_READ_ERRORS_COUNTER,
    FLAG_CONFIG_SEEDED_COUNTER,
};
use crate::redis::{Client as RedisClient, CustomRedisError};

/// Process-local read cache for flag configs. Owned by the store instance so
/// tests get a fresh one per store.
#[derive(Clone)]
pub struct FlagConfigCache {
    cache: Cache<FlagKey, FlagConfig>,
}

impl FlagConfigCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    pub fn get(&self, flag: FlagKey) -> Option<FlagConfig> {
        self.cache.get(&flag)
    }

    pub fn insert(&self, flag: FlagKey, config: FlagConfig) {
        self.cache.insert(flag, config);
    }

    pub fn contains(&self, flag: FlagKey) -> bool {
        self.cache.contains_key(&flag)
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

/// Durable per-flag configuration, fronted by a short-lived read cache.
///
/// Reads degrade to the flag's hardcoded default when redis is unavailable;
/// writes always surface their errors.
pub struct FlagConfigStore {
    redis_client: Arc<dyn RedisClient + Send + Sync>,
    cache: FlagConfigCache,
}

impl FlagConfigStore {
    pub fn new(redis_client: Arc<dyn RedisClient + Send + Sync>, cache: FlagConfigCache) -> Self {
        Self {
            redis_client,
            cache,
        }
    }

    #[instrument(skip(self), fields(flag = %flag))]
    pub async fn get(&self, flag: FlagKey) -> Result<FlagConfig, FlagError> {
        if let Some(config) = self.cache.get(flag) {
            metrics::counter!(FLAG_CONFIG_CACHE_HIT_COUNTER).increment(1);
            return Ok(config);
        }
        metrics::counter!(FLAG_CONFIG_CACHE_MISS_COUNTER).increment(1);

        match self.read_durable(flag).await {
            Ok(Some(config)) => {
                self.cache.insert(flag, config.clone());
                Ok(config)
            }
            Ok(None) => {
                let config = flag.default_config();
                self.write_durable(flag, &config).await?;
                metrics::counter!(FLAG_CONFIG_SEEDED_COUNTER, "flag" => flag.to_string())
                    .increment(1);
                tracing::info!("seeded default config");
                self.cache.insert(flag, config.clone());
                Ok(config)
            }
            Err(e) => {
                // not cached, so the next read retries redis
                metrics::counter!(FLAG_CONFIG_READ_ERRORS_COUNTER, "flag" => flag.to_string())
                    .increment(1);
                tracing::warn!("falling back to default config: {}", e);
                Ok(flag.default_config())
            }
        }
    }

    /// Merges `update` into the durable record and drops every cached config.
    #[instrument(skip(self), fields(flag = %flag))]
    pub async fn update(
        &self,
        flag: FlagKey,
        update: FlagConfigUpdate,
    ) -> Result<FlagConfig, FlagError> {
        update.validate()?;

        let mut config = self.get_durable(flag).await?;
        self.apply_and_write(flag, &mut config, update).await?;
        Ok(config)
    }

    /// Like `update`, but only when `condition` holds for the durable record.
    /// Returns `None` without writing otherwise.
    ///
    /// The check and the write are two redis calls, not a transaction: a write
    /// from another instance landing in between is overwritten.
    #[instrument(skip(self, condition), fields(flag = %flag))]
    pub async fn update_if<F>(
        &self,
        flag: FlagKey,
        update: FlagConfigUpdate,
        condition: F,
    ) -> Result<Option<FlagConfig>, FlagError>
    where
        F: FnOnce(&FlagConfig) -> bool + Send,
    {
        update.validate()?;

        let mut config = self.get_durable(flag).await?;
        if !condition(&config) {
            return Ok(None);
        }
        self.apply_and_write(flag, &mut config, update).await?;
        Ok(Some(config))
    }

    /// The durable record, bypassing the cache. Write-side decisions use this
    /// so a stale cache entry can't undo another instance's change.
    ///
    /// A missing or unparseable record reads as the flag's default, so admin
    /// writes (rollback above all) can always overwrite it. Transport errors
    /// propagate.
    pub async fn get_durable(&self, flag: FlagKey) -> Result<FlagConfig, FlagError> {
        match self.read_durable(flag).await {
            Ok(Some(config)) => Ok(config),
            Ok(None) => Ok(flag.default_config()),
            Err(FlagError::DataParsingError) => {
                tracing::warn!("stored config is unreadable, starting from the default");
                Ok(flag.default_config())
            }
            Err(e) => Err(e),
        }
    }

    async fn apply_and_write(
        &self,
        flag: FlagKey,
        config: &mut FlagConfig,
        update: FlagConfigUpdate,
    ) -> Result<(), FlagError> {
        config.apply(update);
        self.write_durable(flag, config).await?;

        // Updates are rare and admin-driven, so clear everything rather than
        // tracking which entries depend on what.
        self.cache.clear();
        tracing::info!(
            enabled = config.enabled,
            rollout_percentage = config.rollout_percentage,
            "flag config updated"
        );
        Ok(())
    }

    pub fn cache(&self) -> &FlagConfigCache {
        &self.cache
    }

    async fn read_durable(&self, flag: FlagKey) -> Result<Option<FlagConfig>, FlagError> {
        let raw = match self.redis_client.get(flag.config_cache_key()).await {
            Ok(raw) => raw,
            Err(CustomRedisError::NotFound) => return Ok(None),
            Err(e) => {
                tracing::error!("failed to read flag config: {}", e);
                return Err(FlagError::from_redis_read(e));
            }
        };

        serde_json::from_str::<FlagConfig>(&raw)
            .map(Some)
            .map_err(|e| {
                tracing::error!("failed to parse flag config: {}", e);
                FlagError::DataParsingError
            })
    }

    async fn write_durable(&self, flag: FlagKey, config: &FlagConfig) -> Result<(), FlagError> {
        let serialized = serde_json::to_string(config)
            .map_err(|e| FlagError::SerializationError(e.to_string()))?;
        self.redis_client
            .set(flag.config_cache_key(), serialized)
            .await
            .map_err(|e| {
                tracing::error!("failed to write flag config: {}", e);
                FlagError::StoreWriteFailed(e)
            })
    }
}
