use std::sync::Arc;
use std::time::Duration;

use rand::{distributions::Alphanumeric, Rng};

use crate::config::EnvFlagOverrides;
use crate::flags::flag_models::{FlagConfig, FlagKey, FlagMetrics};
use crate::flags::flag_metrics::FlagMetricsStore;
use crate::flags::flag_service::FlagService;
use crate::flags::flag_store::{FlagConfigCache, FlagConfigStore};
use crate::redis::MockRedisClient;
use crate::rollout::controller::RolloutController;

pub fn random_string(prefix: &str, length: usize) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect();
    format!("{}{}", prefix, suffix)
}

/// Writes a config straight into the mock, bypassing the store and its cache.
pub fn insert_flag_config(client: &MockRedisClient, flag: FlagKey, config: FlagConfig) {
    let serialized = serde_json::to_string(&config).expect("Failed to serialize config");
    client.insert_value(&flag.config_cache_key(), &serialized);
}

pub fn insert_flag_metrics(client: &MockRedisClient, flag: FlagKey, metrics: FlagMetrics) {
    let serialized = serde_json::to_string(&metrics).expect("Failed to serialize metrics");
    client.insert_value(&flag.metrics_cache_key(), &serialized);
}

pub fn setup_store(client: MockRedisClient) -> FlagConfigStore {
    FlagConfigStore::new(
        Arc::new(client),
        FlagConfigCache::new(100, Duration::from_secs(300)),
    )
}

pub fn setup_flag_service(client: MockRedisClient, overrides: EnvFlagOverrides) -> FlagService {
    FlagService::new(Arc::new(setup_store(client)), overrides)
}

pub fn setup_rollout_controller(client: MockRedisClient) -> RolloutController {
    let redis_client = Arc::new(client);
    RolloutController::new(
        redis_client.clone(),
        Arc::new(FlagConfigStore::new(
            redis_client.clone(),
            FlagConfigCache::new(100, Duration::from_secs(300)),
        )),
        Arc::new(FlagMetricsStore::new(redis_client)),
    )
}

pub fn healthy_metrics() -> FlagMetrics {
    FlagMetrics {
        error_rate: 0.0,
        avg_response_time_ms: 100.0,
        success_rate: 1.0,
        ..Default::default()
    }
}
