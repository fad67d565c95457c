use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::instrument;

use crate::config::EnvFlagOverrides;
use crate::flags::flag_match_reason::FeatureFlagMatchReason;
use crate::flags::flag_matching::{match_config, FeatureFlagMatch};
use crate::flags::flag_models::FlagKey;
use crate::flags::flag_store::FlagConfigStore;
use crate::metrics_consts::{FLAG_EVALUATION_COUNTER, FLAG_EVALUATION_ERROR_COUNTER};

/// Answers "is this flag on for this user". Never fails: storage problems
/// fall back to the env overrides, then to `false`.
pub struct FlagService {
    store: Arc<FlagConfigStore>,
    env_overrides: EnvFlagOverrides,
}

impl FlagService {
    pub fn new(store: Arc<FlagConfigStore>, env_overrides: EnvFlagOverrides) -> Self {
        Self {
            store,
            env_overrides,
        }
    }

    pub async fn is_enabled(&self, user_id: &str, flag: FlagKey) -> bool {
        self.evaluate(user_id, flag).await.matches
    }

    #[instrument(skip(self), fields(flag = %flag))]
    pub async fn evaluate(&self, user_id: &str, flag: FlagKey) -> FeatureFlagMatch {
        let result = self.evaluate_inner(user_id, flag).await;
        metrics::counter!(
            FLAG_EVALUATION_COUNTER,
            "flag" => flag.to_string(),
            "reason" => result.reason.to_string()
        )
        .increment(1);
        result
    }

    /// Evaluates every known flag for one user.
    pub async fn evaluate_all(&self, user_id: &str) -> BTreeMap<FlagKey, FeatureFlagMatch> {
        let mut results = BTreeMap::new();
        for flag in FlagKey::all() {
            results.insert(flag, self.evaluate(user_id, flag).await);
        }
        results
    }

    /// Evaluates a flag by name. Names we don't know are off, not an error.
    pub async fn evaluate_by_name(&self, user_id: &str, flag_name: &str) -> FeatureFlagMatch {
        match FlagKey::parse(flag_name) {
            Ok(flag) => self.evaluate(user_id, flag).await,
            Err(e) => {
                tracing::debug!("{}", e);
                FeatureFlagMatch::new(false, FeatureFlagMatchReason::EvaluationError)
            }
        }
    }

    async fn evaluate_inner(&self, user_id: &str, flag: FlagKey) -> FeatureFlagMatch {
        let env_override = self.env_overrides.get(flag);

        if let Some(env_override) = env_override {
            if let Some(matches) = env_override.fast_path(user_id) {
                let reason = if env_override.rollout_percentage == Some(100) {
                    FeatureFlagMatchReason::EnvFullRollout
                } else {
                    FeatureFlagMatchReason::EnvRolloutBound
                };
                return FeatureFlagMatch::new(matches, reason);
            }
        }

        match self.store.get(flag).await {
            Ok(config) => match_config(user_id, &config),
            Err(e) => {
                metrics::counter!(FLAG_EVALUATION_ERROR_COUNTER, "flag" => flag.to_string())
                    .increment(1);
                tracing::warn!("flag evaluation fell back to env config: {}", e);
                match env_override {
                    Some(env_override) => FeatureFlagMatch::new(
                        env_override.fallback(user_id),
                        FeatureFlagMatchReason::EnvFallback,
                    ),
                    None => FeatureFlagMatch::new(false, FeatureFlagMatchReason::EvaluationError),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvFlagOverride;
    use crate::flags::flag_models::{FlagConfig, FlagConfigUpdate};
    use crate::redis::{CustomRedisError, MockRedisClient};
    use crate::test_utils::{insert_flag_config, setup_flag_service, setup_store};

    #[tokio::test]
    async fn test_scenario_blacklist_and_percentage() {
        let client = MockRedisClient::new();
        let mut config = FlagConfig::new(true, 25);
        config.blacklist_users.insert("u9".to_string());
        insert_flag_config(&client, FlagKey::V2ScriptGeneration, config);
        let service = setup_flag_service(client, EnvFlagOverrides::default());

        assert!(!service.is_enabled("u9", FlagKey::V2ScriptGeneration).await);
        // bucket 10
        assert!(service.is_enabled("user_75", FlagKey::V2ScriptGeneration).await);
        // bucket 30
        assert!(!service.is_enabled("user_39", FlagKey::V2ScriptGeneration).await);
    }

    #[tokio::test]
    async fn test_disabled_flag_is_off_for_everyone() {
        let client = MockRedisClient::new();
        let mut config = FlagConfig::new(false, 100);
        config.whitelist_users.insert("user_75".to_string());
        config.admin_override = true;
        insert_flag_config(&client, FlagKey::V2ScriptGeneration, config);
        let service = setup_flag_service(client, EnvFlagOverrides::default());

        for user in ["user_75", "user_12", "user_11", "u9"] {
            let result = service.evaluate(user, FlagKey::V2ScriptGeneration).await;
            assert_eq!(
                result,
                FeatureFlagMatch::new(false, FeatureFlagMatchReason::FlagDisabled),
                "{user}"
            );
        }
    }

    #[tokio::test]
    async fn test_blacklisted_user_stays_off_even_if_whitelisted() {
        let client = MockRedisClient::new();
        let mut config = FlagConfig::new(true, 100);
        config.whitelist_users.insert("u9".to_string());
        config.blacklist_users.insert("u9".to_string());
        insert_flag_config(&client, FlagKey::V2ScriptGeneration, config);
        let service = setup_flag_service(client, EnvFlagOverrides::default());

        assert!(!service.is_enabled("u9", FlagKey::V2ScriptGeneration).await);
    }

    #[tokio::test]
    async fn test_whitelisted_user_is_on_at_zero_percent() {
        let client = MockRedisClient::new();
        let mut config = FlagConfig::new(true, 0);
        config.whitelist_users.insert("user_12".to_string());
        insert_flag_config(&client, FlagKey::V2ScriptGeneration, config);
        let service = setup_flag_service(client, EnvFlagOverrides::default());

        assert!(service.is_enabled("user_12", FlagKey::V2ScriptGeneration).await);
        assert!(!service.is_enabled("user_11", FlagKey::V2ScriptGeneration).await);
    }

    #[tokio::test]
    async fn test_env_full_rollout_skips_storage() {
        let client = MockRedisClient::new();
        let overrides = EnvFlagOverrides::default().with_override(
            FlagKey::V2ScriptGeneration,
            EnvFlagOverride {
                enabled: true,
                rollout_percentage: Some(100),
            },
        );
        let service = setup_flag_service(client.clone(), overrides);

        let result = service.evaluate("user_12", FlagKey::V2ScriptGeneration).await;
        assert_eq!(
            result,
            FeatureFlagMatch::new(true, FeatureFlagMatchReason::EnvFullRollout)
        );
        assert!(client.get_calls().is_empty());
    }

    #[tokio::test]
    async fn test_env_partial_rollout_buckets_without_storage() {
        let client = MockRedisClient::new();
        let overrides = EnvFlagOverrides::default().with_override(
            FlagKey::V2ScriptGeneration,
            EnvFlagOverride {
                enabled: false,
                rollout_percentage: Some(25),
            },
        );
        let service = setup_flag_service(client.clone(), overrides);

        assert!(service.is_enabled("user_75", FlagKey::V2ScriptGeneration).await);
        assert!(!service.is_enabled("user_39", FlagKey::V2ScriptGeneration).await);
        assert!(client.get_calls().is_empty());
    }

    #[tokio::test]
    async fn test_env_boolean_only_defers_to_storage() {
        let client = MockRedisClient::new();
        insert_flag_config(&client, FlagKey::V2ScriptGeneration, FlagConfig::new(false, 0));
        let overrides = EnvFlagOverrides::default().with_override(
            FlagKey::V2ScriptGeneration,
            EnvFlagOverride {
                enabled: true,
                rollout_percentage: None,
            },
        );
        let service = setup_flag_service(client, overrides);

        assert_eq!(
            service.evaluate("user_12", FlagKey::V2ScriptGeneration).await.reason,
            FeatureFlagMatchReason::FlagDisabled
        );
    }

    #[tokio::test]
    async fn test_storage_error_falls_back_to_env_override() {
        // nothing stored and writes failing, so seeding the default errors
        let client = MockRedisClient::new();
        client.fail_writes(Some(CustomRedisError::Timeout));
        let overrides = EnvFlagOverrides::default().with_override(
            FlagKey::V2ScriptGeneration,
            EnvFlagOverride {
                enabled: true,
                rollout_percentage: None,
            },
        );
        let service = setup_flag_service(client, overrides);

        assert_eq!(
            service.evaluate("user_39", FlagKey::V2ScriptGeneration).await,
            FeatureFlagMatch::new(true, FeatureFlagMatchReason::EnvFallback)
        );
    }

    #[tokio::test]
    async fn test_storage_error_without_override_is_off() {
        let client = MockRedisClient::new();
        client.fail_writes(Some(CustomRedisError::Timeout));
        let service = setup_flag_service(client, EnvFlagOverrides::default());

        assert_eq!(
            service.evaluate("user_12", FlagKey::EnhancedGhostWriter).await,
            FeatureFlagMatch::new(false, FeatureFlagMatchReason::EvaluationError)
        );
    }

    #[tokio::test]
    async fn test_unreadable_storage_uses_defaults() {
        let client = MockRedisClient::new();
        client.fail_reads(Some(CustomRedisError::Timeout));
        let service = setup_flag_service(client, EnvFlagOverrides::default());

        // enhanced_ghost_writer ships fully on, v2_script_generation ships off
        assert!(service.is_enabled("user_39", FlagKey::EnhancedGhostWriter).await);
        assert!(!service.is_enabled("user_39", FlagKey::V2ScriptGeneration).await);
    }

    #[tokio::test]
    async fn test_unknown_flag_name_is_off() {
        let service = setup_flag_service(MockRedisClient::new(), EnvFlagOverrides::default());

        let result = service.evaluate_by_name("user_12", "does_not_exist").await;
        assert!(!result.matches);

        let result = service
            .evaluate_by_name("user_12", "enhanced_ghost_writer")
            .await;
        assert!(result.matches);
    }

    #[tokio::test]
    async fn test_evaluate_all_covers_every_flag() {
        let service = setup_flag_service(MockRedisClient::new(), EnvFlagOverrides::default());

        let results = service.evaluate_all("user_75").await;
        assert_eq!(results.len(), FlagKey::all().len());
        assert!(!results[&FlagKey::V2ScriptGeneration].matches);
        assert!(results[&FlagKey::EnhancedGhostWriter].matches);
        // video_analyzer_segmentation ships at 25%, user_75 is bucket 10
        assert!(results[&FlagKey::VideoAnalyzerSegmentation].matches);
    }

    #[tokio::test]
    async fn test_evaluation_sees_update_immediately_on_this_instance() {
        let client = MockRedisClient::new();
        insert_flag_config(&client, FlagKey::V2ScriptGeneration, FlagConfig::new(true, 5));
        let store = Arc::new(setup_store(client));
        let service = FlagService::new(store.clone(), EnvFlagOverrides::default());

        // bucket 10 is outside 5%
        assert!(!service.is_enabled("user_75", FlagKey::V2ScriptGeneration).await);

        store
            .update(
                FlagKey::V2ScriptGeneration,
                FlagConfigUpdate {
                    rollout_percentage: Some(25),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(service.is_enabled("user_75", FlagKey::V2ScriptGeneration).await);
    }
}
