use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

use crate::api::errors::FlagError;

pub type UserId = String;

pub const FLAG_CONFIG_KEY_PREFIX: &str = "rollout_flags:config:";
pub const FLAG_METRICS_KEY_PREFIX: &str = "rollout_flags:metrics:";
pub const FLAG_ROLLBACK_COUNT_KEY_PREFIX: &str = "rollout_flags:rollback_count:";

/// Every flag this service knows how to evaluate. Adding a flag means adding a
/// variant here and a row in `default_config`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FlagKey {
    V2ScriptGeneration,
    EnhancedGhostWriter,
    VideoAnalyzerSegmentation,
}

impl FlagKey {
    pub fn all() -> Vec<FlagKey> {
        FlagKey::iter().collect()
    }

    pub fn parse(name: &str) -> Result<FlagKey, FlagError> {
        name.parse::<FlagKey>()
            .map_err(|_| FlagError::UnknownFlag(name.to_string()))
    }

    /// Prefix of the environment variables that can override this flag,
    /// e.g. `FEATURE_FLAG_V2_SCRIPT_GENERATION`.
    pub fn env_var_prefix(&self) -> String {
        format!("FEATURE_FLAG_{}", self.as_ref().to_uppercase())
    }

    pub fn config_cache_key(&self) -> String {
        format!("{FLAG_CONFIG_KEY_PREFIX}{self}")
    }

    pub fn metrics_cache_key(&self) -> String {
        format!("{FLAG_METRICS_KEY_PREFIX}{self}")
    }

    pub fn rollback_count_key(&self) -> String {
        format!("{FLAG_ROLLBACK_COUNT_KEY_PREFIX}{self}")
    }

    /// The hardcoded config each flag ships with. New code paths start dark.
    pub fn default_config(&self) -> FlagConfig {
        match self {
            FlagKey::V2ScriptGeneration => FlagConfig::new(false, 0),
            FlagKey::EnhancedGhostWriter => FlagConfig::new(true, 100),
            FlagKey::VideoAnalyzerSegmentation => FlagConfig::new(true, 25),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FlagConfig {
    pub enabled: bool,
    pub rollout_percentage: u8,
    #[serde(default)]
    pub whitelist_users: BTreeSet<UserId>,
    #[serde(default)]
    pub blacklist_users: BTreeSet<UserId>,
    #[serde(default)]
    pub admin_override: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FlagConfig {
    pub fn new(enabled: bool, rollout_percentage: u8) -> Self {
        let now = Utc::now();
        FlagConfig {
            enabled,
            rollout_percentage,
            whitelist_users: BTreeSet::new(),
            blacklist_users: BTreeSet::new(),
            admin_override: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merges the fields present in `update` and stamps `updated_at`.
    pub fn apply(&mut self, update: FlagConfigUpdate) {
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
        if let Some(rollout_percentage) = update.rollout_percentage {
            self.rollout_percentage = rollout_percentage;
        }
        if let Some(whitelist_users) = update.whitelist_users {
            self.whitelist_users = whitelist_users;
        }
        if let Some(blacklist_users) = update.blacklist_users {
            self.blacklist_users = blacklist_users;
        }
        if let Some(admin_override) = update.admin_override {
            self.admin_override = admin_override;
        }
        self.updated_at = Utc::now();
    }
}

/// Partial `FlagConfig`; absent fields are left untouched by `update`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FlagConfigUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout_percentage: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whitelist_users: Option<BTreeSet<UserId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blacklist_users: Option<BTreeSet<UserId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_override: Option<bool>,
}

impl FlagConfigUpdate {
    pub fn validate(&self) -> Result<(), FlagError> {
        match self.rollout_percentage {
            Some(p) if p > 100 => Err(FlagError::InvalidRolloutPercentage(u32::from(p))),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FlagMetrics {
    #[serde(default)]
    pub total_users: u64,
    #[serde(default)]
    pub enabled_users: u64,
    #[serde(default)]
    pub success_rate: f64,
    #[serde(default)]
    pub avg_response_time_ms: f64,
    #[serde(default)]
    pub error_rate: f64,
    #[serde(default)]
    pub rollback_count: u64,
    pub last_updated: DateTime<Utc>,
}

impl Default for FlagMetrics {
    fn default() -> Self {
        FlagMetrics {
            total_users: 0,
            enabled_users: 0,
            success_rate: 0.0,
            avg_response_time_ms: 0.0,
            error_rate: 0.0,
            rollback_count: 0,
            last_updated: Utc::now(),
        }
    }
}

impl FlagMetrics {
    pub fn apply(&mut self, update: FlagMetricsUpdate) {
        if let Some(total_users) = update.total_users {
            self.total_users = total_users;
        }
        if let Some(enabled_users) = update.enabled_users {
            self.enabled_users = enabled_users;
        }
        if let Some(success_rate) = update.success_rate {
            self.success_rate = success_rate;
        }
        if let Some(avg_response_time_ms) = update.avg_response_time_ms {
            self.avg_response_time_ms = avg_response_time_ms;
        }
        if let Some(error_rate) = update.error_rate {
            self.error_rate = error_rate;
        }
        self.last_updated = Utc::now();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FlagMetricsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_users: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_users: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_response_time_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_rate: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_key_names_are_snake_case() {
        assert_eq!(FlagKey::V2ScriptGeneration.to_string(), "v2_script_generation");
        assert_eq!(
            FlagKey::parse("enhanced_ghost_writer").unwrap(),
            FlagKey::EnhancedGhostWriter
        );
        assert!(matches!(
            FlagKey::parse("not_a_flag"),
            Err(FlagError::UnknownFlag(name)) if name == "not_a_flag"
        ));
        assert_eq!(
            FlagKey::V2ScriptGeneration.env_var_prefix(),
            "FEATURE_FLAG_V2_SCRIPT_GENERATION"
        );
        assert_eq!(
            serde_json::to_value(FlagKey::VideoAnalyzerSegmentation).unwrap(),
            serde_json::json!("video_analyzer_segmentation")
        );
    }

    #[test]
    fn test_every_flag_has_a_valid_default() {
        for flag in FlagKey::all() {
            assert!(flag.default_config().rollout_percentage <= 100, "{flag}");
        }
        assert!(!FlagKey::V2ScriptGeneration.default_config().enabled);
    }

    #[test]
    fn test_apply_only_touches_present_fields() {
        let mut config = FlagConfig::new(true, 25);
        config.blacklist_users.insert("u9".to_string());
        let created_at = config.created_at;

        config.apply(FlagConfigUpdate {
            rollout_percentage: Some(50),
            ..Default::default()
        });

        assert!(config.enabled);
        assert_eq!(config.rollout_percentage, 50);
        assert!(config.blacklist_users.contains("u9"));
        assert_eq!(config.created_at, created_at);
        assert!(config.updated_at >= created_at);
    }

    #[test]
    fn test_update_rejects_percentage_over_100() {
        let update = FlagConfigUpdate {
            rollout_percentage: Some(101),
            ..Default::default()
        };
        assert!(matches!(
            update.validate(),
            Err(FlagError::InvalidRolloutPercentage(101))
        ));
        assert!(FlagConfigUpdate::default().validate().is_ok());
    }

    #[test]
    fn test_partial_update_deserializes_from_sparse_json() {
        let update: FlagConfigUpdate =
            serde_json::from_str(r#"{"blacklist_users": ["u9"], "admin_override": true}"#)
                .unwrap();
        assert_eq!(update.enabled, None);
        assert_eq!(update.admin_override, Some(true));
        assert!(update.blacklist_users.unwrap().contains("u9"));
    }
}
