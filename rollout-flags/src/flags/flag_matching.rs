use serde::Serialize;

use crate::flags::flag_match_reason::FeatureFlagMatchReason;
use crate::flags::flag_matching_utils::calculate_bucket;
use crate::flags::flag_models::FlagConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeatureFlagMatch {
    pub matches: bool,
    pub reason: FeatureFlagMatchReason,
}

impl FeatureFlagMatch {
    pub fn new(matches: bool, reason: FeatureFlagMatchReason) -> Self {
        Self { matches, reason }
    }
}

/// Decides a stored config for one user. The order is a contract: the kill
/// switch beats everything, the blacklist beats the whitelist, and both beat
/// the admin override and the percentage.
pub fn match_config(user_id: &str, config: &FlagConfig) -> FeatureFlagMatch {
    if !config.enabled {
        return FeatureFlagMatch::new(false, FeatureFlagMatchReason::FlagDisabled);
    }
    if config.blacklist_users.contains(user_id) {
        return FeatureFlagMatch::new(false, FeatureFlagMatchReason::Blacklisted);
    }
    if config.whitelist_users.contains(user_id) {
        return FeatureFlagMatch::new(true, FeatureFlagMatchReason::Whitelisted);
    }
    if config.admin_override {
        return FeatureFlagMatch::new(true, FeatureFlagMatchReason::AdminOverride);
    }

    if calculate_bucket(user_id) < config.rollout_percentage {
        FeatureFlagMatch::new(true, FeatureFlagMatchReason::InRolloutBound)
    } else {
        FeatureFlagMatch::new(false, FeatureFlagMatchReason::OutOfRolloutBound)
    }
}
