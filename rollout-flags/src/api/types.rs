use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::flags::flag_match_reason::FeatureFlagMatchReason;
use crate::flags::flag_matching::FeatureFlagMatch;
use crate::flags::flag_models::{FlagConfig, FlagKey, FlagMetrics};
use crate::rollout::rollback::AuditRecord;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EvaluateQueryParams {
    pub user_id: Option<String>,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct FlagEvaluation {
    pub enabled: bool,
    pub reason: FeatureFlagMatchReason,
}

impl From<FeatureFlagMatch> for FlagEvaluation {
    fn from(result: FeatureFlagMatch) -> Self {
        FlagEvaluation {
            enabled: result.matches,
            reason: result.reason,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EvaluateFlagResponse {
    pub flag: String,
    pub user_id: String,
    #[serde(flatten)]
    pub evaluation: FlagEvaluation,
}

#[derive(Debug, Serialize)]
pub struct EvaluateAllResponse {
    pub user_id: String,
    pub flags: BTreeMap<FlagKey, FlagEvaluation>,
}

#[derive(Debug, Serialize)]
pub struct FlagConfigResponse {
    pub flag: FlagKey,
    #[serde(flatten)]
    pub config: FlagConfig,
}

#[derive(Debug, Serialize)]
pub struct FlagMetricsResponse {
    pub flag: FlagKey,
    pub metrics: Option<FlagMetrics>,
}

#[derive(Debug, Deserialize)]
pub struct IncreaseRolloutRequest {
    pub percentage: u8,
}

#[derive(Debug, Serialize)]
pub struct IncreaseRolloutResponse {
    pub flag: FlagKey,
    pub increased: bool,
    pub rollout_percentage: u8,
}

#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub reason: String,
    pub admin_user_id: String,
}

#[derive(Debug, Serialize)]
pub struct AuditLogResponse {
    pub flag: FlagKey,
    pub records: Vec<AuditRecord>,
}
