use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::errors::FlagError;
use crate::flags::flag_metrics::FlagMetricsStore;
use crate::flags::flag_models::{FlagConfig, FlagConfigUpdate, FlagKey, FlagMetrics};
use crate::flags::flag_store::FlagConfigStore;
use crate::metrics_consts::{ROLLOUT_PROGRESS_COUNTER, ROLLOUT_STARTED_COUNTER};
use crate::redis::{Client as RedisClient, CustomRedisError};
use crate::rollout::phases::{
    first_phase, is_terminal, next_phase, phase_for_percentage, CriterionFailure, RolloutPhase,
};

pub const ROLLOUT_SCHEDULE_KEY_PREFIX: &str = "rollout_flags:schedule:";

/// "Run the progression check for `flag` at `run_at`". Something outside this
/// service (cron, a queue) picks these up and calls `progress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledCheck {
    pub flag: FlagKey,
    pub phase: u8,
    pub run_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProgressOutcome {
    Advanced {
        from_phase: u8,
        to_phase: u8,
        from_percentage: u8,
        to_percentage: u8,
        next_check_at: Option<DateTime<Utc>>,
    },
    CriteriaNotMet {
        phase: u8,
        failures: Vec<CriterionFailure>,
    },
    MetricsUnavailable {
        phase: u8,
    },
    /// The flag is off (rolled back or disabled by hand); `start_rollout`
    /// begins again from the first phase.
    Disabled,
    /// The durable record changed between the check and the write, so
    /// nothing was written.
    Superseded,
    Complete,
}

impl ProgressOutcome {
    pub fn advanced(&self) -> bool {
        matches!(self, ProgressOutcome::Advanced { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            ProgressOutcome::Advanced { .. } => "advanced",
            ProgressOutcome::CriteriaNotMet { .. } => "criteria_not_met",
            ProgressOutcome::MetricsUnavailable { .. } => "metrics_unavailable",
            ProgressOutcome::Disabled => "disabled",
            ProgressOutcome::Superseded => "superseded",
            ProgressOutcome::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RolloutStatus {
    pub flag: FlagKey,
    pub config: FlagConfig,
    pub current_phase: Option<RolloutPhase>,
    pub metrics: Option<FlagMetrics>,
    pub next_check: Option<ScheduledCheck>,
}

/// Walks a flag through the phase table, one phase at a time, gated on the
/// current phase's success criteria.
pub struct RolloutController {
    pub(crate) redis_client: Arc<dyn RedisClient + Send + Sync>,
    pub(crate) store: Arc<FlagConfigStore>,
    pub(crate) metrics_store: Arc<FlagMetricsStore>,
}

impl RolloutController {
    pub fn new(
        redis_client: Arc<dyn RedisClient + Send + Sync>,
        store: Arc<FlagConfigStore>,
        metrics_store: Arc<FlagMetricsStore>,
    ) -> Self {
        Self {
            redis_client,
            store,
            metrics_store,
        }
    }

    /// Turns the flag on at the first phase's percentage with empty allow and
    /// deny lists, and schedules the first progression check.
    #[instrument(skip(self), fields(flag = %flag))]
    pub async fn start_rollout(&self, flag: FlagKey) -> Result<RolloutStatus, FlagError> {
        let phase = first_phase();
        let config = self
            .store
            .update(
                flag,
                FlagConfigUpdate {
                    enabled: Some(true),
                    rollout_percentage: Some(phase.percentage),
                    whitelist_users: Some(Default::default()),
                    blacklist_users: Some(Default::default()),
                    ..Default::default()
                },
            )
            .await?;
        let check = self.schedule_check(flag, phase).await?;

        metrics::counter!(ROLLOUT_STARTED_COUNTER, "flag" => flag.to_string()).increment(1);
        tracing::info!(run_at = %check.run_at, "rollout started");

        Ok(RolloutStatus {
            flag,
            config,
            current_phase: Some(phase.clone()),
            metrics: None,
            next_check: Some(check),
        })
    }

    #[instrument(skip(self), fields(flag = %flag))]
    pub async fn progress(&self, flag: FlagKey) -> Result<ProgressOutcome, FlagError> {
        let outcome = self.progress_inner(flag).await?;
        metrics::counter!(
            ROLLOUT_PROGRESS_COUNTER,
            "flag" => flag.to_string(),
            "outcome" => outcome.label()
        )
        .increment(1);
        tracing::info!(outcome = outcome.label(), "rollout progression checked");
        Ok(outcome)
    }

    async fn progress_inner(&self, flag: FlagKey) -> Result<ProgressOutcome, FlagError> {
        let config = self.store.get_durable(flag).await?;
        if !config.enabled {
            return Ok(ProgressOutcome::Disabled);
        }

        // a hand-edited percentage off the table can't progress
        let current = match phase_for_percentage(config.rollout_percentage) {
            Some(phase) if !is_terminal(phase) => phase,
            _ => return Ok(ProgressOutcome::Complete),
        };

        let metrics = match self.metrics_store.get(flag).await {
            Ok(Some(metrics)) => metrics,
            Ok(None) => {
                return Ok(ProgressOutcome::MetricsUnavailable {
                    phase: current.phase,
                })
            }
            Err(e) => {
                tracing::warn!("can't read rollout metrics: {}", e);
                return Ok(ProgressOutcome::MetricsUnavailable {
                    phase: current.phase,
                });
            }
        };

        let failures = current.success_criteria.failures(&metrics);
        if !failures.is_empty() {
            return Ok(ProgressOutcome::CriteriaNotMet {
                phase: current.phase,
                failures,
            });
        }

        let Some(next) = next_phase(current) else {
            return Ok(ProgressOutcome::Complete);
        };
        let advanced = self
            .store
            .update_if(
                flag,
                FlagConfigUpdate {
                    rollout_percentage: Some(next.percentage),
                    ..Default::default()
                },
                |latest| latest.enabled && latest.rollout_percentage == current.percentage,
            )
            .await?;
        if advanced.is_none() {
            tracing::warn!("flag config changed during progression, not advancing");
            return Ok(ProgressOutcome::Superseded);
        }

        let next_check_at = if is_terminal(next) {
            None
        } else {
            Some(self.schedule_check(flag, next).await?.run_at)
        };

        Ok(ProgressOutcome::Advanced {
            from_phase: current.phase,
            to_phase: next.phase,
            from_percentage: current.percentage,
            to_percentage: next.percentage,
            next_check_at,
        })
    }

    /// Raises the rollout percentage. Returns `false` without writing when
    /// `percentage` isn't above the stored one.
    #[instrument(skip(self), fields(flag = %flag))]
    pub async fn increase_rollout(&self, flag: FlagKey, percentage: u8) -> Result<bool, FlagError> {
        let updated = self
            .store
            .update_if(
                flag,
                FlagConfigUpdate {
                    rollout_percentage: Some(percentage),
                    ..Default::default()
                },
                |current| percentage > current.rollout_percentage,
            )
            .await?;

        if updated.is_none() {
            tracing::debug!(requested = percentage, "rollout not increased");
        }
        Ok(updated.is_some())
    }

    pub async fn status(&self, flag: FlagKey) -> Result<RolloutStatus, FlagError> {
        let config = self.store.get_durable(flag).await?;
        let current_phase = phase_for_percentage(config.rollout_percentage).cloned();

        Ok(RolloutStatus {
            flag,
            config,
            current_phase,
            metrics: self.metrics_store.get(flag).await?,
            next_check: self.scheduled_check(flag).await?,
        })
    }

    pub async fn scheduled_check(&self, flag: FlagKey) -> Result<Option<ScheduledCheck>, FlagError> {
        let raw = match self.redis_client.get(schedule_key(flag)).await {
            Ok(raw) => raw,
            Err(CustomRedisError::NotFound) => return Ok(None),
            Err(e) => return Err(FlagError::from_redis_read(e)),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|_| FlagError::DataParsingError)
    }

    async fn schedule_check(
        &self,
        flag: FlagKey,
        phase: &RolloutPhase,
    ) -> Result<ScheduledCheck, FlagError> {
        let check = ScheduledCheck {
            flag,
            phase: phase.phase,
            run_at: Utc::now() + Duration::hours(i64::from(phase.duration_hours)),
        };
        let serialized = serde_json::to_string(&check)
            .map_err(|e| FlagError::SerializationError(e.to_string()))?;
        self.redis_client.set(schedule_key(flag), serialized).await?;
        Ok(check)
    }
}

fn schedule_key(flag: FlagKey) -> String {
    format!("{ROLLOUT_SCHEDULE_KEY_PREFIX}{flag}")
}
