use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::errors::FlagError;
use crate::flags::flag_models::{FlagConfigUpdate, FlagKey};
use crate::metrics_consts::ROLLBACK_COUNTER;
use crate::rollout::controller::RolloutController;

pub const ROLLOUT_AUDIT_KEY_PREFIX: &str = "rollout_flags:audit:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub flag: FlagKey,
    pub reason: String,
    pub admin_user_id: String,
    pub timestamp: DateTime<Utc>,
}

impl RolloutController {
    /// Emergency kill switch: disables the flag at 0% with no admin override,
    /// appends an audit record and bumps the flag's rollback count. Whitelisted
    /// users are untouched, but a disabled flag is off for them too.
    #[instrument(skip(self, reason), fields(flag = %flag))]
    pub async fn rollback(
        &self,
        flag: FlagKey,
        reason: &str,
        admin_user_id: &str,
    ) -> Result<AuditRecord, FlagError> {
        self.store
            .update(
                flag,
                FlagConfigUpdate {
                    enabled: Some(false),
                    rollout_percentage: Some(0),
                    admin_override: Some(false),
                    ..Default::default()
                },
            )
            .await?;

        let record = AuditRecord {
            flag,
            reason: reason.to_string(),
            admin_user_id: admin_user_id.to_string(),
            timestamp: Utc::now(),
        };
        let serialized = serde_json::to_string(&record)
            .map_err(|e| FlagError::SerializationError(e.to_string()))?;
        self.redis_client.rpush(audit_key(flag), serialized).await?;

        let rollback_count = self.metrics_store.increment_rollback_count(flag).await?;

        metrics::counter!(ROLLBACK_COUNTER, "flag" => flag.to_string()).increment(1);
        tracing::warn!(admin_user_id, reason, rollback_count, "flag rolled back");

        Ok(record)
    }

    /// Rollback records for `flag`, oldest first.
    pub async fn audit_log(&self, flag: FlagKey) -> Result<Vec<AuditRecord>, FlagError> {
        let raw = self
            .redis_client
            .lrange(audit_key(flag))
            .await
            .map_err(FlagError::from_redis_read)?;

        raw.iter()
            .map(|entry| {
                serde_json::from_str(entry).map_err(|e| {
                    tracing::error!("failed to parse audit record: {}", e);
                    FlagError::DataParsingError
                })
            })
            .collect()
    }
}

fn audit_key(flag: FlagKey) -> String {
    format!("{ROLLOUT_AUDIT_KEY_PREFIX}{flag}")
}
