use serde::Serialize;
use strum::{AsRefStr, EnumString};

/// Which rule decided an evaluation. Listed in the order the rules are
/// checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FeatureFlagMatchReason {
    EnvFullRollout,
    EnvRolloutBound,
    FlagDisabled,
    Blacklisted,
    Whitelisted,
    AdminOverride,
    InRolloutBound,
    OutOfRolloutBound,
    /// The stored config couldn't be loaded and the env override decided.
    EnvFallback,
    /// The stored config couldn't be loaded and there was no env override.
    EvaluationError,
}

impl std::fmt::Display for FeatureFlagMatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}
