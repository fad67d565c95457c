// Flag evaluation counters
pub const FLAG_EVALUATION_COUNTER: &str = "rollout_flags_evaluation_total";
pub const FLAG_EVALUATION_ERROR_COUNTER: &str = "rollout_flags_evaluation_error_total";

// Config store
pub const FLAG_CONFIG_CACHE_HIT_COUNTER: &str = "rollout_flags_config_cache_hit_total";
pub const FLAG_CONFIG_CACHE_MISS_COUNTER: &str = "rollout_flags_config_cache_miss_total";
pub const FLAG_CONFIG_READ_ERRORS_COUNTER: &str = "rollout_flags_config_read_errors_total";
pub const FLAG_CONFIG_SEEDED_COUNTER: &str = "rollout_flags_config_seeded_total";

// Rollout controller
pub const ROLLOUT_STARTED_COUNTER: &str = "rollout_flags_rollout_started_total";
pub const ROLLOUT_PROGRESS_COUNTER: &str = "rollout_flags_rollout_progress_total";
pub const ROLLBACK_COUNTER: &str = "rollout_flags_rollback_total";
