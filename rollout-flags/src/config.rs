use std::collections::HashMap;
use std::net::SocketAddr;
use std::ops::Deref;
use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;
use once_cell::sync::Lazy;
use tracing::Level;

use crate::flags::flag_matching_utils::calculate_bucket;
use crate::flags::flag_models::FlagKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlexBool(pub bool);

impl FromStr for FlexBool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(FlexBool(true)),
            "false" | "0" | "no" | "off" | "" => Ok(FlexBool(false)),
            _ => Err(format!("Invalid boolean value: {}", s)),
        }
    }
}

impl From<FlexBool> for bool {
    fn from(flex: FlexBool) -> Self {
        flex.0
    }
}

impl Deref for FlexBool {
    type Target = bool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(default = "127.0.0.1:3001")]
    pub address: SocketAddr,

    #[envconfig(default = "redis://localhost:6379/")]
    pub redis_url: String,

    #[envconfig(default = "100")]
    pub redis_timeout_ms: u64,

    // how long an evaluated flag config may be served from the in-process cache
    #[envconfig(from = "CACHE_TTL_SECONDS", default = "300")]
    pub cache_ttl_seconds: u64,

    #[envconfig(default = "1000")]
    pub cache_max_entries: u64,

    #[envconfig(default = "1000")]
    pub max_concurrency: usize,

    #[envconfig(default = "false")]
    pub enable_metrics: FlexBool,

    #[envconfig(from = "DEBUG", default = "false")]
    pub debug: FlexBool,

    pub otel_url: Option<String>,

    #[envconfig(default = "0.001")]
    pub otel_sampling_rate: f64,

    #[envconfig(default = "rollout-flags")]
    pub otel_service_name: String,

    #[envconfig(default = "3")]
    pub otel_export_timeout_secs: u64,

    #[envconfig(default = "info")]
    pub otel_log_level: Level,
}

impl Config {
    pub fn default_test_config() -> Self {
        Self {
            address: SocketAddr::from(([127, 0, 0, 1], 0)),
            redis_url: "redis://localhost:6379/".to_string(),
            redis_timeout_ms: 100,
            cache_ttl_seconds: 300,
            cache_max_entries: 1000,
            max_concurrency: 1000,
            enable_metrics: FlexBool(false),
            debug: FlexBool(false),
            otel_url: None,
            otel_sampling_rate: 0.001,
            otel_service_name: "rollout-flags".to_string(),
            otel_export_timeout_secs: 3,
            otel_log_level: Level::INFO,
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn redis_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_timeout_ms)
    }
}

pub static DEFAULT_TEST_CONFIG: Lazy<Config> = Lazy::new(Config::default_test_config);

/// A deployment-level override for one flag, read from
/// `FEATURE_FLAG_<KEY>` (boolean) and `FEATURE_FLAG_<KEY>_ROLLOUT` (percentage).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnvFlagOverride {
    pub enabled: bool,
    pub rollout_percentage: Option<u8>,
}

impl EnvFlagOverride {
    fn partial_rollout(&self) -> Option<u8> {
        self.rollout_percentage.filter(|p| *p > 0 && *p < 100)
    }

    /// Answers without touching storage: fully rolled out and enabled, or a
    /// partial percentage to bucket against. `None` means storage decides.
    pub fn fast_path(&self, user_id: &str) -> Option<bool> {
        if self.enabled && self.rollout_percentage == Some(100) {
            return Some(true);
        }
        self.partial_rollout()
            .map(|percentage| calculate_bucket(user_id) < percentage)
    }

    /// The answer used when stored config can't be loaded.
    pub fn fallback(&self, user_id: &str) -> bool {
        if let Some(percentage) = self.partial_rollout() {
            return calculate_bucket(user_id) < percentage;
        }
        match self.rollout_percentage {
            Some(0) => false,
            _ => self.enabled,
        }
    }
}

/// Env overrides for every known flag, resolved once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFlagOverrides {
    overrides: HashMap<FlagKey, EnvFlagOverride>,
}

impl EnvFlagOverrides {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut overrides = HashMap::new();
        for flag in FlagKey::all() {
            let prefix = flag.env_var_prefix();
            let enabled_var = lookup(&prefix);
            let rollout_var = lookup(&format!("{prefix}_ROLLOUT"));
            if enabled_var.is_none() && rollout_var.is_none() {
                continue;
            }

            let enabled = match enabled_var.as_deref().map(FlexBool::from_str) {
                Some(Ok(value)) => *value,
                Some(Err(e)) => {
                    tracing::warn!(flag = %flag, "ignoring env flag value: {}", e);
                    false
                }
                None => false,
            };
            let rollout_percentage = rollout_var.and_then(|raw| match raw.trim().parse::<u32>() {
                Ok(value) => Some(u8::try_from(value.min(100)).unwrap_or(100)),
                Err(e) => {
                    tracing::warn!(flag = %flag, value = %raw, "ignoring env rollout percentage: {}", e);
                    None
                }
            });

            overrides.insert(
                flag,
                EnvFlagOverride {
                    enabled,
                    rollout_percentage,
                },
            );
        }
        EnvFlagOverrides { overrides }
    }

    pub fn with_override(mut self, flag: FlagKey, value: EnvFlagOverride) -> Self {
        self.overrides.insert(flag, value);
        self
    }

    pub fn get(&self, flag: FlagKey) -> Option<&EnvFlagOverride> {
        self.overrides.get(&flag)
    }
}
