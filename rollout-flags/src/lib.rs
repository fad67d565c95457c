pub mod api;
pub mod config;
pub mod flags;
pub mod metrics_consts;
pub mod metrics_utils;
pub mod redis;
pub mod rollout;
pub mod router;
pub mod server;

// Not behind #[cfg(test)]: the integration tests under tests/ use these too.
pub mod test_utils;
