use std::future::ready;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::api::endpoint;
use crate::config::{Config, EnvFlagOverrides};
use crate::flags::flag_metrics::FlagMetricsStore;
use crate::flags::flag_service::FlagService;
use crate::flags::flag_store::{FlagConfigCache, FlagConfigStore};
use crate::metrics_utils::{setup_metrics_recorder, track_metrics};
use crate::redis::Client as RedisClient;
use crate::rollout::controller::RolloutController;

#[derive(Clone)]
pub struct State {
    pub store: Arc<FlagConfigStore>,
    pub metrics_store: Arc<FlagMetricsStore>,
    pub flag_service: Arc<FlagService>,
    pub controller: Arc<RolloutController>,
}

impl State {
    /// Wires every component around one redis client and one read cache.
    pub fn new(
        redis_client: Arc<dyn RedisClient + Send + Sync>,
        env_overrides: EnvFlagOverrides,
        config: &Config,
    ) -> Self {
        let cache = FlagConfigCache::new(config.cache_max_entries, config.cache_ttl());
        let store = Arc::new(FlagConfigStore::new(redis_client.clone(), cache));
        let metrics_store = Arc::new(FlagMetricsStore::new(redis_client.clone()));
        let flag_service = Arc::new(FlagService::new(store.clone(), env_overrides));
        let controller = Arc::new(RolloutController::new(
            redis_client,
            store.clone(),
            metrics_store.clone(),
        ));

        State {
            store,
            metrics_store,
            flag_service,
            controller,
        }
    }
}

pub fn router(state: State, config: &Config) -> Router {
    let status_router = Router::new()
        .route("/", get(index))
        .route("/_liveness", get(|| ready("ok")));

    let flags_router = Router::new()
        .route("/flags/evaluate", get(endpoint::evaluate_all))
        .route("/flags/:flag", get(endpoint::get_flag).patch(endpoint::update_flag))
        .route("/flags/:flag/evaluate", get(endpoint::evaluate_flag))
        .route(
            "/flags/:flag/metrics",
            get(endpoint::get_metrics).put(endpoint::update_metrics),
        )
        .route("/flags/:flag/rollout", get(endpoint::rollout_status))
        .route("/flags/:flag/rollout/start", post(endpoint::start_rollout))
        .route("/flags/:flag/rollout/progress", post(endpoint::progress_rollout))
        .route("/flags/:flag/rollout/increase", post(endpoint::increase_rollout))
        .route("/flags/:flag/rollback", post(endpoint::rollback))
        .route("/flags/:flag/audit", get(endpoint::audit_log))
        .layer(ConcurrencyLimitLayer::new(config.max_concurrency));

    let router = Router::new()
        .merge(status_router)
        .merge(flags_router)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // Don't install metrics unless asked to
    // Global metrics recorders can play poorly with e.g. tests
    if !*config.enable_metrics {
        return router;
    }
    match setup_metrics_recorder() {
        Ok(recorder_handle) => {
            router.route("/metrics", get(move || ready(recorder_handle.render())))
        }
        Err(e) => {
            tracing::error!("failed to install metrics recorder: {}", e);
            router
        }
    }
}

pub async fn index() -> &'static str {
    "rollout flags"
}
