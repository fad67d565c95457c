use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::{Config, EnvFlagOverrides};
use crate::redis::{Client, RedisClient};
use crate::router::{self, State};

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let redis_client =
        match RedisClient::with_timeout(config.redis_url.clone(), config.redis_timeout()).await {
            Ok(client) => Arc::new(client),
            Err(e) => {
                tracing::error!("Failed to create Redis client for {}: {}", config.redis_url, e);
                return;
            }
        };

    // overrides are read once; changing them means a restart
    let env_overrides = EnvFlagOverrides::from_env();

    serve_with_client(config, redis_client, env_overrides, listener, shutdown).await
}

/// Runs the service against an already-built store client.
pub async fn serve_with_client<F>(
    config: Config,
    redis_client: Arc<dyn Client + Send + Sync>,
    env_overrides: EnvFlagOverrides,
    listener: TcpListener,
    shutdown: F,
) where
    F: Future<Output = ()> + Send + 'static,
{
    let state = State::new(redis_client, env_overrides, &config);
    let app = router::router(state, &config);

    match listener.local_addr() {
        Ok(addr) => tracing::info!("listening on {:?}", addr),
        Err(e) => tracing::warn!("listening on unknown address: {}", e),
    }
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!("server error: {}", e);
    }
}
