use std::net::SocketAddr;
use std::sync::Arc;

use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use rollout_flags::config::{EnvFlagOverrides, DEFAULT_TEST_CONFIG};
use rollout_flags::redis::MockRedisClient;
use rollout_flags::server::serve_with_client;

#[allow(unused_imports)]
pub use rollout_flags::test_utils::*;

pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<Notify>,
}

#[allow(dead_code)]
impl ServerHandle {
    pub async fn for_client(client: MockRedisClient) -> ServerHandle {
        Self::for_client_with_overrides(client, EnvFlagOverrides::default()).await
    }

    pub async fn for_client_with_overrides(
        client: MockRedisClient,
        env_overrides: EnvFlagOverrides,
    ) -> ServerHandle {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let notify = Arc::new(Notify::new());
        let shutdown = notify.clone();
        let config = DEFAULT_TEST_CONFIG.clone();

        tokio::spawn(async move {
            serve_with_client(
                config,
                Arc::new(client),
                env_overrides,
                listener,
                async move { notify.notified().await },
            )
            .await
        });
        ServerHandle { addr, shutdown }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{:?}{}", self.addr, path)
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        reqwest::Client::new()
            .get(self.url(path))
            .send()
            .await
            .expect("failed to send request")
    }

    pub async fn send_json(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Value,
    ) -> reqwest::Response {
        self.send_raw(method, path, body.to_string()).await
    }

    pub async fn send_raw<T: Into<reqwest::Body>>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: T,
    ) -> reqwest::Response {
        reqwest::Client::new()
            .request(method, self.url(path))
            .body(body)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .expect("failed to send request")
    }

    pub async fn post(&self, path: &str) -> reqwest::Response {
        self.send_raw(reqwest::Method::POST, path, "").await
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.notify_one()
    }
}
