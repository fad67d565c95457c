use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use thiserror::Error;
use tokio::time::timeout;

#[derive(Error, Debug, Clone)]
pub enum CustomRedisError {
    #[error("Not found in redis")]
    NotFound,
    #[error("Timeout error")]
    Timeout,
    #[error(transparent)]
    Redis(#[from] Arc<redis::RedisError>),
}

impl From<redis::RedisError> for CustomRedisError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            CustomRedisError::Timeout
        } else {
            CustomRedisError::Redis(Arc::new(err))
        }
    }
}

impl From<tokio::time::error::Elapsed> for CustomRedisError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        CustomRedisError::Timeout
    }
}

/// A small document-style wrapper over redis: string values keyed by name,
/// atomic counters, and append-only lists for audit trails.
#[async_trait]
pub trait Client {
    async fn get(&self, k: String) -> Result<String, CustomRedisError>;
    async fn set(&self, k: String, v: String) -> Result<(), CustomRedisError>;
    async fn incr(&self, k: String) -> Result<u64, CustomRedisError>;
    async fn rpush(&self, k: String, v: String) -> Result<(), CustomRedisError>;
    async fn lrange(&self, k: String) -> Result<Vec<String>, CustomRedisError>;
}

pub struct RedisClient {
    connection: MultiplexedConnection,
    command_timeout: Duration,
}

impl RedisClient {
    pub async fn with_timeout(
        addr: String,
        command_timeout: Duration,
    ) -> Result<RedisClient, CustomRedisError> {
        let client = redis::Client::open(addr)?;
        let connection = client.get_multiplexed_async_connection().await?;

        Ok(RedisClient {
            connection,
            command_timeout,
        })
    }
}

#[async_trait]
impl Client for RedisClient {
    async fn get(&self, k: String) -> Result<String, CustomRedisError> {
        let mut conn = self.connection.clone();
        let result: Option<String> =
            timeout(self.command_timeout, conn.get::<_, Option<String>>(k)).await??;

        // a missing key comes back as nil, surface it as NotFound
        result.ok_or(CustomRedisError::NotFound)
    }

    async fn set(&self, k: String, v: String) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        timeout(self.command_timeout, conn.set::<_, _, ()>(k, v)).await??;
        Ok(())
    }

    async fn incr(&self, k: String) -> Result<u64, CustomRedisError> {
        let mut conn = self.connection.clone();
        let value: u64 = timeout(self.command_timeout, conn.incr::<_, _, u64>(k, 1)).await??;
        Ok(value)
    }

    async fn rpush(&self, k: String, v: String) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        timeout(self.command_timeout, conn.rpush::<_, _, ()>(k, v)).await??;
        Ok(())
    }

    async fn lrange(&self, k: String) -> Result<Vec<String>, CustomRedisError> {
        let mut conn = self.connection.clone();
        let values: Vec<String> =
            timeout(self.command_timeout, conn.lrange::<_, Vec<String>>(k, 0, -1)).await??;
        Ok(values)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockRedisValue {
    None,
    String(String),
}

#[derive(Debug, Clone)]
pub struct MockRedisCall {
    pub op: String,
    pub key: String,
    pub value: MockRedisValue,
}

/// In-memory stand-in for redis. Keeps real state so multi-step flows
/// (start, progress, rollback) can be exercised, records every call, and lets
/// tests force reads or writes to fail.
#[derive(Clone, Default)]
pub struct MockRedisClient {
    values: Arc<Mutex<HashMap<String, String>>>,
    lists: Arc<Mutex<HashMap<String, Vec<String>>>>,
    read_error: Arc<Mutex<Option<CustomRedisError>>>,
    write_error: Arc<Mutex<Option<CustomRedisError>>>,
    calls: Arc<Mutex<Vec<MockRedisCall>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MockRedisClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a raw value without recording a call.
    pub fn insert_value(&self, key: &str, value: &str) {
        lock(&self.values).insert(key.to_owned(), value.to_owned());
    }

    pub fn with_value(self, key: &str, value: &str) -> Self {
        self.insert_value(key, value);
        self
    }

    /// Every subsequent read (`get`, `lrange`) fails with `err`; `None` heals.
    pub fn fail_reads(&self, err: Option<CustomRedisError>) {
        *lock(&self.read_error) = err;
    }

    /// Every subsequent write (`set`, `incr`, `rpush`) fails with `err`; `None` heals.
    pub fn fail_writes(&self, err: Option<CustomRedisError>) {
        *lock(&self.write_error) = err;
    }

    pub fn get_calls(&self) -> Vec<MockRedisCall> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    pub fn raw_value(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }

    fn record(&self, op: &str, key: &str, value: MockRedisValue) {
        lock(&self.calls).push(MockRedisCall {
            op: op.to_string(),
            key: key.to_string(),
            value,
        });
    }

    fn check_read(&self) -> Result<(), CustomRedisError> {
        match lock(&self.read_error).clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn check_write(&self) -> Result<(), CustomRedisError> {
        match lock(&self.write_error).clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Client for MockRedisClient {
    async fn get(&self, k: String) -> Result<String, CustomRedisError> {
        self.record("get", &k, MockRedisValue::None);
        self.check_read()?;

        lock(&self.values)
            .get(&k)
            .cloned()
            .ok_or(CustomRedisError::NotFound)
    }

    async fn set(&self, k: String, v: String) -> Result<(), CustomRedisError> {
        self.record("set", &k, MockRedisValue::String(v.clone()));
        self.check_write()?;

        lock(&self.values).insert(k, v);
        Ok(())
    }

    async fn incr(&self, k: String) -> Result<u64, CustomRedisError> {
        self.record("incr", &k, MockRedisValue::None);
        self.check_write()?;

        let mut values = lock(&self.values);
        // redis rejects INCR on a non-integer value
        let current = match values.get(&k) {
            Some(raw) => raw.parse::<u64>().map_err(|e| {
                CustomRedisError::Redis(Arc::new(redis::RedisError::from((
                    redis::ErrorKind::TypeError,
                    "value is not an integer",
                    e.to_string(),
                ))))
            })?,
            None => 0,
        };
        let next = current + 1;
        values.insert(k, next.to_string());
        Ok(next)
    }

    async fn rpush(&self, k: String, v: String) -> Result<(), CustomRedisError> {
        self.record("rpush", &k, MockRedisValue::String(v.clone()));
        self.check_write()?;

        lock(&self.lists).entry(k).or_default().push(v);
        Ok(())
    }

    async fn lrange(&self, k: String) -> Result<Vec<String>, CustomRedisError> {
        self.record("lrange", &k, MockRedisValue::None);
        self.check_read()?;

        Ok(lock(&self.lists).get(&k).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_round_trips_values_and_lists() {
        let client = MockRedisClient::new();

        client.set("a".to_string(), "1".to_string()).await.unwrap();
        assert_eq!(client.get("a".to_string()).await.unwrap(), "1");

        client.rpush("l".to_string(), "x".to_string()).await.unwrap();
        client.rpush("l".to_string(), "y".to_string()).await.unwrap();
        assert_eq!(client.lrange("l".to_string()).await.unwrap(), vec!["x", "y"]);

        assert!(matches!(
            client.get("missing".to_string()).await,
            Err(CustomRedisError::NotFound)
        ));

        assert_eq!(client.incr("n".to_string()).await.unwrap(), 1);
        assert_eq!(client.incr("n".to_string()).await.unwrap(), 2);
        assert_eq!(client.get("n".to_string()).await.unwrap(), "2");
        assert!(client.incr("a".to_string()).await.is_ok());
        assert_eq!(client.raw_value("a").as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_mock_injected_failures_only_hit_their_side() {
        let client = MockRedisClient::new().with_value("a", "1");

        client.fail_writes(Some(CustomRedisError::Timeout));
        assert!(client.get("a".to_string()).await.is_ok());
        assert!(matches!(
            client.set("a".to_string(), "2".to_string()).await,
            Err(CustomRedisError::Timeout)
        ));
        assert_eq!(client.raw_value("a").as_deref(), Some("1"));

        client.fail_writes(None);
        client.fail_reads(Some(CustomRedisError::Timeout));
        assert!(client.get("a".to_string()).await.is_err());
        assert!(client.set("a".to_string(), "2".to_string()).await.is_ok());

        let ops: Vec<String> = client.get_calls().into_iter().map(|c| c.op).collect();
        assert_eq!(ops, vec!["get", "set", "get", "set"]);
    }
}
