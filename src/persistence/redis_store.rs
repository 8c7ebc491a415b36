//! Redis-backed state store

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, info};

use super::StateStore;
use crate::error::{Result, SupervisorError};

/// Connection settings for the Redis store
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// `host:port`
    pub addr: String,
    pub password: Option<String>,
    pub db: i64,
    pub connect_timeout: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            addr: "localhost:6379".to_string(),
            password: None,
            db: 0,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisStoreConfig {
    /// Connection URL, `redis://[:password@]host:port/db`
    pub fn url(&self) -> String {
        let auth = match self.password.as_deref() {
            Some(pass) if !pass.is_empty() => format!(":{}@", urlencoding::encode(pass)),
            _ => String::new(),
        };
        format!("redis://{}{}/{}", auth, self.addr, self.db)
    }
}

/// State store on top of a Redis connection manager (reconnects on its own)
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connect and verify the connection with `PING`
    pub async fn connect(config: &RedisStoreConfig) -> Result<Self> {
        let client = redis::Client::open(config.url())?;

        let mut manager = tokio::time::timeout(config.connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                SupervisorError::Store(format!(
                    "timed out connecting to redis at {} after {:?}",
                    config.addr, config.connect_timeout
                ))
            })??;

        let pong: String = redis::cmd("PING").query_async(&mut manager).await?;
        debug!("Redis answered PING with {}", pong);
        info!("Connected to redis at {} (db {})", config.addr, config.db);

        Ok(Self { manager })
    }
}

#[async_trait]
impl StateStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_without_password() {
        let config = RedisStoreConfig::default();
        assert_eq!(config.url(), "redis://localhost:6379/0");
    }

    #[test]
    fn test_url_with_password_is_encoded() {
        let config = RedisStoreConfig {
            addr: "10.0.0.2:6380".to_string(),
            password: Some("p@ss word".to_string()),
            db: 3,
            ..Default::default()
        };
        assert_eq!(config.url(), "redis://:p%40ss%20word@10.0.0.2:6380/3");
    }

    #[test]
    fn test_empty_password_is_ignored() {
        let config = RedisStoreConfig {
            password: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(config.url(), "redis://localhost:6379/0");
    }
}
