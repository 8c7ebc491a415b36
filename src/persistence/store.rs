//! State store abstraction

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::Trigger;
use crate::error::Result;

/// Durable key/value storage used by the decision engine.
///
/// Implementations must tolerate concurrent callers; the engine itself only
/// issues one write per key at a time.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Backend name for logging
    fn backend(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// In-process store. Used in tests and as the fallback when Redis is unreachable,
/// in which case debounce state only lives as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub async fn len(&self) -> usize {
        self.values.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.values.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Key layout for persisted supervisor state
#[derive(Debug, Clone)]
pub struct StateKeys {
    prefix: String,
}

impl StateKeys {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches(':').to_string(),
        }
    }

    fn key(&self, suffix: &str) -> String {
        if self.prefix.is_empty() {
            suffix.to_string()
        } else {
            format!("{}:{}", self.prefix, suffix)
        }
    }

    /// Unix timestamp (milliseconds) of the last successful action for a trigger
    pub fn last_fired(&self, trigger: Trigger) -> String {
        self.key(&format!("trigger:{}:last_fired", trigger.as_str()))
    }

    /// Last observed IBD indicator value
    pub fn last_ibd_value(&self) -> String {
        self.key("ibd:last_value")
    }
}

impl Default for StateKeys {
    fn default() -> Self {
        Self::new("bbbsupervisor")
    }
}
