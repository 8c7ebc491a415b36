//! Persistence Layer for Supervisor State
//!
//! This module provides the key/value store the decision engine uses to keep
//! its debounce state across restarts:
//! - `StateStore` trait with an in-memory implementation (also the degraded mode)
//! - Redis-backed store for production
//! - Key layout for persisted state

pub mod redis_store;
pub mod store;

pub use redis_store::{RedisStore, RedisStoreConfig};
pub use store::{MemoryStore, StateKeys, StateStore};
