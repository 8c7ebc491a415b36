use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

use super::Trigger;
use crate::persistence::{StateKeys, StateStore};

/// Sentinel for "no IBD measurement seen yet"
pub const IBD_UNKNOWN: f64 = -1.0;

/// Operating regime of bitcoind as reported by the IBD indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Regime {
    Unknown,
    InitialBlockDownload,
    Synced,
}

impl Regime {
    /// Negative values (the stored sentinel) and NaN are unknown, other nonzero
    /// values are IBD, zero is synced. The engine never stores a negative sample.
    pub fn from_value(value: f64) -> Self {
        if value.is_nan() || value < 0.0 {
            Regime::Unknown
        } else if value != 0.0 {
            Regime::InitialBlockDownload
        } else {
            Regime::Synced
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::Unknown => "unknown",
            Regime::InitialBlockDownload => "ibd",
            Regime::Synced => "synced",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Debounce state owned by the decision engine
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorState {
    /// When each trigger last resulted in a successful action (flood mitigation)
    pub last_fired: HashMap<Trigger, DateTime<Utc>>,
    /// Last `bitcoin_ibd` measurement, to detect ibd <-> synced switches
    pub last_ibd_value: f64,
}

impl Default for SupervisorState {
    fn default() -> Self {
        Self {
            last_fired: HashMap::new(),
            last_ibd_value: IBD_UNKNOWN,
        }
    }
}

impl SupervisorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ibd_regime(&self) -> Regime {
        Regime::from_value(self.last_ibd_value)
    }

    /// Load persisted state, skipping keys that are missing, unreadable or malformed.
    pub async fn restore(store: &dyn StateStore, keys: &StateKeys) -> Self {
        let mut state = Self::default();

        for trigger in Trigger::ALL.into_iter().filter(|t| !t.is_regime()) {
            let key = keys.last_fired(trigger);
            match store.get(&key).await {
                Ok(Some(raw)) => match parse_timestamp(&raw) {
                    Some(ts) => {
                        state.last_fired.insert(trigger, ts);
                    }
                    None => warn!(key = %key, value = %raw, "Ignoring malformed last-fired timestamp"),
                },
                Ok(None) => {}
                Err(e) => warn!(key = %key, "Failed to load last-fired timestamp: {}", e),
            }
        }

        let key = keys.last_ibd_value();
        match store.get(&key).await {
            Ok(Some(raw)) => match raw.trim().parse::<f64>() {
                Ok(value) => state.last_ibd_value = value,
                Err(_) => warn!(key = %key, value = %raw, "Ignoring malformed IBD value"),
            },
            Ok(None) => {}
            Err(e) => warn!(key = %key, "Failed to load IBD value: {}", e),
        }

        debug!(
            "Restored supervisor state: {} trigger timestamps, ibd regime {}",
            state.last_fired.len(),
            state.ibd_regime()
        );
        state
    }
}

/// Unix milliseconds, as written by the decision engine
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let millis = raw.trim().parse::<i64>().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;

    #[test]
    fn test_regime_from_value() {
        assert_eq!(Regime::from_value(IBD_UNKNOWN), Regime::Unknown);
        assert_eq!(Regime::from_value(f64::NAN), Regime::Unknown);
        assert_eq!(Regime::from_value(1.0), Regime::InitialBlockDownload);
        assert_eq!(Regime::from_value(0.5), Regime::InitialBlockDownload);
        assert_eq!(Regime::from_value(0.0), Regime::Synced);
    }

    #[test]
    fn test_default_state_is_unknown() {
        let state = SupervisorState::new();
        assert!(state.last_fired.is_empty());
        assert_eq!(state.ibd_regime(), Regime::Unknown);
    }

    #[tokio::test]
    async fn test_restore_from_empty_store() {
        let store = MemoryStore::new();
        let state = SupervisorState::restore(&store, &StateKeys::new("test")).await;
        assert_eq!(state, SupervisorState::default());
    }

    #[tokio::test]
    async fn test_restore_reads_persisted_values() {
        let store = MemoryStore::new();
        let keys = StateKeys::new("test");
        store
            .set(&keys.last_fired(Trigger::ElectrsFullySynced), "1700000000250")
            .await
            .unwrap();
        store
            .set(&keys.last_fired(Trigger::MiddlewareNoBitcoindConnectivity), "garbage")
            .await
            .unwrap();
        store.set(&keys.last_ibd_value(), "1").await.unwrap();

        let state = SupervisorState::restore(&store, &keys).await;

        assert_eq!(state.last_fired.len(), 1);
        assert_eq!(
            state.last_fired[&Trigger::ElectrsFullySynced].timestamp_millis(),
            1_700_000_000_250
        );
        assert_eq!(state.last_ibd_value, 1.0);
        assert_eq!(state.ibd_regime(), Regime::InitialBlockDownload);
    }
}
