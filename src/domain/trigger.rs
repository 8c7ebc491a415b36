use std::fmt;
use std::str::FromStr;

/// Why an observation matters.
///
/// The set is closed: every watcher emits one of these and the decision engine
/// matches on all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// electrs finished its full database compaction (index fully synced)
    ElectrsFullySynced,
    /// electrs lost its connection to bitcoind
    ElectrsNoBitcoindConnectivity,
    /// the middleware failed to reach bitcoind over RPC
    MiddlewareNoBitcoindConnectivity,
    /// bitcoind initial-block-download indicator sampled from Prometheus
    PrometheusBitcoindIbd,
}

impl Trigger {
    pub const ALL: [Trigger; 4] = [
        Trigger::ElectrsFullySynced,
        Trigger::ElectrsNoBitcoindConnectivity,
        Trigger::MiddlewareNoBitcoindConnectivity,
        Trigger::PrometheusBitcoindIbd,
    ];

    /// Human readable name, also used in persisted state keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::ElectrsFullySynced => "electrsFullySynced",
            Trigger::ElectrsNoBitcoindConnectivity => "electrsNoBitcoindConnectivity",
            Trigger::MiddlewareNoBitcoindConnectivity => "middlewareNoBitcoindConnectivity",
            Trigger::PrometheusBitcoindIbd => "prometheusBitcoindIBD",
        }
    }

    /// Key used in configuration tables and action names
    pub fn key(&self) -> &'static str {
        match self {
            Trigger::ElectrsFullySynced => "electrs_fully_synced",
            Trigger::ElectrsNoBitcoindConnectivity => "electrs_no_bitcoind_connectivity",
            Trigger::MiddlewareNoBitcoindConnectivity => "middleware_no_bitcoind_connectivity",
            Trigger::PrometheusBitcoindIbd => "prometheus_bitcoind_ibd",
        }
    }

    /// Regime triggers are edge-detected instead of cooled down
    pub fn is_regime(&self) -> bool {
        matches!(self, Trigger::PrometheusBitcoindIbd)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Trigger {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        let raw = raw.trim();
        Trigger::ALL
            .into_iter()
            .find(|t| t.key().eq_ignore_ascii_case(raw) || t.as_str().eq_ignore_ascii_case(raw))
            .ok_or_else(|| format!("unknown trigger '{}'", raw))
    }
}
