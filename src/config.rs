//! Manager configuration.
//!
//! Hand-rolled `Default` struct in the same spirit as the rest of this
//! codebase's bootstrap layer: no config-file-parsing crate is pulled in,
//! callers load overrides from the environment in `main.rs`.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address for the manager's own RPC surface.
    pub listen_addr: String,

    /// Directory holding one JSON document per cluster (ClusterStore).
    pub cluster_store_dir: String,

    /// Directory holding the chunk index snapshot (IndexStore).
    pub index_store_dir: String,

    /// How long a capacity reservation stays valid before lazy reaping.
    pub reservation_ttl: Duration,

    /// How long a node is considered the valid master after becoming one.
    pub lead_duration: Duration,

    /// Per-RPC timeout against a data node.
    pub rpc_timeout: Duration,

    /// Per-batch timeout for Move/Balance/Synchronize batches.
    pub batch_timeout: Duration,

    /// Retry count for transient data-node failures inside Register/Move/Balance.
    pub retry_count: u32,

    /// How long a cluster may sit with `Maintain=true` before the watchdog
    /// forces it back to `false` with a loud warning.
    pub stale_maintain_after: Duration,

    /// Acceptable used/size ratio drift before Balance considers a cluster
    /// a donor or acceptor.
    pub balance_epsilon: f64,

    /// Chunk batch size used by Move and Balance.
    pub batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8500".to_string(),
            cluster_store_dir: "./data/clusters".to_string(),
            index_store_dir: "./data/index".to_string(),
            reservation_ttl: Duration::from_secs(15 * 60),
            lead_duration: Duration::from_secs(5 * 60),
            rpc_timeout: Duration::from_secs(30),
            batch_timeout: Duration::from_secs(5 * 60),
            retry_count: 3,
            stale_maintain_after: Duration::from_secs(30 * 60),
            balance_epsilon: 0.05,
            batch_size: 256,
        }
    }
}

impl Config {
    /// Overlay environment-variable overrides onto the defaults, mirroring
    /// the minimal env-driven bootstrap the rest of this tree uses instead
    /// of a config file parser.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("DOSFARM_LISTEN_ADDR") {
            cfg.listen_addr = v;
        }
        if let Ok(v) = std::env::var("DOSFARM_CLUSTER_STORE_DIR") {
            cfg.cluster_store_dir = v;
        }
        if let Ok(v) = std::env::var("DOSFARM_INDEX_STORE_DIR") {
            cfg.index_store_dir = v;
        }
        if let Ok(v) = std::env::var("DOSFARM_RESERVATION_TTL_SECS") {
            if let Ok(secs) = v.parse() {
                cfg.reservation_ttl = Duration::from_secs(secs);
            }
        }
        if let Ok(v) = std::env::var("DOSFARM_RETRY_COUNT") {
            if let Ok(n) = v.parse() {
                cfg.retry_count = n;
            }
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert!(cfg.retry_count > 0);
        assert!(cfg.reservation_ttl.as_secs() > 0);
        assert!(cfg.balance_epsilon > 0.0 && cfg.balance_epsilon < 1.0);
    }
}
