//! Node configuration file.
//!
//! Example TOML:
//!
//! ```toml
//! [node]
//! node_id = "0101010101010101010101010101010101010101010101010101010101010101"
//! chain_id = "0202020202020202020202020202020202020202020202020202020202020202"
//!
//! [mempool]
//! time_tolerance_ms = 0
//! missing_request_timeout_ms = 10000
//!
//! [gossip]
//! share_per_tick = 1
//! share_interval_ms = 1000
//!
//! [committee_log]
//! pipelining_limit = 3
//!
//! [logging]
//! filter = "info,anchorchain=debug"
//! ```
//!
//! Every section except `[node]` may be omitted. Durations are milliseconds.

use crate::runner::RunnerConfig;
use anchorchain_cmtlog::CmtLogConfig;
use anchorchain_mempool::{GossipConfig, MempoolConfig};
use anchorchain_types::{ChainId, Hash, HexError, NodeId};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid {field}: {source}")]
    InvalidId {
        field: &'static str,
        #[source]
        source: HexError,
    },
}

/// Top-level node configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Node identity
    pub node: IdentityConfig,

    #[serde(default)]
    pub mempool: MempoolSection,

    #[serde(default)]
    pub gossip: GossipSection,

    /// Channel capacities of the protocol runners
    #[serde(default)]
    pub runtime: RuntimeSection,

    #[serde(default)]
    pub committee_log: CommitteeLogSection,

    #[serde(default)]
    pub logging: LoggingSection,
}

/// Node identity configuration, hex encoded.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    pub node_id: String,
    pub chain_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MempoolSection {
    #[serde(default)]
    pub time_tolerance_ms: u64,

    #[serde(default = "default_timelock_queue_capacity")]
    pub timelock_queue_capacity: usize,

    #[serde(default = "default_processed_check_retries")]
    pub processed_check_retries: u32,

    #[serde(default = "default_proposals_poll_interval_ms")]
    pub proposals_poll_interval_ms: u64,

    #[serde(default = "default_missing_request_timeout_ms")]
    pub missing_request_timeout_ms: u64,

    #[serde(default = "default_true")]
    pub reject_return_amount: bool,
}

impl Default for MempoolSection {
    fn default() -> Self {
        Self {
            time_tolerance_ms: 0,
            timelock_queue_capacity: default_timelock_queue_capacity(),
            processed_check_retries: default_processed_check_retries(),
            proposals_poll_interval_ms: default_proposals_poll_interval_ms(),
            missing_request_timeout_ms: default_missing_request_timeout_ms(),
            reject_return_amount: true,
        }
    }
}

fn default_timelock_queue_capacity() -> usize {
    1024
}

fn default_processed_check_retries() -> u32 {
    5
}

fn default_proposals_poll_interval_ms() -> u64 {
    200
}

fn default_missing_request_timeout_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct GossipSection {
    #[serde(default = "default_share_per_tick")]
    pub share_per_tick: usize,

    #[serde(default = "default_share_interval_ms")]
    pub share_interval_ms: u64,

    #[serde(default = "default_missing_per_tick")]
    pub missing_per_tick: usize,

    #[serde(default = "default_missing_interval_ms")]
    pub missing_interval_ms: u64,
}

impl Default for GossipSection {
    fn default() -> Self {
        Self {
            share_per_tick: default_share_per_tick(),
            share_interval_ms: default_share_interval_ms(),
            missing_per_tick: default_missing_per_tick(),
            missing_interval_ms: default_missing_interval_ms(),
        }
    }
}

fn default_share_per_tick() -> usize {
    1
}

fn default_share_interval_ms() -> u64 {
    1000
}

fn default_missing_per_tick() -> usize {
    2
}

fn default_missing_interval_ms() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeSection {
    #[serde(default = "default_input_capacity")]
    pub input_capacity: usize,

    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,

    #[serde(default = "default_release_capacity")]
    pub release_capacity: usize,

    /// Queue of missing-request announcements from the pool
    #[serde(default = "default_missing_request_capacity")]
    pub missing_request_capacity: usize,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            input_capacity: default_input_capacity(),
            inbound_capacity: default_inbound_capacity(),
            release_capacity: default_release_capacity(),
            missing_request_capacity: default_missing_request_capacity(),
        }
    }
}

fn default_input_capacity() -> usize {
    1024
}

fn default_inbound_capacity() -> usize {
    4096
}

fn default_release_capacity() -> usize {
    256
}

fn default_missing_request_capacity() -> usize {
    1024
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommitteeLogSection {
    /// Unconfirmed outputs allowed ahead of L1; unlimited when absent
    #[serde(default)]
    pub pipelining_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

pub(crate) fn default_log_filter() -> String {
    "info,anchorchain=debug".to_string()
}

impl NodeConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = toml::from_str(contents)?;
        // Surface bad identities at load time rather than at startup.
        config.node_id()?;
        config.chain_id()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn node_id(&self) -> Result<NodeId, ConfigError> {
        Hash::from_hex(&self.node.node_id)
            .map(|h| NodeId(*h.as_bytes()))
            .map_err(|source| ConfigError::InvalidId {
                field: "node_id",
                source,
            })
    }

    pub fn chain_id(&self) -> Result<ChainId, ConfigError> {
        Hash::from_hex(&self.node.chain_id)
            .map(ChainId)
            .map_err(|source| ConfigError::InvalidId {
                field: "chain_id",
                source,
            })
    }

    pub fn mempool_config(&self) -> MempoolConfig {
        let m = &self.mempool;
        MempoolConfig {
            time_tolerance: Duration::from_millis(m.time_tolerance_ms),
            timelock_queue_capacity: m.timelock_queue_capacity,
            processed_check_retries: m.processed_check_retries,
            proposals_poll_interval: Duration::from_millis(m.proposals_poll_interval_ms),
            missing_request_timeout: Duration::from_millis(m.missing_request_timeout_ms),
            reject_return_amount: m.reject_return_amount,
        }
    }

    pub fn gossip_config(&self) -> GossipConfig {
        let g = &self.gossip;
        GossipConfig {
            share_per_tick: g.share_per_tick,
            share_interval: Duration::from_millis(g.share_interval_ms),
            missing_per_tick: g.missing_per_tick,
            missing_interval: Duration::from_millis(g.missing_interval_ms),
        }
    }

    pub fn cmt_log_config(&self) -> CmtLogConfig {
        CmtLogConfig {
            pipelining_limit: self.committee_log.pipelining_limit,
        }
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            input_capacity: self.runtime.input_capacity,
            inbound_capacity: self.runtime.inbound_capacity,
            release_capacity: self.runtime.release_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const IDENTITY: &str = r#"
[node]
node_id = "0101010101010101010101010101010101010101010101010101010101010101"
chain_id = "0202020202020202020202020202020202020202020202020202020202020202"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = NodeConfig::from_toml_str(IDENTITY).unwrap();
        assert_eq!(config.node_id().unwrap(), NodeId([1; 32]));

        let mempool = config.mempool_config();
        let defaults = MempoolConfig::default();
        assert_eq!(mempool.missing_request_timeout, defaults.missing_request_timeout);
        assert_eq!(mempool.processed_check_retries, defaults.processed_check_retries);

        let gossip = config.gossip_config();
        assert_eq!(gossip.share_interval, Duration::from_secs(1));
        assert_eq!(gossip.missing_per_tick, 2);
        assert_eq!(config.cmt_log_config().pipelining_limit, None);
        assert_eq!(config.logging.filter, "info,anchorchain=debug");
    }

    #[test]
    fn test_sections_override_defaults() {
        let toml = format!(
            "{IDENTITY}\n[gossip]\nshare_interval_ms = 250\n\n[committee_log]\npipelining_limit = 3\n\n[runtime]\ninput_capacity = 8\n"
        );
        let config = NodeConfig::from_toml_str(&toml).unwrap();
        assert_eq!(config.gossip_config().share_interval, Duration::from_millis(250));
        assert_eq!(config.gossip_config().share_per_tick, 1);
        assert_eq!(config.cmt_log_config().pipelining_limit, Some(3));
        assert_eq!(config.runner_config().input_capacity, 8);
    }

    #[test]
    fn test_invalid_identity_rejected() {
        let err = NodeConfig::from_toml_str("[node]\nnode_id = \"zz\"\nchain_id = \"00\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidId { field: "node_id", .. }));

        let err = NodeConfig::from_toml_str("[mempool]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(IDENTITY.as_bytes()).unwrap();
        let config = NodeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.chain_id().unwrap(), ChainId(Hash::from_hex(&"02".repeat(32)).unwrap()));

        let missing = NodeConfig::from_file("/nonexistent/anchorchain.toml");
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
