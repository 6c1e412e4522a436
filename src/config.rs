//! Runtime configuration.
//!
//! Every component receives its configuration explicitly; there is no global state.
//! The node binary builds a [`NodeConfig`] from command line flags.

use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

/// Pause between writes issued by the continuous inserter.
pub const INSERT_INTERVAL: Duration = Duration::from_millis(10);
/// Default HTTP bind address of the admin adapter.
pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8098";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Number of mirror acknowledgements a write waits for. One unless a stricter
    /// quorum is explicitly requested.
    pub required_acks: usize,
    #[serde(with = "millis")]
    pub ack_timeout: Duration,
    #[serde(with = "millis")]
    pub read_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            required_acks: 1,
            ack_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Entries per snapshot chunk sent to a backfilling mirror.
    pub backfill_chunk_size: usize,
    /// Chunks in flight between donor and joiner before the donor waits.
    pub backfill_channel_capacity: usize,
    /// Out-of-order writes a mirror buffers before declaring itself outdated.
    pub max_pending_writes: usize,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            backfill_chunk_size: 64,
            backfill_channel_capacity: 16,
            max_pending_writes: 4096,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub http_addr: SocketAddr,
    pub mirrors: usize,
    pub dispatcher: DispatcherConfig,
    pub mirror: MirrorConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([127, 0, 0, 1], 8098)),
            mirrors: 2,
            dispatcher: DispatcherConfig::default(),
            mirror: MirrorConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Parses `--http <addr:port>`, `--mirrors <n>` and `--required-acks <n>`.
    /// Unknown flags are ignored.
    pub fn from_args(args: &[String]) -> anyhow::Result<Self> {
        let mut config = Self::default();

        let mut i = 1;
        while i < args.len() {
            let value = args.get(i + 1);
            match (args[i].as_str(), value) {
                ("--http", Some(value)) => {
                    config.http_addr = value.parse()?;
                    i += 2;
                }
                ("--mirrors", Some(value)) => {
                    config.mirrors = value.parse()?;
                    i += 2;
                }
                ("--required-acks", Some(value)) => {
                    config.dispatcher.required_acks = value.parse()?;
                    i += 2;
                }
                (flag @ ("--http" | "--mirrors" | "--required-acks"), None) => {
                    anyhow::bail!("{} requires a value", flag);
                }
                _ => {
                    i += 1;
                }
            }
        }

        if config.mirrors == 0 {
            anyhow::bail!("--mirrors must be at least 1");
        }
        if config.dispatcher.required_acks == 0 {
            anyhow::bail!("--required-acks must be at least 1");
        }

        Ok(config)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
