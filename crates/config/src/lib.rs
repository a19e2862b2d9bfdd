//! Process-wide configuration data model (spec §6). This crate holds only
//! the data: building one from environment variables, CLI flags, or a config
//! file is a "configuration loader" and explicitly out of scope (spec §1
//! Non-goals) — callers that need one bring their own and deserialize into
//! [`IngestionConfig`] with `serde`, the way the teacher's own
//! `TestNodeConfig` is `serde::Deserialize` independent of its `clap`
//! parsing layer.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exactly one of these selects how ingestion is embedded (spec §6: "Exactly
/// one of `allowedChainID` (plugin mode, mandatory) or `standaloneDataDir`
/// (embedded backend mode)").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentMode {
    /// Running as a host VM plugin; writes join the host's transaction.
    Plugin { allowed_chain_id: u64 },
    /// Running standalone against the direct embedded key-value store.
    Standalone { data_dir: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    // Endpoint and identity.
    pub ingestion_url: String,
    pub chain_id: u64,
    pub chain_name: String,

    // Concurrency tuning.
    pub window_size: usize,
    pub batch_size: usize,
    pub debug_batch_size: usize,
    pub parallelism: usize,
    /// Ceiling on the derived trace batch width (spec §4.5: "`max(1,
    /// parallelism/10)` capped at a configured maximum").
    pub max_trace_batch_size: usize,

    // Transport tuning.
    pub max_retries: u32,
    #[serde(with = "duration_millis")]
    pub retry_delay: Duration,
    #[serde(with = "duration_millis")]
    pub http_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub dial_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub idle_conn_timeout: Duration,
    pub max_idle_conns: usize,
    pub max_conns_per_host: usize,

    // Compactor tuning.
    pub min_blocks_before_compaction: u64,
    #[serde(with = "duration_millis")]
    pub compaction_check_interval: Duration,
    pub batch_width: u64,

    // Exporter-side pacing (external collaborator knobs, carried here only
    // because spec §6 lists them as recognized configuration options).
    #[serde(with = "duration_millis")]
    pub partial_batch_wait: Duration,
    #[serde(with = "duration_millis")]
    pub error_backoff: Duration,

    // Firehose bind address.
    pub server_listen_address: String,

    pub deployment_mode: DeploymentMode,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            ingestion_url: "http://127.0.0.1:8545".to_string(),
            chain_id: 1,
            chain_name: "mainnet".to_string(),
            window_size: 10,
            batch_size: 100,
            debug_batch_size: 10,
            parallelism: 50,
            max_trace_batch_size: 20,
            max_retries: 5,
            retry_delay: Duration::from_secs(1),
            http_timeout: Duration::from_secs(30),
            dial_timeout: Duration::from_secs(10),
            idle_conn_timeout: Duration::from_secs(90),
            max_idle_conns: 100,
            max_conns_per_host: 100,
            min_blocks_before_compaction: 1000,
            compaction_check_interval: Duration::from_secs(3),
            batch_width: 100,
            partial_batch_wait: Duration::from_millis(500),
            error_backoff: Duration::from_secs(1),
            server_listen_address: "0.0.0.0:8080".to_string(),
            deployment_mode: DeploymentMode::Standalone {
                data_dir: "./data".to_string(),
            },
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        (value.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let config = IngestionConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: IngestionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.chain_id, config.chain_id);
        assert_eq!(back.batch_size, config.batch_size);
        assert_eq!(back.compaction_check_interval, config.compaction_check_interval);
    }

    #[test]
    fn deployment_mode_is_an_exclusive_choice() {
        let plugin = DeploymentMode::Plugin {
            allowed_chain_id: 43114,
        };
        let standalone = DeploymentMode::Standalone {
            data_dir: "/tmp/data".to_string(),
        };
        assert_ne!(
            serde_json::to_string(&plugin).unwrap(),
            serde_json::to_string(&standalone).unwrap()
        );
    }
}
