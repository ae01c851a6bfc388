use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Network-wide parameters every node must agree on: consensus timing and
/// stake thresholds, fee floor, and the mempool/contract-gas admission caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainParams {
    pub network_id: String,
    pub genesis_address: String,
    pub min_stake: u64,
    /// Stake threshold checked specifically for proposer block-signing
    /// eligibility (§4.6 point 3), kept distinct from `min_stake` — the
    /// amount genesis locks as stake — since the two knobs are
    /// independently configurable in the original network config.
    pub min_validator_stake: u64,
    pub genesis_reward: u64,
    pub block_reward: u64,
    pub min_fee: u64,
    pub block_interval_secs: u64,
    pub max_timestamp_drift_secs: i64,
    pub max_tx_per_block: u64,
    pub mem_pool_limit: usize,
    pub max_contract_gas_per_block: u64,
    pub tx_timeout_secs: i64,
    pub wallet_creation_reward: u64,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            network_id: "cchain-default".to_string(),
            genesis_address: "GENESIS".to_string(),
            min_stake: 1_000,
            min_validator_stake: 1_000,
            genesis_reward: 1_000_000,
            block_reward: 50,
            min_fee: 1,
            block_interval_secs: 5,
            max_timestamp_drift_secs: 300,
            max_tx_per_block: 100,
            mem_pool_limit: 5_000,
            max_contract_gas_per_block: 5_000,
            tx_timeout_secs: 600,
            wallet_creation_reward: 100,
        }
    }
}

/// Per-node operational settings: where it keeps state, what it listens on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    pub data_dir: String,
    pub api_addr: String,
    pub log_level: String,
    pub wallet_dir: String,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            api_addr: "0.0.0.0:8080".to_string(),
            log_level: "info".to_string(),
            wallet_dir: "./wallets".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChainConfig {
    pub chain: ChainParams,
    pub node: NodeSettings,
}

impl ChainConfig {
    /// Load from a TOML file, then overlay environment variables prefixed
    /// `CCHAIN__` (e.g. `CCHAIN__NODE__API_ADDR`), matching the teacher's
    /// `config`+`toml`+env-prefix pattern.
    pub fn load(path: &Path) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::from(path).required(false))
            .add_source(config::Environment::with_prefix("CCHAIN").separator("__"));
        let cfg = builder.build()?;
        Ok(cfg.try_deserialize()?)
    }

    pub fn example() -> Self {
        Self::default()
    }
}
