//! Node configuration.
//!
//! Loaded from `$TALLY_DATA_DIR/config.toml`; every field has a default,
//! so a missing file or section yields a working local chain.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tally_epoch::genesis::{default_genesis, GenesisState};
use tally_epoch::{RolloverPolicy, TrackerConfig};
use tally_reward::EngineConfig;
use tally_types::{Address, Coin, EpochInfo};

use crate::events::EventFilter;

/// Complete node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub epochs: EpochsConfig,
    #[serde(default)]
    pub rewards: RewardsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Data directory. Empty = `$TALLY_DATA_DIR` or `~/.tally`.
    #[serde(default)]
    pub data_dir: String,
    /// Seconds between blocks of the local block clock.
    #[serde(default = "default_block_time_secs")]
    pub block_time_secs: u64,
    /// Height of the first block.
    #[serde(default = "default_start_height")]
    pub start_height: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochsConfig {
    #[serde(default)]
    pub rollover: RolloverPolicy,
    /// Epochs registered at genesis.
    #[serde(default = "default_epochs")]
    pub genesis: Vec<EpochInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardsConfig {
    /// Blocks after an epoch's end during which its shares can be claimed.
    #[serde(default = "default_claim_period_blocks")]
    pub claim_period_blocks: u64,
    /// Escrow account for program funds.
    #[serde(default = "default_module_account")]
    pub module_account: String,
    /// Run the expiration sweep every N blocks.
    #[serde(default = "default_sweep_interval_blocks")]
    pub sweep_interval_blocks: u64,
    /// Balances credited at genesis.
    #[serde(default)]
    pub accounts: Vec<GenesisAccount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub address: Address,
    pub coin: Coin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace" | "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Which committed events the node logs at debug level.
    #[serde(default)]
    pub events: EventFilter,
}

// Default value functions

fn default_block_time_secs() -> u64 {
    5
}

fn default_start_height() -> u64 {
    1
}

fn default_epochs() -> Vec<EpochInfo> {
    default_genesis().epochs
}

fn default_claim_period_blocks() -> u64 {
    EngineConfig::default().claim_period_blocks
}

fn default_module_account() -> String {
    EngineConfig::default().module_account
}

fn default_sweep_interval_blocks() -> u64 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            block_time_secs: default_block_time_secs(),
            start_height: default_start_height(),
        }
    }
}

impl Default for EpochsConfig {
    fn default() -> Self {
        Self {
            rollover: RolloverPolicy::default(),
            genesis: default_epochs(),
        }
    }
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            claim_period_blocks: default_claim_period_blocks(),
            module_account: default_module_account(),
            sweep_interval_blocks: default_sweep_interval_blocks(),
            accounts: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            events: EventFilter::default(),
        }
    }
}

impl EpochsConfig {
    pub fn tracker(&self) -> TrackerConfig {
        TrackerConfig {
            rollover: self.rollover,
        }
    }

    pub fn genesis_state(&self) -> GenesisState {
        GenesisState::new(self.genesis.clone())
    }
}

impl RewardsConfig {
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            claim_period_blocks: self.claim_period_blocks,
            module_account: self.module_account.clone(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the chain cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chain.block_time_secs == 0 {
            anyhow::bail!("chain.block_time_secs must be positive");
        }
        if self.chain.start_height == 0 {
            anyhow::bail!("chain.start_height must be at least 1");
        }
        if self.rewards.sweep_interval_blocks == 0 {
            anyhow::bail!("rewards.sweep_interval_blocks must be positive");
        }
        self.rewards.engine().module_address()?;
        self.epochs.genesis_state().validate()?;
        for account in &self.rewards.accounts {
            account.coin.validate()?;
        }
        Ok(())
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.chain.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.chain.data_dir)
        }
    }

    /// Default filter directive for `tracing-subscriber`.
    pub fn log_directive(&self) -> String {
        format!("tally={}", self.logging.level)
    }

    fn config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("TALLY_DATA_DIR") {
            return PathBuf::from(dir);
        }
        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".tally"))
            .unwrap_or_else(|_| PathBuf::from("/tmp/tally"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.chain.block_time_secs, 5);
        assert_eq!(config.chain.start_height, 1);
        assert_eq!(config.epochs.rollover, RolloverPolicy::SkipForward);
        assert_eq!(config.epochs.genesis.len(), 3);
        assert_eq!(config.rewards.claim_period_blocks, 518_400);
        assert_eq!(config.rewards.module_account, "tally1rewardmodule");
        assert_eq!(config.log_directive(), "tally=info");
        config.validate().expect("valid");
    }

    #[test]
    fn test_config_serialization() {
        let config = NodeConfig::default();
        let toml_str = toml::to_string(&config).expect("serialize");
        let parsed: NodeConfig = toml::from_str(&toml_str).expect("parse");
        assert_eq!(parsed.epochs.genesis, config.epochs.genesis);
    }

    #[test]
    fn test_partial_config() {
        let parsed: NodeConfig = toml::from_str(
            r#"
            [epochs]
            rollover = "catch_up"

            [[epochs.genesis]]
            identifier = "hour"
            start_height = 0
            duration = 720
            current_epoch = 0
            current_epoch_start_height = 0
            epoch_counting_started = false

            [[rewards.accounts]]
            address = "tally1funder"
            coin = { denom = "nhash", amount = 5000 }
            "#,
        )
        .expect("parse");
        assert_eq!(parsed.epochs.rollover, RolloverPolicy::CatchUp);
        assert_eq!(parsed.epochs.genesis[0].identifier, "hour");
        assert_eq!(parsed.rewards.sweep_interval_blocks, 1);
        assert_eq!(parsed.rewards.accounts[0].coin.amount, 5_000);
        assert!(parsed.logging.events.categories.is_none());
        parsed.validate().expect("valid");
    }

    #[test]
    fn test_event_log_filter() {
        let parsed: NodeConfig = toml::from_str(
            r#"
            [logging.events]
            categories = ["reward"]
            "#,
        )
        .expect("parse");
        assert_eq!(parsed.logging.level, "info");
        assert_eq!(
            parsed.logging.events.categories,
            Some(vec!["reward".to_string()])
        );
        assert!(parsed.logging.events.epoch_ids.is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = NodeConfig::default();
        config.rewards.sweep_interval_blocks = 0;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.epochs.genesis.push(EpochInfo::new("day", 1, 1));
        assert!(config.validate().is_err());
    }
}
