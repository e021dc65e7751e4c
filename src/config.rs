use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::blockchain::{ChainParams, DEFAULT_DIFFICULTY, DEFAULT_MINER_REWARD};

/// Errors raised while reading node settings
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Settings of a running node, read from `PISITI_*` environment variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,

    /// Directory of the sled database
    pub data_dir: PathBuf,

    pub difficulty: usize,
    pub miner_reward: u64,

    /// Threads searching for nonces; 1 mines on the request's worker thread
    pub mining_threads: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            data_dir: PathBuf::from("data/pisiticoin"),
            difficulty: DEFAULT_DIFFICULTY,
            miner_reward: DEFAULT_MINER_REWARD,
            mining_threads: 1,
        }
    }
}

impl NodeConfig {
    /// Loads `.env` if present, then reads the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup, falling back to defaults
    /// for missing keys
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = NodeConfig::default();

        let miner_reward: u64 = parse(&lookup, "PISITI_MINER_REWARD", defaults.miner_reward)?;
        if i64::try_from(miner_reward).is_err() {
            return Err(ConfigError::InvalidValue {
                key: "PISITI_MINER_REWARD",
                value: miner_reward.to_string(),
            });
        }

        Ok(NodeConfig {
            host: lookup("PISITI_HOST").unwrap_or(defaults.host),
            port: parse(&lookup, "PISITI_PORT", defaults.port)?,
            data_dir: lookup("PISITI_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            difficulty: parse(&lookup, "PISITI_DIFFICULTY", defaults.difficulty)?,
            miner_reward,
            mining_threads: parse(&lookup, "PISITI_MINING_THREADS", defaults.mining_threads)?,
        })
    }

    pub fn chain_params(&self) -> ChainParams {
        ChainParams {
            difficulty: self.difficulty,
            miner_reward: self.miner_reward,
            mining_threads: self.mining_threads,
            ..ChainParams::default()
        }
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(default),
    }
}
