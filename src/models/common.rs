use serde::{Deserialize, Serialize};

pub const DEFAULT_BATCH_SIZE: u64 = 10;
pub const DEFAULT_MAX_CONCURRENT_DEFINITIONS: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub address: String,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "0.0.0.0".to_string(),
            port: 9100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    pub address: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub rpc_url: String,
    pub database_path: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_max_concurrent_definitions")]
    pub max_concurrent_definitions: usize,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

fn default_batch_size() -> u64 {
    DEFAULT_BATCH_SIZE
}

fn default_max_concurrent_definitions() -> usize {
    DEFAULT_MAX_CONCURRENT_DEFINITIONS
}

/// Signing scheme family, selected from the chain id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    Ethereum,
    ZKsync,
}

impl Chain {
    pub fn from_chain_id(chain_id: u64) -> Self {
        match chain_id {
            232 | 320 | 324 | 325 | 388 | 1217 | 1345 | 2741 | 2904 | 9637 | 50104 | 61166
            | 543210 => Self::ZKsync, // Lens | ZKcandy | ZKsync Era | GRVT | OpenZK | SxT | Cronos zkEVM | Abstract | Ripio LaChain | WonderFi | Sophon | Treasure Chain | Zero Network
            _ => Self::Ethereum,
        }
    }
}

/// Chain facts loaded once per run and shared by every definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainContext {
    pub chain: Chain,
    pub chain_id: u64,
    pub head: u64,
}

impl ChainContext {
    pub fn new(chain_id: u64, head: u64) -> Self {
        Self {
            chain: Chain::from_chain_id(chain_id),
            chain_id,
            head,
        }
    }
}
