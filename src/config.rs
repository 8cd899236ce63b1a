use crate::chain::multicall::DEFAULT_MULTICALL_ADDRESS;
use crate::domain::{Address, BlockNumber, ChainId};
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

/// Perpetual ids are `pool_id * PERP_ID_POOL_FACTOR + n`.
pub const PERP_ID_POOL_FACTOR: u32 = 100_000;

/// Widest pool token supported; `10^decimals` must fit comfortably in 256 bits.
pub const MAX_POOL_TOKEN_DECIMALS: u8 = 36;

/// Reject pool tokens whose scale the balance math cannot represent.
pub fn check_pool_token_decimals(decimals: u8) -> Result<u8, ConfigError> {
    if decimals > MAX_POOL_TOKEN_DECIMALS {
        return Err(ConfigError::InvalidValue(
            "poolTokenDecimals".to_string(),
            format!(
                "{} exceeds the supported maximum of {}",
                decimals, MAX_POOL_TOKEN_DECIMALS
            ),
        ));
    }
    Ok(decimals)
}

/// Process configuration from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub config_path: String,
    pub database_path: String,
    pub bind_addr: String,
    pub port: u16,
    pub index_interval_secs: u64,
    pub holder_source: HolderSourceKind,
    pub flipside_api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderSourceKind {
    Ledger,
    Flipside,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
    #[error("Cannot read config file {0}: {1}")]
    Read(String, String),
    #[error("Invalid config file: {0}")]
    Parse(String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let config_path = env_map
            .get("CONFIG_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("CONFIG_PATH".to_string()))?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let bind_addr = env_map
            .get("API_BIND_ADDR")
            .cloned()
            .unwrap_or_else(|| "127.0.0.1".to_string());

        let port = env_map
            .get("API_PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("API_PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let index_interval_secs = env_map
            .get("INDEX_INTERVAL_SECS")
            .map(|s| s.as_str())
            .unwrap_or("120")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "INDEX_INTERVAL_SECS".to_string(),
                    "must be a number of seconds".to_string(),
                )
            })?;

        let holder_source = match env_map
            .get("HOLDER_SOURCE")
            .map(|s| s.as_str())
            .unwrap_or("ledger")
        {
            "ledger" => HolderSourceKind::Ledger,
            "flipside" => HolderSourceKind::Flipside,
            other => {
                return Err(ConfigError::InvalidValue(
                    "HOLDER_SOURCE".to_string(),
                    format!("must be ledger or flipside, got {}", other),
                ))
            }
        };

        let flipside_api_key = env_map
            .get("FLIPSIDE_API_KEY")
            .filter(|k| !k.is_empty())
            .cloned();
        if holder_source == HolderSourceKind::Flipside && flipside_api_key.is_none() {
            return Err(ConfigError::MissingEnv("FLIPSIDE_API_KEY".to_string()));
        }

        Ok(Config {
            config_path,
            database_path,
            bind_addr,
            port,
            index_interval_secs,
            holder_source,
            flipside_api_key,
        })
    }
}

fn default_bucket_capacity() -> u32 {
    5
}

fn default_refill_per_sec() -> u32 {
    5
}

/// Deployment description loaded from the JSON file at `CONFIG_PATH`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    pub chain_id: ChainId,
    pub pool_id: u32,
    pub genesis_block: BlockNumber,
    pub perp_proxy: Address,
    pub pool_token: Address,
    pub share_token: Address,
    pub perpetual_ids: Vec<u32>,
    #[serde(default)]
    pub pool_token_decimals: Option<u8>,
    #[serde(default)]
    pub multicall_address: Option<Address>,
    pub rpc_urls: Vec<String>,
    #[serde(default)]
    pub rpc_urls_filter: Vec<String>,
    #[serde(default = "default_bucket_capacity")]
    pub rpc_bucket_capacity: u32,
    #[serde(default = "default_refill_per_sec")]
    pub rpc_refill_per_sec: u32,
    #[serde(default)]
    pub flipside_transfers_table: Option<String>,
}

impl PoolConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_string(), e.to_string()))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let mut config: PoolConfig =
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        if config.rpc_urls_filter.is_empty() {
            config.rpc_urls_filter = config.rpc_urls.clone();
        }
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_urls.is_empty() {
            return Err(ConfigError::InvalidValue(
                "rpcUrls".to_string(),
                "at least one RPC URL is required".to_string(),
            ));
        }
        if self.perpetual_ids.is_empty() {
            return Err(ConfigError::InvalidValue(
                "perpetualIds".to_string(),
                "at least one perpetual id is required".to_string(),
            ));
        }
        if let Some(id) = self
            .perpetual_ids
            .iter()
            .find(|id| **id / PERP_ID_POOL_FACTOR != self.pool_id)
        {
            return Err(ConfigError::InvalidValue(
                "perpetualIds".to_string(),
                format!("perpetual {} does not belong to pool {}", id, self.pool_id),
            ));
        }
        if let Some(decimals) = self.pool_token_decimals {
            check_pool_token_decimals(decimals)?;
        }
        if self.rpc_bucket_capacity == 0 || self.rpc_refill_per_sec == 0 {
            return Err(ConfigError::InvalidValue(
                "rpcBucketCapacity/rpcRefillPerSec".to_string(),
                "must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn multicall(&self) -> Address {
        self.multicall_address.clone().unwrap_or_else(|| {
            Address::from_str(DEFAULT_MULTICALL_ADDRESS).unwrap_or_else(|_| Address::zero())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("CONFIG_PATH".to_string(), "/etc/shareledger.json".to_string());
        map.insert("DATABASE_PATH".to_string(), "/tmp/test.db".to_string());
        map
    }

    const POOL_JSON: &str = r#"{
        "chainId": 42161,
        "poolId": 2,
        "genesisBlock": 195000000,
        "perpProxy": "0x8f8BccE4c180B699F81499005281fA89440D1e95",
        "poolToken": "0x35751007a407ca6FEFfE80b3cB397736D2cf4dbe",
        "shareToken": "0x0000000000000000000000000000000000000aBc",
        "perpetualIds": [200001, 200002],
        "rpcUrls": ["https://arb1.example.org"]
    }"#;

    #[test]
    fn test_missing_database_path() {
        let mut env_map = setup_required_env();
        env_map.remove("DATABASE_PATH");
        match Config::from_env_map(env_map) {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "DATABASE_PATH"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_missing_config_path() {
        let mut env_map = setup_required_env();
        env_map.remove("CONFIG_PATH");
        match Config::from_env_map(env_map) {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "CONFIG_PATH"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.bind_addr, "127.0.0.1");
        assert_eq!(config.index_interval_secs, 120);
        assert_eq!(config.holder_source, HolderSourceKind::Ledger);
        assert!(config.flipside_api_key.is_none());
    }

    #[test]
    fn test_invalid_port() {
        let mut env_map = setup_required_env();
        env_map.insert("API_PORT".to_string(), "not-a-port".to_string());
        assert!(matches!(
            Config::from_env_map(env_map),
            Err(ConfigError::InvalidValue(_, _))
        ));
    }

    #[test]
    fn test_flipside_requires_key() {
        let mut env_map = setup_required_env();
        env_map.insert("HOLDER_SOURCE".to_string(), "flipside".to_string());
        match Config::from_env_map(env_map.clone()) {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "FLIPSIDE_API_KEY"),
            _ => panic!("Expected MissingEnv error"),
        }
        env_map.insert("FLIPSIDE_API_KEY".to_string(), "secret".to_string());
        let config = Config::from_env_map(env_map).unwrap();
        assert_eq!(config.holder_source, HolderSourceKind::Flipside);
    }

    #[test]
    fn test_invalid_holder_source() {
        let mut env_map = setup_required_env();
        env_map.insert("HOLDER_SOURCE".to_string(), "dune".to_string());
        assert!(matches!(
            Config::from_env_map(env_map),
            Err(ConfigError::InvalidValue(_, _))
        ));
    }

    #[test]
    fn test_pool_config_defaults() {
        let pool = PoolConfig::from_json(POOL_JSON).unwrap();
        assert_eq!(pool.chain_id, 42161);
        assert_eq!(pool.rpc_bucket_capacity, 5);
        assert_eq!(pool.rpc_refill_per_sec, 5);
        assert_eq!(pool.rpc_urls_filter, pool.rpc_urls);
        assert_eq!(
            pool.share_token.as_str(),
            "0x0000000000000000000000000000000000000abc"
        );
        assert_eq!(
            pool.multicall().as_str(),
            "0xca11bde05977b3631167028862be2a173976ca11"
        );
        assert!(pool.pool_token_decimals.is_none());
    }

    #[test]
    fn test_pool_config_rejects_foreign_perpetual() {
        let raw = POOL_JSON.replace("[200001, 200002]", "[200001, 300001]");
        assert!(matches!(
            PoolConfig::from_json(&raw),
            Err(ConfigError::InvalidValue(_, _))
        ));
    }

    #[test]
    fn test_pool_config_rejects_empty_rpc_list() {
        let raw = POOL_JSON.replace(r#"["https://arb1.example.org"]"#, "[]");
        assert!(matches!(
            PoolConfig::from_json(&raw),
            Err(ConfigError::InvalidValue(_, _))
        ));
    }

    #[test]
    fn test_pool_config_rejects_bad_address() {
        let raw = POOL_JSON.replace("0x0000000000000000000000000000000000000aBc", "0x12");
        assert!(matches!(
            PoolConfig::from_json(&raw),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_pool_config_rejects_oversized_decimals() {
        let raw = POOL_JSON.replace(
            r#""chainId": 42161,"#,
            r#""chainId": 42161, "poolTokenDecimals": 78,"#,
        );
        match PoolConfig::from_json(&raw) {
            Err(ConfigError::InvalidValue(field, _)) => assert_eq!(field, "poolTokenDecimals"),
            other => panic!("Expected InvalidValue error, got {:?}", other),
        }
    }

    #[test]
    fn test_pool_token_decimals_bound() {
        assert_eq!(check_pool_token_decimals(18).unwrap(), 18);
        assert_eq!(check_pool_token_decimals(36).unwrap(), 36);
        assert!(matches!(
            check_pool_token_decimals(37),
            Err(ConfigError::InvalidValue(_, _))
        ));
    }
}
