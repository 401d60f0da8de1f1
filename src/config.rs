use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{AccountId, ServiceError, ServiceResult};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub listen: SocketAddr,
    #[serde(default = "default_block_time_ms")]
    pub block_time_ms: u64,
    /// Accepted clock skew for signed requests, and how long request signatures are
    /// remembered for replay detection.
    #[serde(default = "default_request_ttl_secs")]
    pub request_ttl_secs: u64,
    #[serde(default)]
    pub genesis: Vec<GenesisAccount>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub account: AccountId,
    pub balance: u64,
}

fn default_block_time_ms() -> u64 {
    5_000
}

fn default_request_ttl_secs() -> u64 {
    300
}

impl ServiceConfig {
    pub fn load(path: &Path) -> ServiceResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> ServiceResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|err| ServiceError::Config(format!("unable to parse config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> ServiceResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let encoded = toml::to_string_pretty(self)
            .map_err(|err| ServiceError::Config(format!("unable to encode config: {err}")))?;
        fs::write(path, encoded)?;
        Ok(())
    }

    pub fn validate(&self) -> ServiceResult<()> {
        if self.block_time_ms == 0 {
            return Err(ServiceError::Config("block_time_ms must be positive".into()));
        }
        if self.request_ttl_secs == 0 {
            return Err(ServiceError::Config("request_ttl_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn block_time(&self) -> Duration {
        Duration::from_millis(self.block_time_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 9944)),
            block_time_ms: default_block_time_ms(),
            request_ttl_secs: default_request_ttl_secs(),
            genesis: Vec::new(),
        }
    }
}
