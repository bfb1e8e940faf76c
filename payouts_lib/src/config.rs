// Copyright (C) 2024-2026 P2Poolv2 Developers (see AUTHORS)
//
// This file is part of P2Poolv2
//
// P2Poolv2 is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// P2Poolv2 is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// P2Poolv2. If not, see <https://www.gnu.org/licenses/>.

use coindrpc::CoinRpcConfig;
use payouts_accounting::PaymentMode;
use serde::Deserialize;
use std::error::Error;
use std::fmt;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationError(pub String);

impl Error for ConfigurationError {}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Configuration error: {}", self.0)
    }
}

#[derive(Deserialize, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
}

impl RedisConfig {
    pub fn connection_url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}/", password, self.host, self.port),
            None => format!("redis://{}:{}/", self.host, self.port),
        }
    }
}

/// Custom Debug to redact passwords
impl fmt::Debug for RedisConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RedisConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RocksdbConfig {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum LedgerConfig {
    Redis(RedisConfig),
    Rocksdb(RocksdbConfig),
}

impl LedgerConfig {
    /// Identifies the backing store, pools with equal locations share it.
    pub fn location(&self) -> String {
        match self {
            LedgerConfig::Redis(redis) => format!("redis://{}:{}", redis.host, redis.port),
            LedgerConfig::Rocksdb(rocks) => format!("rocksdb://{}", rocks.path),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CoinConfig {
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub algorithm: Option<String>,
    /// Target seconds between blocks
    #[serde(default)]
    pub block_time: Option<u64>,
    /// Reserve held back from pplnt immature estimates, in coins
    #[serde(default = "default_txfee")]
    pub txfee: f64,
    /// Coinbase rewards land on a transparent address and must be shielded before spending
    #[serde(default)]
    pub require_shielding: bool,
    /// Use getinfo instead of getnetworkinfo for network stats
    #[serde(default)]
    pub get_info: bool,
}

fn default_txfee() -> f64 {
    0.0004
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentProcessingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Confirmations required for wallet outputs spent by payouts
    #[serde(default = "default_min_conf")]
    pub min_conf: u32,
    /// Seconds between payment cycles
    #[serde(default = "default_payment_interval")]
    pub payment_interval: u64,
    #[serde(default = "default_max_blocks_per_payment")]
    pub max_blocks_per_payment: usize,
    #[serde(default)]
    pub payment_mode: PaymentMode,
    /// Fraction of the longest round time a worker needs for full pplnt credit
    #[serde(default = "default_pplnt")]
    pub pplnt: f64,
    #[serde(default)]
    pub solo_mining: bool,
    /// Total solo fee percent, including the part taken in the coinbase
    #[serde(default = "default_solo_fee")]
    pub solo_fee: f64,
    /// Minimum coins per address before a pool worker is paid
    pub minimum_payment: f64,
    /// Minutes between shielding operations
    #[serde(default = "default_wallet_interval")]
    pub wallet_interval: u64,
    #[serde(default = "default_max_unshield_amount")]
    pub max_unshield_amount: f64,
    /// Seconds between pending block confirmation refreshes
    #[serde(default = "default_confirmations_interval")]
    pub confirmations_interval: u64,
    /// Seconds between network stat refreshes
    #[serde(default = "default_stats_interval")]
    pub stats_interval: u64,
    /// Where ledger batches that failed to commit are written
    #[serde(default = "default_recovery_dir")]
    pub recovery_dir: String,
}

fn default_true() -> bool {
    true
}

fn default_min_conf() -> u32 {
    10
}

fn default_payment_interval() -> u64 {
    120
}

fn default_max_blocks_per_payment() -> usize {
    3
}

fn default_pplnt() -> f64 {
    0.51
}

fn default_solo_fee() -> f64 {
    2.0
}

fn default_wallet_interval() -> u64 {
    1
}

fn default_max_unshield_amount() -> f64 {
    100.0
}

fn default_confirmations_interval() -> u64 {
    60
}

fn default_stats_interval() -> u64 {
    58
}

fn default_recovery_dir() -> String {
    "./recovery".to_string()
}

impl PaymentProcessingConfig {
    pub fn effective_min_conf(&self) -> u32 {
        self.min_conf.max(1)
    }

    pub fn effective_payment_interval(&self) -> Duration {
        Duration::from_secs(self.payment_interval.max(30))
    }

    pub fn effective_max_blocks_per_payment(&self) -> usize {
        self.max_blocks_per_payment.max(1)
    }

    /// Log the settings that are allowed but risky.
    pub fn warn_risky_settings(&self, coin: &str) {
        if self.effective_min_conf() < 3 {
            warn!(
                "{}: min_conf of {} is low, payouts may spend outputs that get reorganised",
                coin,
                self.effective_min_conf()
            );
        }
        if self.payment_interval < 120 {
            warn!(
                "{}: payment_interval of {}s is short, using {}s",
                coin,
                self.payment_interval,
                self.effective_payment_interval().as_secs()
            );
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PoolConfig {
    /// Pool wallet address that receives coinbase rewards
    pub address: String,
    #[serde(default)]
    pub t_address: Option<String>,
    #[serde(default)]
    pub z_address: Option<String>,
    /// Daemon is Bitcoin Core 0.17 or later and checks addresses with getaddressinfo
    #[serde(default)]
    pub btc_over_17: bool,
    pub coin: CoinConfig,
    pub daemon: CoinRpcConfig,
    pub ledger: LedgerConfig,
    pub payment_processing: PaymentProcessingConfig,
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let processing = &self.payment_processing;
        let coin = &self.coin.name;
        if !(0.0..=100.0).contains(&processing.solo_fee) {
            return Err(ConfigurationError(format!(
                "{coin}: solo_fee {} must be between 0 and 100",
                processing.solo_fee
            )));
        }
        if !(processing.pplnt > 0.0 && processing.pplnt <= 1.0) {
            return Err(ConfigurationError(format!(
                "{coin}: pplnt {} must be above 0 and at most 1",
                processing.pplnt
            )));
        }
        if processing.minimum_payment < 0.0 {
            return Err(ConfigurationError(format!(
                "{coin}: minimum_payment must not be negative"
            )));
        }
        if self.coin.txfee < 0.0 {
            return Err(ConfigurationError(format!("{coin}: txfee must not be negative")));
        }
        if self.coin.require_shielding && (self.t_address.is_none() || self.z_address.is_none()) {
            return Err(ConfigurationError(format!(
                "{coin}: require_shielding needs both t_address and z_address"
            )));
        }
        if self.address.trim().is_empty() {
            return Err(ConfigurationError(format!("{coin}: pool address is empty")));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct LoggingConfig {
    /// Log to file if specified
    pub file: Option<String>,
    /// Log level (defaults to "info")
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log to console, defaults to true
    pub console: Option<bool>,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub pools: Vec<PoolConfig>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("PAYOUTS").separator("__"))
            .build()?
            .try_deserialize()
    }

    pub fn pool(&self, coin: &str) -> Option<&PoolConfig> {
        self.pools.iter().find(|pool| pool.coin.name == coin)
    }

    pub fn with_log_level(mut self, level: String) -> Self {
        self.logging.level = level;
        self
    }

    pub fn with_log_file(mut self, file: Option<String>) -> Self {
        self.logging.file = file;
        self
    }
}
