use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Configuration loading error: {0}")]
    ConfigLoad(#[from] ConfigError),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, ConfigurationError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// General system settings
    pub system: SystemSettings,

    /// Solana JSON-RPC configuration
    pub solana: SolanaConfig,

    /// CoinGecko / GeckoTerminal price API configuration
    pub gecko: GeckoConfig,

    /// Historical price cache bounds
    pub cache: CacheConfig,

    /// Retry behaviour for the transaction-detail stage
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSettings {
    /// Capacity of the bounded snapshot emission channel
    pub snapshot_channel_capacity: usize,

    /// How long an emission may wait on a slow consumer before the
    /// update is dropped (milliseconds)
    pub emission_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolanaConfig {
    /// Solana JSON-RPC endpoint URL
    pub rpc_url: String,

    /// Request timeout in seconds
    pub request_timeout_seconds: u64,

    /// Page size for getSignaturesForAddress pagination
    pub signature_page_size: u32,

    /// Maximum signatures collected per wallet (0 = unlimited)
    pub max_signatures: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeckoConfig {
    /// CoinGecko base URL (native asset spot price)
    pub price_api_url: String,

    /// GeckoTerminal base URL (token prices, pools, OHLCV)
    pub terminal_api_url: String,

    /// Request timeout in seconds
    pub request_timeout_seconds: u64,

    /// OHLCV resolution requested for historical series ("day", "hour", ...)
    pub ohlcv_timeframe: String,

    /// Token addresses per batched spot-price request
    pub price_batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached historical price series
    pub max_entries: usize,

    /// Optional entry TTL in seconds (None = entries live for the process)
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Maximum transient requeues per signature before it is recorded as
    /// permanently failed
    pub queue_max_attempts: u32,

    /// Fixed delay before a transiently failed signature is requeued
    /// (milliseconds)
    pub queue_transient_delay_ms: u64,

    /// Inner retry attempts for a single transaction-detail fetch
    pub fetch_max_attempts: u32,

    /// Inner retry delays per attempt for the detail fetch (milliseconds)
    pub fetch_delays_ms: Vec<u64>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            system: SystemSettings {
                snapshot_channel_capacity: 32,
                emission_timeout_ms: 2000,
            },
            solana: SolanaConfig {
                rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
                request_timeout_seconds: 30,
                signature_page_size: 1000,
                max_signatures: 1000,
            },
            gecko: GeckoConfig {
                price_api_url: "https://api.coingecko.com/api/v3".to_string(),
                terminal_api_url: "https://api.geckoterminal.com/api/v2".to_string(),
                request_timeout_seconds: 30,
                ohlcv_timeframe: "day".to_string(),
                price_batch_size: 30,
            },
            cache: CacheConfig {
                max_entries: 512,
                ttl_seconds: Some(86_400),
            },
            retry: RetrySettings {
                queue_max_attempts: 5,
                queue_transient_delay_ms: 500,
                fetch_max_attempts: 2,
                fetch_delays_ms: vec![300, 600],
            },
        }
    }
}

impl SystemConfig {
    /// Load configuration from config.toml (if present) and environment
    /// variables layered over the defaults.
    pub fn load() -> Result<Self> {
        Self::load_from_path("config.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config_builder = Config::builder()
            .add_source(Config::try_from(&SystemConfig::default())?);

        if config_path.as_ref().exists() {
            info!(
                "Loading configuration from: {}",
                config_path.as_ref().display()
            );
            config_builder = config_builder.add_source(File::from(config_path.as_ref()));
        } else {
            debug!("Config file not found, using defaults and environment variables");
        }

        config_builder = config_builder.add_source(
            Environment::with_prefix("WALLET_PULSE")
                .try_parsing(true)
                .separator("__")
                .list_separator(","),
        );

        let config = config_builder.build()?;
        let system_config: SystemConfig = config.try_deserialize()?;

        system_config.validate()?;

        Ok(system_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.solana.rpc_url.is_empty() {
            return Err(ConfigurationError::InvalidValue(
                "Solana RPC URL is required".to_string(),
            ));
        }

        if self.solana.request_timeout_seconds == 0 || self.gecko.request_timeout_seconds == 0 {
            return Err(ConfigurationError::InvalidValue(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        if self.solana.signature_page_size == 0 {
            return Err(ConfigurationError::InvalidValue(
                "Signature page size must be greater than 0".to_string(),
            ));
        }

        if self.gecko.price_batch_size == 0 {
            return Err(ConfigurationError::InvalidValue(
                "Price batch size must be greater than 0".to_string(),
            ));
        }

        if self.cache.max_entries == 0 {
            return Err(ConfigurationError::InvalidValue(
                "Cache must allow at least one entry".to_string(),
            ));
        }

        if self.system.snapshot_channel_capacity == 0 {
            return Err(ConfigurationError::InvalidValue(
                "Snapshot channel capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
