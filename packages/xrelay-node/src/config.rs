use alloy::primitives::Address;
use eyre::{eyre, Result, WrapErr};
use std::collections::HashSet;
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::orchestrator::retry::RetryConfig;
use crate::orchestrator::OrchestratorConfig;

/// Main configuration for the relay node
#[derive(Debug, Clone)]
pub struct Config {
    /// Absent means envelopes are kept in memory only
    pub database: Option<DatabaseConfig>,
    pub sources: Vec<SourceChainConfig>,
    pub destination: DestinationConfig,
    pub relay: RelayConfig,
    pub api: ApiConfig,
}

/// Database configuration
#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .finish()
    }
}

/// One source chain to watch, loaded from `SOURCE_CHAIN_{i}_*`
#[derive(Debug, Clone)]
pub struct SourceChainConfig {
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: String,
    /// Address of the message bus emitting `LogMessagePublished`
    pub bus_address: String,
    /// First block to scan when no cursor has been persisted
    pub start_block: u64,
    pub poll_interval_ms: u64,
    pub max_block_range: u64,
}

impl SourceChainConfig {
    pub fn bus_address(&self) -> Result<Address> {
        Address::from_str(&self.bus_address)
            .map_err(|e| eyre!("Invalid bus address for {}: {}", self.name, e))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Destination messenger configuration
#[derive(Clone)]
pub struct DestinationConfig {
    pub lcd_url: String,
    pub chain_id: String,
    pub messenger_address: String,
    pub mnemonic: String,
    pub address_prefix: String,
    pub fee_denom: String,
    /// Fixed gas limit for every relay transaction
    pub gas_limit: u64,
    /// Fixed gas price in `fee_denom` per unit of gas
    pub gas_price: f64,
    pub finality_timeout_ms: u64,
}

/// Custom Debug that redacts mnemonic to prevent accidental log leakage.
impl fmt::Debug for DestinationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationConfig")
            .field("lcd_url", &self.lcd_url)
            .field("chain_id", &self.chain_id)
            .field("messenger_address", &self.messenger_address)
            .field("mnemonic", &"<redacted>")
            .field("address_prefix", &self.address_prefix)
            .field("fee_denom", &self.fee_denom)
            .field("gas_limit", &self.gas_limit)
            .field("gas_price", &self.gas_price)
            .field("finality_timeout_ms", &self.finality_timeout_ms)
            .finish()
    }
}

impl DestinationConfig {
    /// Fee paid per relay transaction, rounded up
    pub fn fee_amount(&self) -> u128 {
        (self.gas_limit as f64 * self.gas_price).ceil() as u128
    }

    pub fn finality_timeout(&self) -> Duration {
        Duration::from_millis(self.finality_timeout_ms)
    }
}

/// Relay pipeline tuning
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// How long a lane stays paused after its retries are exhausted
    pub lane_pause_secs: u64,
    pub max_in_flight: usize,
    pub tick_interval_ms: u64,
    pub queue_capacity: usize,
    pub token_cache_ttl_secs: u64,
    pub token_cache_negative_ttl_secs: u64,
    /// Alarm threshold for envelopes stuck waiting on confirmations
    pub confirmation_timeout_secs: u64,
}

impl RelayConfig {
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            retry: self.retry(),
            lane_pause: Duration::from_secs(self.lane_pause_secs),
            max_in_flight: self.max_in_flight,
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            confirmation_timeout: Duration::from_secs(self.confirmation_timeout_secs),
            attempt_log_capacity: default_attempt_log_capacity(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
}

/// Default functions
fn default_poll_interval() -> u64 {
    1000
}

fn default_max_block_range() -> u64 {
    1000
}

fn default_address_prefix() -> String {
    "terra".to_string()
}

fn default_fee_denom() -> String {
    "uluna".to_string()
}

fn default_gas_limit() -> u64 {
    500_000
}

fn default_gas_price() -> f64 {
    28.325
}

fn default_finality_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    5
}

fn default_lane_pause_secs() -> u64 {
    300
}

fn default_max_in_flight() -> usize {
    16
}

fn default_tick_interval_ms() -> u64 {
    500
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_token_cache_ttl_secs() -> u64 {
    300
}

fn default_token_cache_negative_ttl_secs() -> u64 {
    15
}

fn default_confirmation_timeout_secs() -> u64 {
    1800
}

fn default_attempt_log_capacity() -> usize {
    256
}

fn default_api_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9090))
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup (the process environment in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let database = vars.get("DATABASE_URL").map(|url| DatabaseConfig { url });

        let count: usize = vars.required_parse("SOURCE_CHAINS_COUNT")?;
        let mut sources = Vec::with_capacity(count);
        for i in 1..=count {
            let prefix = format!("SOURCE_CHAIN_{}", i);
            let key = |suffix: &str| format!("{}_{}", prefix, suffix);

            sources.push(SourceChainConfig {
                name: vars
                    .get(&key("NAME"))
                    .unwrap_or_else(|| format!("chain_{}", i)),
                chain_id: vars.required_parse(&key("CHAIN_ID"))?,
                rpc_url: vars.required(&key("RPC_URL"))?,
                bus_address: vars.required(&key("BUS_ADDRESS"))?,
                start_block: vars.parse_or(&key("START_BLOCK"), 0)?,
                poll_interval_ms: vars.parse_or(&key("POLL_INTERVAL_MS"), default_poll_interval())?,
                max_block_range: vars
                    .parse_or(&key("MAX_BLOCK_RANGE"), default_max_block_range())?,
            });
        }

        let destination = DestinationConfig {
            lcd_url: vars.required("DEST_LCD_URL")?,
            chain_id: vars.required("DEST_CHAIN_ID")?,
            messenger_address: vars.required("DEST_MESSENGER_ADDRESS")?,
            mnemonic: vars.required("DEST_MNEMONIC")?,
            address_prefix: vars
                .get("DEST_ADDRESS_PREFIX")
                .unwrap_or_else(default_address_prefix),
            fee_denom: vars.get("DEST_FEE_DENOM").unwrap_or_else(default_fee_denom),
            gas_limit: vars.parse_or("DEST_GAS_LIMIT", default_gas_limit())?,
            gas_price: vars.parse_or("DEST_GAS_PRICE", default_gas_price())?,
            finality_timeout_ms: vars
                .parse_or("DEST_FINALITY_TIMEOUT_MS", default_finality_timeout_ms())?,
        };

        let retry_defaults = RetryConfig::default();
        let relay = RelayConfig {
            max_retries: vars.parse_or("RELAY_MAX_RETRIES", default_max_retries())?,
            initial_backoff_ms: vars.parse_or(
                "RELAY_INITIAL_BACKOFF_MS",
                retry_defaults.initial_backoff.as_millis() as u64,
            )?,
            max_backoff_ms: vars.parse_or(
                "RELAY_MAX_BACKOFF_MS",
                retry_defaults.max_backoff.as_millis() as u64,
            )?,
            backoff_multiplier: vars
                .parse_or("RELAY_BACKOFF_MULTIPLIER", retry_defaults.backoff_multiplier)?,
            lane_pause_secs: vars.parse_or("RELAY_LANE_PAUSE_SECS", default_lane_pause_secs())?,
            max_in_flight: vars.parse_or("RELAY_MAX_IN_FLIGHT", default_max_in_flight())?,
            tick_interval_ms: vars.parse_or("RELAY_TICK_INTERVAL_MS", default_tick_interval_ms())?,
            queue_capacity: vars.parse_or("RELAY_QUEUE_CAPACITY", default_queue_capacity())?,
            token_cache_ttl_secs: vars
                .parse_or("TOKEN_CACHE_TTL_SECS", default_token_cache_ttl_secs())?,
            token_cache_negative_ttl_secs: vars.parse_or(
                "TOKEN_CACHE_NEGATIVE_TTL_SECS",
                default_token_cache_negative_ttl_secs(),
            )?,
            confirmation_timeout_secs: vars
                .parse_or("CONFIRMATION_TIMEOUT_SECS", default_confirmation_timeout_secs())?,
        };

        let api = ApiConfig {
            bind_addr: vars.parse_or("API_BIND_ADDR", default_api_bind_addr())?,
        };

        let config = Config {
            database,
            sources,
            destination,
            relay,
            api,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(database) = &self.database {
            if database.url.is_empty() {
                return Err(eyre!("database.url cannot be empty"));
            }
        }

        if self.sources.is_empty() {
            return Err(eyre!("At least one source chain must be configured"));
        }

        // Ledger keys are scoped by chain id, so one bus per chain
        let mut seen_ids = HashSet::new();
        for source in &self.sources {
            if !seen_ids.insert(source.chain_id) {
                return Err(eyre!("Duplicate chain ID: {}", source.chain_id));
            }
            if source.rpc_url.is_empty() {
                return Err(eyre!("RPC URL for {} cannot be empty", source.name));
            }
            if source.bus_address.len() != 42 || !source.bus_address.starts_with("0x") {
                return Err(eyre!(
                    "Invalid bus address for chain {}: {}",
                    source.name,
                    source.bus_address
                ));
            }
            source.bus_address()?;
            if source.max_block_range == 0 {
                return Err(eyre!("max_block_range for {} must be positive", source.name));
            }
        }

        if self.destination.lcd_url.is_empty() {
            return Err(eyre!("destination.lcd_url cannot be empty"));
        }
        if self.destination.chain_id.is_empty() {
            return Err(eyre!("destination.chain_id cannot be empty"));
        }
        if self.destination.messenger_address.is_empty() {
            return Err(eyre!("destination.messenger_address cannot be empty"));
        }

        let mnemonic_words: Vec<&str> = self.destination.mnemonic.split_whitespace().collect();
        if mnemonic_words.len() < 12 {
            return Err(eyre!("destination.mnemonic must have at least 12 words"));
        }

        if self.destination.gas_limit == 0 {
            return Err(eyre!("destination.gas_limit must be positive"));
        }
        if !self.destination.gas_price.is_finite() || self.destination.gas_price < 0.0 {
            return Err(eyre!("destination.gas_price must be a non-negative number"));
        }

        if self.relay.backoff_multiplier < 1.0 {
            return Err(eyre!("relay.backoff_multiplier must be at least 1.0"));
        }
        if self.relay.max_in_flight == 0 {
            return Err(eyre!("relay.max_in_flight must be positive"));
        }
        if self.relay.queue_capacity == 0 {
            return Err(eyre!("relay.queue_capacity must be positive"));
        }
        if self.relay.tick_interval_ms == 0 {
            return Err(eyre!("relay.tick_interval_ms must be positive"));
        }

        Ok(())
    }
}

/// Typed access over a key lookup
struct Vars<'a, F>(&'a F);

impl<'a, F> Vars<'a, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.get(key)
            .ok_or_else(|| eyre!("{} environment variable is required", key))
    }

    fn required_parse<T>(&self, key: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let raw = self.required(key)?;
        raw.trim()
            .parse()
            .map_err(|e| eyre!("{} is invalid ({}): {}", key, raw, e))
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| eyre!("{} is invalid ({}): {}", key, raw, e)),
            None => Ok(default),
        }
    }
}
