use serde::Deserialize;
use snatcher_core::ConsistencyLevel;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub booking: BookingRules,
    pub provisioning: Option<ProvisioningConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Replicas a write must reach before `WAIT` reports success at ALL.
    #[serde(default)]
    pub replicas: usize,
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_backoff_ms")]
    pub connect_backoff_ms: u64,
    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,
    #[serde(default)]
    pub replication_lag_ms: u64,
}

fn default_redis_url() -> String { "redis://127.0.0.1:6379".into() }
fn default_wait_timeout_ms() -> u64 { 1000 }
fn default_connect_attempts() -> u32 { 15 }
fn default_connect_backoff_ms() -> u64 { 2000 }
fn default_replication_factor() -> usize { 3 }

impl StoreConfig {
    pub fn memory() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: default_redis_url(),
            replicas: 0,
            wait_timeout_ms: default_wait_timeout_ms(),
            connect_attempts: 1,
            connect_backoff_ms: 0,
            replication_factor: default_replication_factor(),
            replication_lag_ms: 0,
        }
    }

    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }

    pub fn replication_lag(&self) -> Duration {
        Duration::from_millis(self.replication_lag_ms)
    }
}

/// Knobs of the booking protocol.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct BookingRules {
    /// Settle time between the claim batch and the verification read.
    #[serde(default = "default_arbitration_window_ms")]
    pub arbitration_window_ms: u64,
    #[serde(default)]
    pub consistency: ConsistencyLevel,
}

fn default_arbitration_window_ms() -> u64 { 200 }

impl BookingRules {
    pub fn arbitration_window(&self) -> Duration {
        Duration::from_millis(self.arbitration_window_ms)
    }
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            arbitration_window_ms: default_arbitration_window_ms(),
            consistency: ConsistencyLevel::Quorum,
        }
    }
}

/// Seats created AVAILABLE at startup when missing.
#[derive(Debug, Deserialize, Clone)]
pub struct ProvisioningConfig {
    pub event_id: String,
    pub section_id: String,
    pub first_seat: i32,
    pub last_seat: i32,
}

impl ProvisioningConfig {
    pub fn seat_numbers(&self) -> std::ops::RangeInclusive<i32> {
        self.first_seat..=self.last_seat
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. SNATCHER__STORE__REDIS_URL
            .add_source(config::Environment::with_prefix("SNATCHER").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
