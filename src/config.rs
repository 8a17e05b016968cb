//! Runtime configuration
//!
//! Everything is read from `KEEPER_*` environment variables. Values that
//! fail to parse fall back to the default with a warning.

use crate::etcd::{DEFAULT_CLIENT_PORT, DEFAULT_PEER_PORT};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Default path of the etcd binary
pub const DEFAULT_ETCD_BINARY: &str = "/bin/etcd";

/// Default etcd data directory
pub const DEFAULT_DATA_DIR: &str = "data";

/// Default delay between supervision cycles
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Default housekeeping interval
pub const DEFAULT_HOUSEKEEPER_INTERVAL: Duration = Duration::from_secs(30);

/// Default timeout for every etcd and metadata request
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_millis(3100);

/// Link-local address of the instance metadata service
pub const DEFAULT_METADATA_URL: &str = "http://169.254.169.254";

/// Default port for health endpoints (HTTP)
pub const DEFAULT_HEALTH_PORT: u16 = 8080;

/// Default time etcd gets to exit after SIGTERM before it is killed
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeeperConfig {
    pub etcd_binary: PathBuf,
    pub data_dir: PathBuf,
    pub retry_delay: Duration,
    pub housekeeper_interval: Duration,
    pub api_timeout: Duration,
    pub metadata_url: String,
    pub client_port: u16,
    pub peer_port: u16,
    pub health_port: u16,
    pub shutdown_grace: Duration,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            etcd_binary: PathBuf::from(DEFAULT_ETCD_BINARY),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            retry_delay: DEFAULT_RETRY_DELAY,
            housekeeper_interval: DEFAULT_HOUSEKEEPER_INTERVAL,
            api_timeout: DEFAULT_API_TIMEOUT,
            metadata_url: DEFAULT_METADATA_URL.to_string(),
            client_port: DEFAULT_CLIENT_PORT,
            peer_port: DEFAULT_PEER_PORT,
            health_port: DEFAULT_HEALTH_PORT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl KeeperConfig {
    /// Create config from environment variables
    ///
    /// - KEEPER_ETCD_BINARY: path of the etcd binary (default: /bin/etcd)
    /// - KEEPER_DATA_DIR: etcd data directory (default: data)
    /// - KEEPER_RETRY_DELAY_SECS: pause between supervision cycles (default: 30)
    /// - KEEPER_HOUSEKEEPER_INTERVAL_SECS: housekeeping tick (default: 30)
    /// - KEEPER_API_TIMEOUT_MS: per-request timeout (default: 3100)
    /// - KEEPER_METADATA_URL: metadata service base URL (default: http://169.254.169.254)
    /// - KEEPER_CLIENT_PORT / KEEPER_PEER_PORT: etcd ports (default: 2379 / 2380)
    /// - KEEPER_HEALTH_PORT: health server port (default: 8080)
    /// - KEEPER_SHUTDOWN_GRACE_SECS: SIGTERM to SIGKILL grace (default: 10)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            Duration::from_secs(parse_or(&lookup, key, default.as_secs()))
        };

        Self {
            etcd_binary: lookup("KEEPER_ETCD_BINARY")
                .map(PathBuf::from)
                .unwrap_or(defaults.etcd_binary),
            data_dir: lookup("KEEPER_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            retry_delay: non_zero(
                "KEEPER_RETRY_DELAY_SECS",
                secs("KEEPER_RETRY_DELAY_SECS", defaults.retry_delay),
                defaults.retry_delay,
            ),
            housekeeper_interval: non_zero(
                "KEEPER_HOUSEKEEPER_INTERVAL_SECS",
                secs("KEEPER_HOUSEKEEPER_INTERVAL_SECS", defaults.housekeeper_interval),
                defaults.housekeeper_interval,
            ),
            api_timeout: non_zero(
                "KEEPER_API_TIMEOUT_MS",
                Duration::from_millis(parse_or(
                    &lookup,
                    "KEEPER_API_TIMEOUT_MS",
                    defaults.api_timeout.as_millis() as u64,
                )),
                defaults.api_timeout,
            ),
            metadata_url: lookup("KEEPER_METADATA_URL").unwrap_or(defaults.metadata_url),
            client_port: parse_or(&lookup, "KEEPER_CLIENT_PORT", defaults.client_port),
            peer_port: parse_or(&lookup, "KEEPER_PEER_PORT", defaults.peer_port),
            health_port: parse_or(&lookup, "KEEPER_HEALTH_PORT", defaults.health_port),
            shutdown_grace: secs("KEEPER_SHUTDOWN_GRACE_SECS", defaults.shutdown_grace),
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key = key, value = %raw, "Invalid config value, using default");
                default
            }
        },
    }
}

/// Periods and timeouts must be positive; a zero interval panics tokio's timer
fn non_zero(key: &str, value: Duration, default: Duration) -> Duration {
    if value.is_zero() {
        warn!(key = key, "Config value must be greater than zero, using default");
        return default;
    }
    value
}
