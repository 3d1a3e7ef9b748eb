use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::scheduler::SchedulerError;

/// Default billing rate: cost per second per speed tier.
pub const DEFAULT_UNIT_RATE: f64 = 0.005556;

/// Scheduler tuning, passed explicitly at construction.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Max rooms in service at once.
    pub capacity: usize,
    /// Same-tier rotation threshold.
    pub time_slice: Duration,
    pub unit_rate: f64,
    pub tick_interval: Duration,
    /// Bound of the intake channel.
    pub intake_capacity: usize,
    /// How long `submit` waits for room in a full intake channel.
    pub submit_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            capacity: 2,
            time_slice: Duration::from_secs(5),
            unit_rate: DEFAULT_UNIT_RATE,
            tick_interval: Duration::from_secs(1),
            intake_capacity: 1024,
            submit_timeout: Duration::from_secs(5),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.capacity == 0 {
            return Err(SchedulerError::InvalidConfig("capacity must be at least 1"));
        }
        if self.intake_capacity == 0 {
            return Err(SchedulerError::InvalidConfig("intake capacity must be at least 1"));
        }
        if self.tick_interval.is_zero() {
            return Err(SchedulerError::InvalidConfig("tick interval must be non-zero"));
        }
        if !self.unit_rate.is_finite() || self.unit_rate < 0.0 {
            return Err(SchedulerError::InvalidConfig("unit rate must be a non-negative number"));
        }
        Ok(())
    }
}

/// Process-level settings for the daemon, read from `ACSCHED_*` variables.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub metrics_port: Option<u16>,
    /// Stop every tracked room (settling active ones) before the workers halt.
    pub settle_on_shutdown: bool,
    pub scheduler: SchedulerConfig,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        let defaults = SchedulerConfig::default();
        let scheduler = SchedulerConfig {
            capacity: env_or("ACSCHED_CAPACITY", defaults.capacity),
            time_slice: Duration::from_secs(env_or(
                "ACSCHED_TIME_SLICE_SECS",
                defaults.time_slice.as_secs(),
            )),
            unit_rate: env_or("ACSCHED_UNIT_RATE", defaults.unit_rate),
            tick_interval: Duration::from_millis(env_or(
                "ACSCHED_TICK_MS",
                defaults.tick_interval.as_millis() as u64,
            )),
            ..defaults
        };
        Self {
            bind: env_or("ACSCHED_BIND", "0.0.0.0".to_string()),
            port: env_or("ACSCHED_PORT", 7433),
            data_dir: PathBuf::from(env_or("ACSCHED_DATA_DIR", "./data".to_string())),
            max_connections: env_or("ACSCHED_MAX_CONNECTIONS", 256),
            metrics_port: std::env::var("ACSCHED_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
            settle_on_shutdown: env_or("ACSCHED_SETTLE_ON_SHUTDOWN", true),
            scheduler,
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("usage.wal")
    }
}
