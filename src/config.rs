// config.rs - Client configuration
// =========================================================================
//
// Everything tunable about the client lives here: worker pool sizes, socket
// timeouts, CIP routing tick values and the retry backoff table. The whole
// tree can be loaded from JSON; missing fields fall back to defaults.

use crate::error::{EipError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default EtherNet/IP explicit messaging TCP port
pub const DEFAULT_EIP_PORT: u16 = 44818;

/// Top-level configuration for an [`EipClient`](crate::EipClient)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Worker pool sizing
    pub scheduler: SchedulerConfig,
    /// Socket and CIP routing parameters
    pub connection: ConnectionConfig,
    /// Session retry policy for tags
    pub retry: RetryConfig,
    /// Granularity of the facade's wait loop (milliseconds)
    pub poll_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            connection: ConnectionConfig::default(),
            retry: RetryConfig::default(),
            poll_interval_ms: 5,
        }
    }
}

impl ClientConfig {
    /// Parses a configuration from JSON and validates it
    ///
    /// # Examples
    ///
    /// ```rust
    /// use logix_eip::ClientConfig;
    ///
    /// let config = ClientConfig::from_json(r#"{ "retry": { "backoff_ms": [10, 20] } }"#).unwrap();
    /// assert_eq!(config.retry.backoff_ms, vec![10, 20]);
    /// assert_eq!(config.connection.default_port, 44818);
    /// ```
    pub fn from_json(text: &str) -> Result<Self> {
        let config: ClientConfig = serde_json::from_str(text)
            .map_err(|e| EipError::BadParam(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| EipError::BadData(format!("Unable to serialize configuration: {}", e)))
    }

    /// Checks that the configuration describes a usable client
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.nonblocking_workers == 0 {
            return Err(EipError::BadParam(
                "scheduler.nonblocking_workers must be at least 1".to_string(),
            ));
        }
        if self.scheduler.blocking_workers == 0 {
            return Err(EipError::BadParam(
                "scheduler.blocking_workers must be at least 1".to_string(),
            ));
        }
        if self.connection.default_port == 0 {
            return Err(EipError::BadParam(
                "connection.default_port must be non-zero".to_string(),
            ));
        }
        if self.connection.connect_timeout_ms == 0 || self.connection.reply_timeout_ms == 0 {
            return Err(EipError::BadParam(
                "connection timeouts must be non-zero".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(EipError::BadParam(
                "poll_interval_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Sizes of the two worker pools that drive jobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Workers servicing short, never-blocking jobs (tags)
    pub nonblocking_workers: usize,
    /// Workers servicing jobs allowed to block on sockets (sessions)
    pub blocking_workers: usize,
    /// Sleep between scan passes (milliseconds)
    pub idle_sleep_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            nonblocking_workers: 2,
            blocking_workers: 2,
            idle_sleep_ms: 1,
        }
    }
}

impl SchedulerConfig {
    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }
}

/// Socket and CIP routing parameters shared by every session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// TCP port used when the endpoint string names none
    pub default_port: u16,
    /// TCP connect timeout (milliseconds)
    pub connect_timeout_ms: u64,
    /// Time allowed for a reply once a request is sent (milliseconds)
    pub reply_timeout_ms: u64,
    /// Router timeout carried in the CPF header (seconds)
    pub router_timeout_secs: u16,
    /// Unconnected Send priority/tick time byte
    pub secs_per_tick: u8,
    /// Unconnected Send timeout ticks byte
    pub timeout_ticks: u8,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            default_port: DEFAULT_EIP_PORT,
            connect_timeout_ms: 5000,
            reply_timeout_ms: 5000,
            router_timeout_secs: 1,
            secs_per_tick: 0x0A,
            timeout_ticks: 0x05,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

/// Backoff table for re-acquiring a failed session; one retry per entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub backoff_ms: Vec<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_ms: vec![100, 250, 500, 1000, 2000],
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Vec<Duration> {
        self.backoff_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }
}
