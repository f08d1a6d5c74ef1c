//! Configuration for hivelink.
//!
//! Broker coordinates and credentials are always supplied out of band,
//! either through the environment (initiator side) or a device-local JSON
//! file (responder side). There is no built-in default broker.

use crate::error::{HivelinkError, HivelinkResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable holding the broker host name.
pub const ENV_HOST: &str = "HIVEMQ_HOST";
/// Environment variable holding the broker user name.
pub const ENV_USERNAME: &str = "HIVEMQ_USERNAME";
/// Environment variable holding the broker password.
pub const ENV_PASSWORD: &str = "HIVEMQ_PASSWORD";
/// Environment variable holding the shared topic namespace.
pub const ENV_NAMESPACE: &str = "COURSE_ID";
/// Optional port override.
pub const ENV_PORT: &str = "HIVEMQ_PORT";
/// Optional TLS toggle (`false`/`0` disables).
pub const ENV_TLS: &str = "HIVELINK_TLS";

/// TLS port used by the broker.
pub const DEFAULT_PORT: u16 = 8883;

/// How long a connect may take before it is reported as failed.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bounded capacity of an inbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 5;

/// How long a broker client waits for room in a full inbound queue before
/// dropping the message.
pub const DELIVERY_WAIT: Duration = Duration::from_secs(2);

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_tls() -> bool {
    true
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_client_id() -> String {
    format!("hivelink-{}", uuid::Uuid::new_v4())
}

/// Broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSettings {
    /// Broker host name
    pub host: String,

    /// Broker port
    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    pub password: String,

    /// Shared namespace for command and result topics
    pub namespace: String,

    /// Use TLS for the broker connection
    #[serde(default = "default_tls")]
    pub tls: bool,

    /// MQTT keep-alive interval in seconds
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Client identifier (unique per process)
    #[serde(default = "default_client_id", skip_serializing)]
    pub client_id: String,
}

impl BrokerSettings {
    /// Read settings from the process environment.
    ///
    /// Fails on the first required variable that is unset or empty.
    pub fn from_env() -> HivelinkResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> HivelinkResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| HivelinkError::Config(format!("{} is not set", key)))
        };

        let port = match lookup(ENV_PORT).filter(|v| !v.trim().is_empty()) {
            Some(raw) => raw.trim().parse().map_err(|_| {
                HivelinkError::Config(format!("{} is not a valid port: {}", ENV_PORT, raw))
            })?,
            None => DEFAULT_PORT,
        };

        let tls = lookup(ENV_TLS)
            .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);

        Ok(Self {
            host: required(ENV_HOST)?,
            port,
            username: required(ENV_USERNAME)?,
            password: required(ENV_PASSWORD)?,
            namespace: required(ENV_NAMESPACE)?,
            tls,
            keep_alive_secs: default_keep_alive_secs(),
            client_id: default_client_id(),
        })
    }

    /// Load settings from a device-local JSON file.
    pub fn load_from_file(path: &Path) -> HivelinkResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HivelinkError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let settings: BrokerSettings = serde_json::from_str(&content)
            .map_err(|e| HivelinkError::Config(format!("{}: {}", path.display(), e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject empty required values.
    pub fn validate(&self) -> HivelinkResult<()> {
        for (name, value) in [
            ("host", &self.host),
            ("username", &self.username),
            ("password", &self.password),
            ("namespace", &self.namespace),
        ] {
            if value.trim().is_empty() {
                return Err(HivelinkError::Config(format!("{} must not be empty", name)));
            }
        }
        Ok(())
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

/// Deadlines applied to one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeTimeouts {
    /// Longest silence tolerated between two inbound messages
    pub queue_timeout: Duration,
    /// Total budget for the exchange, matched or not
    pub overall_timeout: Duration,
}

impl Default for ExchangeTimeouts {
    fn default() -> Self {
        Self {
            queue_timeout: Duration::from_secs(30),
            overall_timeout: Duration::from_secs(300),
        }
    }
}

/// Responder behaviour knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponderSettings {
    /// Pause before publishing each reply
    pub reply_delay: Duration,
    /// Interval of the liveness log line
    pub heartbeat_interval: Duration,
}

impl Default for ResponderSettings {
    fn default() -> Self {
        Self {
            reply_delay: Duration::ZERO,
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}
