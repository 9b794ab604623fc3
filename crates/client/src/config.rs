//! Client configuration.
//!
//! Every tuning constant of the realtime client is runtime configuration.
//! Defaults match the values the kefu console has always used; each option
//! can be overridden from `KEFU_*` environment variables:
//!
//! ```bash
//! KEFU_WS_URL=wss://kefu.example.com/ws
//! KEFU_USER_ID=agent-17
//! KEFU_USER_TYPE=agent
//! KEFU_RECONNECT_INTERVAL_MS=1000
//! KEFU_MAX_RECONNECT_ATTEMPTS=5
//! KEFU_BACKOFF=linear            # or "exponential"
//! KEFU_HEARTBEAT_INTERVAL_MS=30000
//! KEFU_BATCH_INTERVAL_MS=16
//! KEFU_ENABLE_BATCHING=true
//! ```

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_WS_URL: &str = "ws://localhost:8000/ws";
const DEFAULT_USER_TYPE: &str = "agent";

/// Upper bound for every millisecond setting (one day).
pub const MAX_DURATION_MS: u64 = 24 * 60 * 60 * 1_000;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{key} must be greater than zero")]
    Zero { key: &'static str },

    #[error("{key} must not exceed {max} ms")]
    TooLarge { key: &'static str, max: u64 },

    #[error("{0}")]
    Invalid(String),

    #[error("Invalid WebSocket URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// How the reconnect delay grows with the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `min(base * attempt, max)`
    #[default]
    Linear,
    /// `min(base * 2^(attempt - 1), max)`
    Exponential,
}

impl FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(BackoffStrategy::Linear),
            "exponential" | "exp" => Ok(BackoffStrategy::Exponential),
            other => Err(format!("unknown backoff strategy `{other}`")),
        }
    }
}

/// Tuning for the realtime client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base backoff unit in milliseconds
    pub reconnect_interval_ms: u64,
    /// Cap on any single reconnect delay
    pub max_reconnect_delay_ms: u64,
    /// Give-up threshold
    pub max_reconnect_attempts: u32,
    pub backoff: BackoffStrategy,
    /// Jitter factor (0.0-1.0); 0 keeps delays deterministic
    pub reconnect_jitter: f64,
    /// Keep-alive cadence
    pub heartbeat_interval_ms: u64,
    /// Treat the connection as lost when nothing arrives for this long.
    /// `None` keeps the heartbeat one-way.
    pub heartbeat_timeout_ms: Option<u64>,
    /// UI-update coalescing window (debounced)
    pub batch_interval_ms: u64,
    /// Upper bound on how long the first buffered message may wait
    pub max_batch_wait_ms: u64,
    /// Early-flush threshold
    pub max_batch_size: usize,
    /// `false` dispatches every inbound message immediately
    pub enable_batching: bool,
    /// How many recent event ids are remembered for duplicate detection
    pub recent_id_capacity: usize,
    /// Frames held while not connected; 0 disables queueing
    pub outbound_queue_capacity: usize,
    pub request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_ms: 1_000,
            max_reconnect_delay_ms: 30_000,
            max_reconnect_attempts: 5,
            backoff: BackoffStrategy::Linear,
            reconnect_jitter: 0.0,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: None,
            batch_interval_ms: 16,
            max_batch_wait_ms: 100,
            max_batch_size: 100,
            enable_batching: true,
            recent_id_capacity: 1_000,
            outbound_queue_capacity: 100,
            request_timeout_ms: 10_000,
        }
    }
}

impl ClientConfig {
    /// Load configuration from `KEFU_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        override_with(&lookup, "KEFU_RECONNECT_INTERVAL_MS", &mut config.reconnect_interval_ms)?;
        override_with(&lookup, "KEFU_MAX_RECONNECT_DELAY_MS", &mut config.max_reconnect_delay_ms)?;
        override_with(&lookup, "KEFU_MAX_RECONNECT_ATTEMPTS", &mut config.max_reconnect_attempts)?;
        override_with(&lookup, "KEFU_BACKOFF", &mut config.backoff)?;
        override_with(&lookup, "KEFU_RECONNECT_JITTER", &mut config.reconnect_jitter)?;
        override_with(&lookup, "KEFU_HEARTBEAT_INTERVAL_MS", &mut config.heartbeat_interval_ms)?;
        if let Some(timeout) = parse_var::<u64, _>(&lookup, "KEFU_HEARTBEAT_TIMEOUT_MS")? {
            config.heartbeat_timeout_ms = (timeout > 0).then_some(timeout);
        }
        override_with(&lookup, "KEFU_BATCH_INTERVAL_MS", &mut config.batch_interval_ms)?;
        override_with(&lookup, "KEFU_MAX_BATCH_WAIT_MS", &mut config.max_batch_wait_ms)?;
        override_with(&lookup, "KEFU_MAX_BATCH_SIZE", &mut config.max_batch_size)?;
        override_with(&lookup, "KEFU_ENABLE_BATCHING", &mut config.enable_batching)?;
        override_with(&lookup, "KEFU_RECENT_ID_CAPACITY", &mut config.recent_id_capacity)?;
        override_with(&lookup, "KEFU_OUTBOUND_QUEUE_CAPACITY", &mut config.outbound_queue_capacity)?;
        override_with(&lookup, "KEFU_REQUEST_TIMEOUT_MS", &mut config.request_timeout_ms)?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or spin the client.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("reconnect_interval_ms", self.reconnect_interval_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("batch_interval_ms", self.batch_interval_ms),
            ("max_batch_wait_ms", self.max_batch_wait_ms),
            ("max_batch_size", self.max_batch_size as u64),
            ("request_timeout_ms", self.request_timeout_ms),
        ];
        for (key, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Zero { key });
            }
        }

        let durations = [
            ("reconnect_interval_ms", Some(self.reconnect_interval_ms)),
            ("max_reconnect_delay_ms", Some(self.max_reconnect_delay_ms)),
            ("heartbeat_interval_ms", Some(self.heartbeat_interval_ms)),
            ("heartbeat_timeout_ms", self.heartbeat_timeout_ms),
            ("batch_interval_ms", Some(self.batch_interval_ms)),
            ("max_batch_wait_ms", Some(self.max_batch_wait_ms)),
            ("request_timeout_ms", Some(self.request_timeout_ms)),
        ];
        for (key, value) in durations {
            if value.is_some_and(|ms| ms > MAX_DURATION_MS) {
                return Err(ConfigError::TooLarge {
                    key,
                    max: MAX_DURATION_MS,
                });
            }
        }

        if self.max_reconnect_delay_ms < self.reconnect_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "max_reconnect_delay_ms ({}) is below reconnect_interval_ms ({})",
                self.max_reconnect_delay_ms, self.reconnect_interval_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.reconnect_jitter) {
            return Err(ConfigError::Invalid(format!(
                "reconnect_jitter must be within 0.0..=1.0, got {}",
                self.reconnect_jitter
            )));
        }
        Ok(())
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Option<Duration> {
        self.heartbeat_timeout_ms.map(Duration::from_millis)
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn max_batch_wait(&self) -> Duration {
        Duration::from_millis(self.max_batch_wait_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<T>()
        .map(Some)
        .map_err(|e| ConfigError::InvalidValue {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        })
}

fn override_with<T, F>(lookup: &F, key: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = parse_var(lookup, key)? {
        *slot = value;
    }
    Ok(())
}

// =============================================================================
// Connection target
// =============================================================================

/// Who the client connects as. Passed in the query string because the
/// WebSocket handshake cannot carry custom headers from a browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    User { user_id: String, user_type: String },
    Token(String),
    Anonymous,
}

/// Target address plus identity of one logical client session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    base_url: Url,
    identity: Identity,
}

impl ConnectionTarget {
    pub fn new(base_url: &str, identity: Identity) -> Result<Self, ConfigError> {
        let parsed = Url::parse(base_url).map_err(|e| ConfigError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidUrl {
                url: base_url.to_string(),
                reason: format!("unsupported scheme `{}`", parsed.scheme()),
            });
        }
        Ok(Self {
            base_url: parsed,
            identity,
        })
    }

    /// Read `KEFU_WS_URL` and the identity variables.
    ///
    /// `KEFU_TOKEN` wins over `KEFU_USER_ID`; with neither set the session is anonymous.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let base_url = non_empty("KEFU_WS_URL").unwrap_or_else(|| DEFAULT_WS_URL.to_string());
        let identity = if let Some(token) = non_empty("KEFU_TOKEN") {
            Identity::Token(token)
        } else if let Some(user_id) = non_empty("KEFU_USER_ID") {
            Identity::User {
                user_id,
                user_type: non_empty("KEFU_USER_TYPE")
                    .unwrap_or_else(|| DEFAULT_USER_TYPE.to_string()),
            }
        } else {
            Identity::Anonymous
        };

        Self::new(&base_url, identity)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Full connection URL with identity encoded as query parameters.
    pub fn url(&self) -> Url {
        let mut url = self.base_url.clone();
        match &self.identity {
            Identity::User { user_id, user_type } => {
                url.query_pairs_mut()
                    .append_pair("user_id", user_id)
                    .append_pair("user_type", user_type);
            }
            Identity::Token(token) => {
                url.query_pairs_mut().append_pair("token", token);
            }
            Identity::Anonymous => {}
        }
        url
    }
}
