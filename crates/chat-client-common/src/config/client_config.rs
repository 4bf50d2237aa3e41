//! Client configuration
//!
//! Loads configuration from environment variables or builds it
//! programmatically.

use crate::value_objects::Intents;
use std::env;
use std::time::Duration;

/// Client configuration
///
/// Covers both gateway and REST behavior for one bot token.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bot authentication token
    pub token: String,

    /// Gateway intents requested at identify
    pub intents: Intents,

    /// Shard IDs this process manages (empty = derive from `shard_count`)
    pub shard_ids: Vec<u32>,

    /// Total shard count across the bot (0 = auto-detect from the server)
    pub shard_count: u32,

    /// Maximum concurrent identifies cluster-wide
    pub max_concurrency: u16,

    /// Minimum spacing between identifies sharing a concurrency key
    pub identify_wait: Duration,

    /// Jitter factor for the first heartbeat (random delay in
    /// `[0, interval * factor)`)
    pub heartbeat_jitter: f64,

    /// Timeout for the Hello/Ready handshake on each connection attempt
    pub handshake_timeout: Duration,

    /// Gateway WebSocket URL
    pub gateway_url: String,

    /// REST API base URL
    pub rest_url: String,
}

impl ClientConfig {
    /// Create a configuration with defaults for everything but the token
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            intents: Intents::default(),
            shard_ids: Vec::new(),
            shard_count: 1,
            max_concurrency: default_max_concurrency(),
            identify_wait: default_identify_wait(),
            heartbeat_jitter: default_heartbeat_jitter(),
            handshake_timeout: default_handshake_timeout(),
            gateway_url: default_gateway_url(),
            rest_url: default_rest_url(),
        }
    }

    /// Set the gateway intents
    #[must_use]
    pub fn with_intents(mut self, intents: Intents) -> Self {
        self.intents = intents;
        self
    }

    /// Set the shard IDs this process manages
    #[must_use]
    pub fn with_shard_ids(mut self, shard_ids: Vec<u32>) -> Self {
        self.shard_ids = shard_ids;
        self
    }

    /// Set the total shard count (0 = auto-detect)
    #[must_use]
    pub fn with_shard_count(mut self, shard_count: u32) -> Self {
        self.shard_count = shard_count;
        self
    }

    /// Set the maximum identify concurrency
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: u16) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Set the identify wait interval
    #[must_use]
    pub fn with_identify_wait(mut self, identify_wait: Duration) -> Self {
        self.identify_wait = identify_wait;
        self
    }

    /// Set the heartbeat jitter factor
    #[must_use]
    pub fn with_heartbeat_jitter(mut self, factor: f64) -> Self {
        self.heartbeat_jitter = factor.clamp(0.0, 1.0);
        self
    }

    /// Set the handshake timeout
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the gateway WebSocket URL
    #[must_use]
    pub fn with_gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = url.into();
        self
    }

    /// Set the REST API base URL
    #[must_use]
    pub fn with_rest_url(mut self, url: impl Into<String>) -> Self {
        self.rest_url = url.into();
        self
    }

    /// The shard IDs to open, deriving `0..shard_count` when none were set
    #[must_use]
    pub fn effective_shard_ids(&self) -> Vec<u32> {
        if self.shard_ids.is_empty() {
            (0..self.shard_count.max(1)).collect()
        } else {
            self.shard_ids.clone()
        }
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if required environment variables are missing
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let token = env::var("CHAT_TOKEN").map_err(|_| ConfigError::MissingVar("CHAT_TOKEN"))?;

        let mut config = Self::new(token);

        if let Ok(bits) = env::var("CHAT_INTENTS") {
            let bits: u64 = bits
                .parse()
                .map_err(|_| ConfigError::InvalidValue("CHAT_INTENTS", bits.clone()))?;
            config.intents = Intents::from_bits_truncate(bits);
        }

        if let Ok(ids) = env::var("CHAT_SHARD_IDS") {
            config.shard_ids = ids
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse()
                        .map_err(|_| ConfigError::InvalidValue("CHAT_SHARD_IDS", ids.clone()))
                })
                .collect::<Result<Vec<u32>, _>>()?;
        }

        config.shard_count = parse_var("CHAT_SHARD_COUNT")?.unwrap_or(config.shard_count);
        config.max_concurrency =
            parse_var::<u16>("CHAT_MAX_CONCURRENCY")?.unwrap_or(config.max_concurrency).max(1);

        if let Some(ms) = parse_var::<u64>("CHAT_IDENTIFY_WAIT_MS")? {
            config.identify_wait = Duration::from_millis(ms);
        }

        if let Some(factor) = parse_var::<f64>("CHAT_HEARTBEAT_JITTER")? {
            config.heartbeat_jitter = factor.clamp(0.0, 1.0);
        }

        if let Some(ms) = parse_var::<u64>("CHAT_HANDSHAKE_TIMEOUT_MS")? {
            config.handshake_timeout = Duration::from_millis(ms);
        }

        if let Ok(url) = env::var("CHAT_GATEWAY_URL") {
            config.gateway_url = url;
        }

        if let Ok(url) = env::var("CHAT_REST_URL") {
            config.rest_url = url;
        }

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name, raw.clone())),
        Err(_) => Ok(None),
    }
}

// Default value functions
fn default_max_concurrency() -> u16 {
    1
}

fn default_identify_wait() -> Duration {
    Duration::from_secs(5)
}

fn default_heartbeat_jitter() -> f64 {
    1.0
}

fn default_handshake_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_gateway_url() -> String {
    "wss://gateway.example.chat/?v=1&encoding=json".to_string()
}

fn default_rest_url() -> String {
    "https://api.example.chat/v1".to_string()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
