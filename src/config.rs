//! Connection settings
//!
//! `ConnectConfig` is owned by the presentation side and re-read at every
//! connect; `EngineConfig` holds the engine's timing knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::{DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY};
use crate::query::DEFAULT_RESPONSE_TIMEOUT;

/// The voice client always listens locally
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// ClientQuery default port
pub const DEFAULT_PORT: u16 = 25639;

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "VOICE_ROSTER_API_KEY";

/// Environment variable overriding the port
pub const PORT_ENV: &str = "VOICE_ROSTER_PORT";

/// Where and how to connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectConfig {
    pub host: String,
    pub port: u16,
    pub api_key: String,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            api_key: String::new(),
        }
    }
}

impl ConnectConfig {
    /// Build from `[api_key] [port]` arguments, then environment, then defaults
    pub fn from_sources<I>(args: I, env: impl Fn(&str) -> Option<String>) -> Result<Self, String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        let api_key = args
            .next()
            .or_else(|| env(API_KEY_ENV))
            .unwrap_or_default();

        let port = match args.next().or_else(|| env(PORT_ENV)) {
            Some(raw) => raw
                .parse()
                .map_err(|_| format!("invalid port '{}'", raw))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            host: DEFAULT_HOST.to_string(),
            port,
            api_key,
        })
    }
}

/// Engine timing knobs
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub connect_timeout: Duration,
    /// Quiet period that ends the greeting banner
    pub banner_wait: Duration,
    pub response_timeout: Duration,
    /// Wait per notification read while streaming
    pub poll_interval: Duration,
    /// Consecutive empty polls before the connection counts as stale
    pub max_empty_reads: u32,
    /// Consecutive handler faults before the connection counts as stale
    pub max_handler_faults: u32,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    /// Base delay between `clientinfo` retries during name resolution
    pub name_retry_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(8),
            banner_wait: Duration::from_millis(500),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            poll_interval: Duration::from_secs(1),
            max_empty_reads: 30,
            max_handler_faults: 10,
            backoff_initial: DEFAULT_INITIAL_DELAY,
            backoff_max: DEFAULT_MAX_DELAY,
            name_retry_delay: Duration::from_millis(100),
        }
    }
}
