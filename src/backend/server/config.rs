//! Server Configuration
//!
//! Configuration is loaded from an optional TOML file plus environment
//! variable overrides, with defaults that work for local development.
//!
//! # Sources
//!
//! 1. Defaults (see [`ServerConfig::default`])
//! 2. TOML file named by `COSCRIBE_CONFIG` (skipped when unset or unreadable)
//! 3. Environment variables (`BIND_ADDR`, `DATABASE_URL`,
//!    `LONG_POLL_TIMEOUT_SECS`, `FLUSH_INTERVAL_SECS`, `FLUSH_THRESHOLD_SECS`,
//!    `KEEP_RECENT_STEPS`, `EVICT_INTERVAL_SECS`, `EVICT_IDLE_SECS`)
//!
//! # Error Handling
//!
//! Configuration problems are logged but never prevent startup. In
//! particular, a missing or unreachable `DATABASE_URL` downgrades the durable
//! store to an in-memory one and the server keeps running.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::persistence::store::{DurableStore, MemoryStore, SqliteStore};
use crate::backend::persistence::PersistenceConfig;

/// Runtime configuration for the sync server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to
    pub bind_addr: String,
    /// SQLite URL for the durable store; `None` falls back to memory
    pub database_url: Option<String>,
    /// Bound on how long an empty pull is held open
    pub long_poll_timeout_secs: u64,
    /// Flush job cadence
    pub flush_interval_secs: u64,
    /// Quiet period before a document's steps are flushed
    pub flush_threshold_secs: u64,
    /// Steps kept in memory per document after a trim
    pub keep_recent_steps: usize,
    /// Eviction job cadence
    pub evict_interval_secs: u64,
    /// Idle window before a clientless document is evicted
    pub evict_idle_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            database_url: None,
            long_poll_timeout_secs: 25,
            flush_interval_secs: 10,
            flush_threshold_secs: 10,
            keep_recent_steps: 100,
            evict_interval_secs: 300,
            evict_idle_secs: 1800,
        }
    }
}

impl ServerConfig {
    /// Load configuration from the optional TOML file and the environment.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("COSCRIBE_CONFIG") {
            match std::fs::read_to_string(&path) {
                Ok(raw) => match toml::from_str::<ServerConfig>(&raw) {
                    Ok(file_config) => {
                        tracing::info!("[Server] Loaded configuration from {}", path);
                        config = file_config;
                    }
                    Err(error) => {
                        tracing::warn!("[Server] Ignoring invalid config file {}: {}", path, error);
                    }
                },
                Err(error) => {
                    tracing::warn!("[Server] Could not read config file {}: {}", path, error);
                }
            }
        }

        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database_url = Some(url);
        }
        env_u64("LONG_POLL_TIMEOUT_SECS", &mut self.long_poll_timeout_secs);
        env_u64("FLUSH_INTERVAL_SECS", &mut self.flush_interval_secs);
        env_u64("FLUSH_THRESHOLD_SECS", &mut self.flush_threshold_secs);
        if let Some(value) = env_parse::<usize>("KEEP_RECENT_STEPS") {
            self.keep_recent_steps = value;
        }
        env_u64("EVICT_INTERVAL_SECS", &mut self.evict_interval_secs);
        env_u64("EVICT_IDLE_SECS", &mut self.evict_idle_secs);
    }

    pub fn long_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.long_poll_timeout_secs)
    }

    /// The persistence-worker slice of this configuration.
    pub fn persistence(&self) -> PersistenceConfig {
        PersistenceConfig {
            flush_interval: Duration::from_secs(self.flush_interval_secs),
            flush_threshold: Duration::from_secs(self.flush_threshold_secs),
            keep_recent_steps: self.keep_recent_steps,
            evict_interval: Duration::from_secs(self.evict_interval_secs),
            evict_idle_window: Duration::from_secs(self.evict_idle_secs),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("[Server] Ignoring unparseable {}={}", name, raw);
            None
        }
    }
}

fn env_u64(name: &str, slot: &mut u64) {
    if let Some(value) = env_parse::<u64>(name) {
        *slot = value;
    }
}

/// Open the durable store named by the configuration.
///
/// A missing `database_url` or a failed connection downgrades to the
/// in-memory store: durable persistence is then disabled, which is logged
/// loudly, but the server still serves collaboration.
pub async fn load_store(config: &ServerConfig) -> Arc<dyn DurableStore> {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("[Server] DATABASE_URL not set; durable persistence is in-memory only");
        return Arc::new(MemoryStore::new());
    };

    match SqliteStore::connect(url).await {
        Ok(store) => {
            tracing::info!("[Server] Durable store connected at {}", url);
            Arc::new(store)
        }
        Err(error) => {
            tracing::error!(
                "[Server] Failed to open durable store at {}: {}; falling back to memory",
                url,
                error
            );
            Arc::new(MemoryStore::new())
        }
    }
}
