//! Chat server configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use chat_sync::ChatService;
use tracing::warn;

/// Backing store for messages and conversations
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKind {
    Sqlite,
    Memory,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StoreKind::Sqlite),
            "memory" => Ok(StoreKind::Memory),
            other => Err(format!("unknown store kind '{}'", other)),
        }
    }
}

/// Configuration for the chat server
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to
    pub bind_addr: SocketAddr,
    /// Directory holding the SQLite database
    pub data_dir: PathBuf,
    pub store: StoreKind,
    /// Seed sample conversations into an empty directory
    pub seed_sample: bool,
    /// Run the simulated counterparty
    pub simulate_inbound: bool,
    pub simulate_interval: Duration,
    /// Chance per tick and joined conversation of a simulated reply
    pub simulate_probability: f64,
    pub max_ws_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            data_dir: PathBuf::from("chat_data"),
            store: StoreKind::Sqlite,
            seed_sample: true,
            simulate_inbound: false,
            simulate_interval: Duration::from_secs(10),
            simulate_probability: 0.3,
            max_ws_connections: 256,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `CHAT_*` environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_or("CHAT_BIND_ADDR", defaults.bind_addr),
            data_dir: std::env::var("CHAT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            store: env_or("CHAT_STORE", defaults.store),
            seed_sample: env_or("CHAT_SEED_SAMPLE", defaults.seed_sample),
            simulate_inbound: env_or("CHAT_SIMULATE_INBOUND", defaults.simulate_inbound),
            simulate_interval: Duration::from_secs(env_or(
                "CHAT_SIMULATE_INTERVAL_SECS",
                defaults.simulate_interval.as_secs(),
            )),
            simulate_probability: env_or("CHAT_SIMULATE_PROBABILITY", defaults.simulate_probability)
                .clamp(0.0, 1.0),
            max_ws_connections: env_or("CHAT_MAX_WS_CONNECTIONS", defaults.max_ws_connections),
        }
    }

    /// Create config with custom data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("chat.sqlite")
    }

    /// Ensure the data directory exists
    pub async fn ensure_dirs(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        Ok(())
    }
}

fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(e) => {
                warn!("Invalid {}={:?} ({}), using {:?}", key, raw, e, default);
                default
            }
        },
        Err(_) => default,
    }
}

/// App state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
    pub config: Arc<ServerConfig>,
    /// Open WebSocket connections
    pub ws_connections: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(chat: Arc<ChatService>, config: ServerConfig) -> Self {
        Self {
            chat,
            config: Arc::new(config),
            ws_connections: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.store, StoreKind::Sqlite);
        assert_eq!(config.simulate_interval, Duration::from_secs(10));
        assert!(!config.simulate_inbound);
    }

    #[test]
    fn test_with_data_dir() {
        let config = ServerConfig::with_data_dir("/tmp/chat-test");
        assert_eq!(config.database_path(), PathBuf::from("/tmp/chat-test/chat.sqlite"));
    }

    #[test]
    fn test_store_kind_parse() {
        assert_eq!("memory".parse::<StoreKind>().unwrap(), StoreKind::Memory);
        assert_eq!("SQLite".parse::<StoreKind>().unwrap(), StoreKind::Sqlite);
        assert!("postgres".parse::<StoreKind>().is_err());
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        std::env::set_var("CHAT_TEST_ENV_OR_PORT", "not-a-number");
        assert_eq!(env_or("CHAT_TEST_ENV_OR_PORT", 42usize), 42);
        std::env::set_var("CHAT_TEST_ENV_OR_PORT", " 7 ");
        assert_eq!(env_or("CHAT_TEST_ENV_OR_PORT", 42usize), 7);
        std::env::remove_var("CHAT_TEST_ENV_OR_PORT");
    }
}
