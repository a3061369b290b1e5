use std::time::Duration;

use serde::Deserialize;

use cowatch_core::net::protocol::MAX_MESSAGE_SIZE;
use cowatch_core::room::DEFAULT_ROOM_TTL;

/// Top-level server configuration, loaded from `cowatch.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub log_format: LogFormat,
    pub store: StoreConfig,
    pub limits: LimitsConfig,
    pub lobby: LobbyConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3001".to_string(),
            log_format: LogFormat::default(),
            store: StoreConfig::default(),
            limits: LimitsConfig::default(),
            lobby: LobbyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

impl std::str::FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(ConfigError::Invalid {
                field: "store.backend",
                reason: format!("unknown backend {other:?}"),
            }),
        }
    }
}

/// Where room state lives.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: String,
    pub room_ttl_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            room_ttl_secs: DEFAULT_ROOM_TTL.as_secs(),
        }
    }
}

impl StoreConfig {
    pub fn room_ttl(&self) -> Duration {
        Duration::from_secs(self.room_ttl_secs)
    }
}

/// Infrastructure limits (connection caps, buffer sizes, rate limits).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    /// Maximum concurrent WebSocket connections per IP address.
    pub max_ws_per_ip: usize,
    pub ws_rate_limit_per_sec: f64,
    pub connection_message_buffer: usize,
    pub max_message_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 500,
            max_ws_per_ip: 20,
            ws_rate_limit_per_sec: 60.0,
            connection_message_buffer: 256,
            max_message_bytes: MAX_MESSAGE_SIZE,
        }
    }
}

/// Lobby listing behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LobbyConfig {
    /// Periodic refresh so expired rooms drop out even when nothing happens.
    pub refresh_interval_secs: u64,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 30,
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn must_be_positive(field: &'static str, ok: bool) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: "must be > 0".to_string(),
        })
    }
}

impl ServerConfig {
    /// Check every value; the first bad one is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Invalid {
                field: "listen_addr",
                reason: format!("{:?} is not a valid socket address", self.listen_addr),
            });
        }
        if self.store.backend == StoreBackend::Redis && self.store.redis_url.is_empty() {
            return Err(ConfigError::Invalid {
                field: "store.redis_url",
                reason: "required for the redis backend".to_string(),
            });
        }
        must_be_positive("store.room_ttl_secs", self.store.room_ttl_secs > 0)?;
        must_be_positive(
            "limits.max_ws_connections",
            self.limits.max_ws_connections > 0,
        )?;
        must_be_positive("limits.max_ws_per_ip", self.limits.max_ws_per_ip > 0)?;
        must_be_positive(
            "limits.ws_rate_limit_per_sec",
            self.limits.ws_rate_limit_per_sec > 0.0,
        )?;
        must_be_positive(
            "limits.connection_message_buffer",
            self.limits.connection_message_buffer > 0,
        )?;
        must_be_positive(
            "limits.max_message_bytes",
            self.limits.max_message_bytes > 0,
        )?;
        must_be_positive(
            "lobby.refresh_interval_secs",
            self.lobby.refresh_interval_secs > 0,
        )?;
        must_be_positive("lobby.default_page_size", self.lobby.default_page_size > 0)?;
        if self.lobby.max_page_size < self.lobby.default_page_size {
            return Err(ConfigError::Invalid {
                field: "lobby.max_page_size",
                reason: "must be >= lobby.default_page_size".to_string(),
            });
        }
        Ok(())
    }

    /// Load config from `cowatch.toml` if it exists, then apply env var overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string("cowatch.toml") {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from cowatch.toml");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse cowatch.toml: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No cowatch.toml found, using defaults");
                ServerConfig::default()
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Apply `COWATCH_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("COWATCH_LISTEN_ADDR")
            && !addr.is_empty()
        {
            self.listen_addr = addr;
        }
        if let Some(val) = lookup("COWATCH_STORE_BACKEND") {
            match val.parse::<StoreBackend>() {
                Ok(backend) => self.store.backend = backend,
                Err(e) => tracing::warn!("Ignoring COWATCH_STORE_BACKEND: {e}"),
            }
        }
        if let Some(url) = lookup("COWATCH_REDIS_URL").or_else(|| lookup("REDIS_URL"))
            && !url.is_empty()
        {
            self.store.redis_url = url;
        }
        if let Some(val) = lookup("COWATCH_MAX_WS_CONNECTIONS")
            && let Ok(n) = val.parse::<usize>()
        {
            self.limits.max_ws_connections = n;
        }
        if let Some(val) = lookup("COWATCH_WS_RATE_LIMIT")
            && let Ok(n) = val.parse::<f64>()
        {
            self.limits.ws_rate_limit_per_sec = n;
        }
        if let Some(val) = lookup("COWATCH_LOG_FORMAT") {
            match val.to_ascii_lowercase().as_str() {
                "json" => self.log_format = LogFormat::Json,
                "text" => self.log_format = LogFormat::Text,
                other => tracing::warn!("Ignoring unknown COWATCH_LOG_FORMAT {other:?}"),
            }
        }
    }
}
