use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

/// Number of peers a room admits. Signaling is strictly two-party.
pub const ROOM_CAPACITY: i32 = 2;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub rooms: RoomsConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub ice: IceSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Optional directory served for any path no route matches
    #[serde(default)]
    pub static_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// "memory" or "postgres"
    #[serde(default = "default_store_backend")]
    pub backend: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u32,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u32,
    /// Create the rooms table on startup if missing
    #[serde(default = "default_true")]
    pub run_migrations: bool,
    /// Consecutive failures before admissions fail fast
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,
    /// Seconds the breaker stays open before retrying the database
    #[serde(default = "default_breaker_reset_seconds")]
    pub breaker_reset_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomsConfig {
    #[serde(default = "default_id_length")]
    pub id_length: usize,
    /// Upper bound on fresh-id attempts when generated ids collide
    #[serde(default = "default_max_id_attempts")]
    pub max_id_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweeperConfig {
    /// Sweep interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub interval_seconds: u64,
    /// Age in seconds after which an unused room is reclaimed
    #[serde(default = "default_grace_period")]
    pub grace_period_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IceSettings {
    #[serde(default = "default_ice_servers")]
    pub servers: Vec<IceServerConfig>,
}

/// One STUN/TURN entry as consumed by `RTCPeerConnection`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_store_backend() -> String {
    "memory".to_string()
}

fn default_database_url() -> String {
    "postgres://localhost:5432/signaling".to_string()
}

fn default_pool_size() -> u32 {
    5
}

fn default_connect_timeout() -> u32 {
    5
}

fn default_idle_timeout() -> u32 {
    300
}

fn default_true() -> bool {
    true
}

fn default_id_length() -> usize {
    8
}

fn default_max_id_attempts() -> u32 {
    16
}

fn default_breaker_failure_threshold() -> u32 {
    5
}

fn default_breaker_reset_seconds() -> u64 {
    10
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_max_message_bytes() -> usize {
    64 * 1024
}

fn default_sweep_interval() -> u64 {
    900 // 15 minutes
}

fn default_grace_period() -> u64 {
    900 // 15 minutes
}

fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![IceServerConfig {
        urls: vec!["stun:stun.l.google.com:19302".to_string()],
        username: None,
        credential: None,
    }]
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("store.backend", "memory")?
            .set_default("sweeper.interval_seconds", 900)?
            .set_default("sweeper.grace_period_seconds", 900)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // SERVER__PORT, STORE__BACKEND, DATABASE__URL, SESSION__OUTBOUND_QUEUE_CAPACITY, ...
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins"),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the relay cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.breaker_reset_seconds == 0 {
            return Err(ConfigError::Message(
                "database.breaker_reset_seconds must be greater than 0".into(),
            ));
        }
        if self.session.outbound_queue_capacity == 0 {
            return Err(ConfigError::Message(
                "session.outbound_queue_capacity must be greater than 0".into(),
            ));
        }
        if self.rooms.id_length == 0 {
            return Err(ConfigError::Message("rooms.id_length must be greater than 0".into()));
        }
        if self.rooms.max_id_attempts == 0 {
            return Err(ConfigError::Message(
                "rooms.max_id_attempts must be greater than 0".into(),
            ));
        }
        if self.sweeper.interval_seconds == 0 {
            return Err(ConfigError::Message(
                "sweeper.interval_seconds must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            database: DatabaseConfig::default(),
            rooms: RoomsConfig::default(),
            session: SessionConfig::default(),
            sweeper: SweeperConfig::default(),
            ice: IceSettings::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
            static_dir: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            pool_size: default_pool_size(),
            connect_timeout_seconds: default_connect_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
            run_migrations: default_true(),
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_reset_seconds: default_breaker_reset_seconds(),
        }
    }
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            id_length: default_id_length(),
            max_id_attempts: default_max_id_attempts(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: default_outbound_queue_capacity(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_sweep_interval(),
            grace_period_seconds: default_grace_period(),
        }
    }
}

impl Default for IceSettings {
    fn default() -> Self {
        Self {
            servers: default_ice_servers(),
        }
    }
}
