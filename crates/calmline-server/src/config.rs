//! Server configuration loading from file and environment variables.

use calmline_dialogue::GenerationConfig;
use calmline_notify::NotificationConfig;
use calmline_voice::{ChannelSettings, RecognitionConfig, SynthesisConfig};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Per-call tuning.
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub recognition: RecognitionConfig,

    #[serde(default)]
    pub synthesis: SynthesisConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    /// Staff notification providers and routes.
    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "calmline_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Per-session limits and timeouts.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Audio chunks held while recognition is not ready.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Consecutive recognition failures before giving up.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,

    /// Upper bound on one dialogue turn, synthesis included.
    #[serde(default = "default_turn_timeout_ms")]
    pub turn_timeout_ms: u64,

    /// Sessions without transport activity for this long are torn down.
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,

    /// The welcome is skipped if the call has a turn newer than this.
    #[serde(default = "default_greeting_window_secs")]
    pub greeting_window_secs: u64,

    /// Intake flows untouched for this long are purged.
    #[serde(default = "default_intake_idle_secs")]
    pub intake_idle_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Outbound transport frames buffered per session.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    /// How long one response frame may wait for room in the outbound
    /// buffer before the rest of the response is abandoned.
    #[serde(default = "default_frame_send_timeout_ms")]
    pub frame_send_timeout_ms: u64,

    /// Tenant used when the transport does not name one.
    #[serde(default = "default_tenant")]
    pub default_tenant: String,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "calmline.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_queue_capacity() -> usize {
    calmline_voice::DEFAULT_QUEUE_CAPACITY
}

fn default_max_reconnect_attempts() -> u32 {
    3
}

fn default_reconnect_backoff_ms() -> u64 {
    1_000
}

fn default_turn_timeout_ms() -> u64 {
    25_000
}

fn default_inactivity_timeout_secs() -> u64 {
    300
}

fn default_greeting_window_secs() -> u64 {
    10
}

fn default_intake_idle_secs() -> u64 {
    3_600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_frame_send_timeout_ms() -> u64 {
    2_000
}

fn default_tenant() -> String {
    "default".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            turn_timeout_ms: default_turn_timeout_ms(),
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
            greeting_window_secs: default_greeting_window_secs(),
            intake_idle_secs: default_intake_idle_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            outbound_buffer: default_outbound_buffer(),
            frame_send_timeout_ms: default_frame_send_timeout_ms(),
            default_tenant: default_tenant(),
        }
    }
}

impl SessionConfig {
    pub fn channel_settings(&self, open_timeout: Duration) -> ChannelSettings {
        ChannelSettings {
            max_consecutive_failures: self.max_reconnect_attempts.max(1),
            backoff: Duration::from_millis(self.reconnect_backoff_ms),
            open_timeout,
            audio_capacity: self.queue_capacity + 64,
        }
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_millis(self.turn_timeout_ms)
    }

    pub fn frame_send_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_send_timeout_ms)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn greeting_window(&self) -> Duration {
        Duration::from_secs(self.greeting_window_secs)
    }

    pub fn intake_idle(&self) -> Duration {
        Duration::from_secs(self.intake_idle_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `CALMLINE_HOST`, `CALMLINE_PORT`
/// - `CALMLINE_DB_PATH`
/// - `CALMLINE_LOG_LEVEL`, `CALMLINE_LOG_JSON` ("true" or "1")
/// - `CALMLINE_RECOGNITION_API_KEY`, `CALMLINE_SYNTHESIS_API_KEY`,
///   `CALMLINE_GENERATION_API_KEY`
/// - `CALMLINE_SMS_AUTH_TOKEN`, `CALMLINE_EMAIL_API_KEY`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("CALMLINE_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("CALMLINE_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(db_path) = var("CALMLINE_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("CALMLINE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("CALMLINE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(key) = var("CALMLINE_RECOGNITION_API_KEY") {
        config.recognition.api_key = key;
    }
    if let Some(key) = var("CALMLINE_SYNTHESIS_API_KEY") {
        config.synthesis.api_key = key;
    }
    if let Some(key) = var("CALMLINE_GENERATION_API_KEY") {
        config.generation.api_key = key;
    }
    if let Some(token) = var("CALMLINE_SMS_AUTH_TOKEN") {
        config.notifications.sms.auth_token = token;
    }
    if let Some(key) = var("CALMLINE_EMAIL_API_KEY") {
        config.notifications.email.api_key = key;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calmline_types::NotificationType;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.session.queue_capacity, 500);
        assert_eq!(config.session.max_reconnect_attempts, 3);
        assert_eq!(config.session.greeting_window(), Duration::from_secs(10));
        assert_eq!(config.session.intake_idle(), Duration::from_secs(3600));
        assert_eq!(config.generation.max_tokens, 150);
    }

    #[test]
    fn sections_parse_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
port = 8080

[session]
queue_capacity = 50
reconnect_backoff_ms = 250

[notifications.contacts]
front_desk_email = "desk@practice.test"

[notifications.routes.billing]
email = "accounts@practice.test"
sms = "+15550001111"
"#
        )
        .unwrap();

        let config = load_config(file.path().to_str()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.session.queue_capacity, 50);
        let settings = config.session.channel_settings(Duration::from_secs(5));
        assert_eq!(settings.backoff, Duration::from_millis(250));
        assert_eq!(settings.max_consecutive_failures, 3);
        assert_eq!(
            config.notifications.routes[&NotificationType::Billing].email,
            "accounts@practice.test"
        );
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = load_config(path.to_str()).unwrap();
        assert_eq!(config.database.path, "calmline.db");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[server\nport = ").unwrap();
        assert!(matches!(
            load_config(file.path().to_str()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn environment_overrides_file_values() {
        let vars: HashMap<&str, &str> = [
            ("CALMLINE_PORT", "9000"),
            ("CALMLINE_LOG_JSON", "1"),
            ("CALMLINE_GENERATION_API_KEY", "sk-test"),
            ("CALMLINE_HOST", "not-an-address"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.port, 9000);
        assert!(config.logging.json);
        assert_eq!(config.generation.api_key, "sk-test");
        assert_eq!(config.server.host, default_host());
        assert!(!format!("{:?}", config).contains("sk-test"));
    }
}
