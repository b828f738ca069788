//! Process configuration for infrasync.
//!
//! TOML file + `INFRASYNC_` environment overrides, translated into the
//! runtime `infrasync_core::InfraConfig`, plus `tracing` subscriber setup.
//! Durations are written the humantime way (`"250ms"`, `"30m"`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use infrasync_amqp::{CommandConfig, ReconnectConfig, TlsIdentity};
use infrasync_core::config::{DEFAULT_BROKER_PORT, DEFAULT_PRODUCT, DEFAULT_ROUTER_PORT};
use infrasync_core::{ConnectorTemplate, InfraConfig, ReadinessConfig};

/// Environment variable prefix. Nested keys are separated by `__`,
/// e.g. `INFRASYNC_INFRA__ROUTER_PORT`.
pub const ENV_PREFIX: &str = "INFRASYNC_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("failed to install tracing subscriber: {0}")]
    Tracing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub infra: InfraSection,

    #[serde(default)]
    pub command: CommandSection,

    /// Client identity for management links. Omit to connect without one.
    #[serde(default)]
    pub tls: Option<TlsSection>,

    #[serde(default)]
    pub connector: ConnectorSection,

    #[serde(default)]
    pub readiness: ReadinessSection,

    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InfraSection {
    #[serde(default = "default_router_port")]
    pub router_port: u16,

    #[serde(default = "default_broker_port")]
    pub broker_port: u16,

    /// Value of the `product` connection property.
    #[serde(default = "default_product")]
    pub product: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,

    #[serde(default = "default_resync_interval")]
    pub resync_interval: String,

    #[serde(default = "default_resync_jitter_min")]
    pub resync_jitter_min: String,

    #[serde(default = "default_resync_jitter_max")]
    pub resync_jitter_max: String,
}

impl Default for InfraSection {
    fn default() -> Self {
        Self {
            router_port: default_router_port(),
            broker_port: default_broker_port(),
            product: default_product(),
            connect_timeout: default_connect_timeout(),
            resync_interval: default_resync_interval(),
            resync_jitter_min: default_resync_jitter_min(),
            resync_jitter_max: default_resync_jitter_max(),
        }
    }
}

fn default_router_port() -> u16 {
    DEFAULT_ROUTER_PORT
}
fn default_broker_port() -> u16 {
    DEFAULT_BROKER_PORT
}
fn default_product() -> String {
    DEFAULT_PRODUCT.into()
}
fn default_connect_timeout() -> String {
    "10s".into()
}
fn default_resync_interval() -> String {
    "30m".into()
}
fn default_resync_jitter_min() -> String {
    "10s".into()
}
fn default_resync_jitter_max() -> String {
    "30s".into()
}

/// Command channel tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommandSection {
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_reconnect_initial_delay")]
    pub reconnect_initial_delay: String,

    #[serde(default = "default_reconnect_network_delay")]
    pub reconnect_network_delay: String,

    #[serde(default = "default_reconnect_max_delay")]
    pub reconnect_max_delay: String,

    /// Give up after this many consecutive failed attempts. Unset retries
    /// forever.
    pub reconnect_max_retries: Option<u32>,
}

impl Default for CommandSection {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            request_timeout: default_request_timeout(),
            queue_capacity: default_queue_capacity(),
            reconnect_initial_delay: default_reconnect_initial_delay(),
            reconnect_network_delay: default_reconnect_network_delay(),
            reconnect_max_delay: default_reconnect_max_delay(),
            reconnect_max_retries: None,
        }
    }
}

fn default_poll_interval() -> String {
    "250ms".into()
}
fn default_request_timeout() -> String {
    "30s".into()
}
fn default_queue_capacity() -> usize {
    CommandConfig::default().queue_capacity
}
fn default_reconnect_initial_delay() -> String {
    "1s".into()
}
fn default_reconnect_network_delay() -> String {
    "5s".into()
}
fn default_reconnect_max_delay() -> String {
    "30s".into()
}

/// PEM files presented on every management link.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TlsSection {
    pub ca_cert: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConnectorSection {
    #[serde(default = "default_connector_role")]
    pub role: String,

    #[serde(default = "default_ssl_profile")]
    pub ssl_profile: Option<String>,

    #[serde(default = "default_sasl_mechanisms")]
    pub sasl_mechanisms: Option<String>,

    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: i64,

    #[serde(default = "default_true")]
    pub verify_hostname: bool,
}

impl Default for ConnectorSection {
    fn default() -> Self {
        Self {
            role: default_connector_role(),
            ssl_profile: default_ssl_profile(),
            sasl_mechanisms: default_sasl_mechanisms(),
            idle_timeout_seconds: default_idle_timeout_seconds(),
            verify_hostname: true,
        }
    }
}

fn default_connector_role() -> String {
    ConnectorTemplate::default().role
}
fn default_ssl_profile() -> Option<String> {
    ConnectorTemplate::default().ssl_profile
}
fn default_sasl_mechanisms() -> Option<String> {
    ConnectorTemplate::default().sasl_mechanisms
}
fn default_idle_timeout_seconds() -> i64 {
    ConnectorTemplate::default().idle_timeout_seconds
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReadinessSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_readiness_name")]
    pub name: String,

    #[serde(default = "default_listener_host")]
    pub listener_host: String,

    #[serde(default = "default_listener_port")]
    pub listener_port: u16,
}

impl Default for ReadinessSection {
    fn default() -> Self {
        Self {
            enabled: true,
            name: default_readiness_name(),
            listener_host: default_listener_host(),
            listener_port: default_listener_port(),
        }
    }
}

fn default_readiness_name() -> String {
    ReadinessConfig::default().name
}
fn default_listener_host() -> String {
    ReadinessConfig::default().listener_host
}
fn default_listener_port() -> u16 {
    ReadinessConfig::default().listener_port
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingSection {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `"text"` or `"json"`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "infrasync", "infrasync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("infrasync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the config from the default path + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the config from `path` + environment. A missing file leaves the
/// defaults in place.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    tracing::debug!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

/// Serialize the config to TOML at `path`, creating parent directories.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

fn parse_duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("'{value}': {e}"),
    })
}

impl Config {
    /// Build the runtime configuration, validating every field.
    pub fn to_infra_config(&self) -> Result<InfraConfig, ConfigError> {
        let infra = &self.infra;
        let cmd = &self.command;

        if cmd.queue_capacity == 0 {
            return Err(ConfigError::Validation {
                field: "command.queue_capacity".into(),
                reason: "must be at least 1".into(),
            });
        }

        let poll_interval = parse_duration("command.poll_interval", &cmd.poll_interval)?;
        if poll_interval.is_zero() {
            return Err(ConfigError::Validation {
                field: "command.poll_interval".into(),
                reason: "must be greater than zero".into(),
            });
        }

        let command = CommandConfig {
            poll_interval,
            queue_capacity: cmd.queue_capacity,
            request_timeout: parse_duration("command.request_timeout", &cmd.request_timeout)?,
            reconnect: ReconnectConfig {
                initial_delay: parse_duration(
                    "command.reconnect_initial_delay",
                    &cmd.reconnect_initial_delay,
                )?,
                network_delay: parse_duration(
                    "command.reconnect_network_delay",
                    &cmd.reconnect_network_delay,
                )?,
                max_delay: parse_duration("command.reconnect_max_delay", &cmd.reconnect_max_delay)?,
                max_retries: cmd.reconnect_max_retries,
            },
        };

        let resync_jitter_min = parse_duration("infra.resync_jitter_min", &infra.resync_jitter_min)?;
        let resync_jitter_max = parse_duration("infra.resync_jitter_max", &infra.resync_jitter_max)?;
        if resync_jitter_min > resync_jitter_max {
            return Err(ConfigError::Validation {
                field: "infra.resync_jitter_min".into(),
                reason: format!(
                    "'{}' exceeds resync_jitter_max '{}'",
                    infra.resync_jitter_min, infra.resync_jitter_max
                ),
            });
        }

        let tls = self.tls.as_ref().map(|t| TlsIdentity {
            ca_cert: t.ca_cert.clone(),
            cert: t.cert.clone(),
            key: t.key.clone(),
        });

        Ok(InfraConfig {
            router_port: infra.router_port,
            broker_port: infra.broker_port,
            command,
            connect_timeout: parse_duration("infra.connect_timeout", &infra.connect_timeout)?,
            tls,
            product: infra.product.clone(),
            resync_interval: parse_duration("infra.resync_interval", &infra.resync_interval)?,
            resync_jitter_min,
            resync_jitter_max,
            connector: ConnectorTemplate {
                role: self.connector.role.clone(),
                ssl_profile: self.connector.ssl_profile.clone(),
                sasl_mechanisms: self.connector.sasl_mechanisms.clone(),
                idle_timeout_seconds: self.connector.idle_timeout_seconds,
                verify_hostname: self.connector.verify_hostname,
            },
            readiness: ReadinessConfig {
                enabled: self.readiness.enabled,
                name: self.readiness.name.clone(),
                listener_host: self.readiness.listener_host.clone(),
                listener_port: self.readiness.listener_port,
            },
        })
    }
}

// ── Tracing ─────────────────────────────────────────────────────────

/// Install the global `tracing` subscriber. `RUST_LOG` wins over the
/// configured level.
pub fn init_tracing(logging: &LoggingSection) -> Result<(), ConfigError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let result = match logging.format.as_str() {
        "text" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init(),
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .try_init(),
        other => {
            return Err(ConfigError::Validation {
                field: "logging.format".into(),
                reason: format!("expected 'text' or 'json', got '{other}'"),
            });
        }
    };

    result.map_err(|e| ConfigError::Tracing(e.to_string()))
}
