use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::compliance::transmission::MockOutcome;

const DEFAULT_TCE_BASE_URL: &str = "https://api.tce.ms.gov.br/esfinge";
const DEFAULT_TCE_TIMEOUT_MS: u64 = 30_000;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub transmission: TransmissionConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            transmission: TransmissionConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Settings for the oversight authority client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmissionConfig {
    /// Use the deterministic mock transport instead of HTTP.
    pub mock: bool,
    pub base_url: String,
    pub timeout: Duration,
    /// Outcome produced by the mock transport.
    pub mock_outcome: MockOutcome,
}

impl Default for TransmissionConfig {
    fn default() -> Self {
        Self {
            mock: true,
            base_url: DEFAULT_TCE_BASE_URL.to_string(),
            timeout: Duration::from_millis(DEFAULT_TCE_TIMEOUT_MS),
            mock_outcome: MockOutcome::Accept,
        }
    }
}

impl TransmissionConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let mock = match env::var("TCE_API_MOCK") {
            Ok(value) => parse_flag(&value).ok_or(ConfigError::InvalidMockFlag(value))?,
            Err(_) => defaults.mock,
        };
        let base_url = env::var("TCE_API_BASE_URL")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or(defaults.base_url);
        let timeout = match env::var("TCE_API_TIMEOUT") {
            Ok(value) => value
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|millis| *millis > 0)
                .map(Duration::from_millis)
                .ok_or(ConfigError::InvalidTimeout(value))?,
            Err(_) => defaults.timeout,
        };
        let mock_outcome = match env::var("TCE_MOCK_OUTCOME") {
            Ok(value) => value
                .parse::<MockOutcome>()
                .map_err(|_| ConfigError::InvalidMockOutcome(value))?,
            Err(_) => defaults.mock_outcome,
        };

        Ok(Self {
            mock,
            base_url,
            timeout,
            mock_outcome,
        })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidMockFlag(String),
    InvalidTimeout(String),
    InvalidMockOutcome(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidMockFlag(value) => {
                write!(f, "TCE_API_MOCK must be true or false, got '{value}'")
            }
            ConfigError::InvalidTimeout(value) => write!(
                f,
                "TCE_API_TIMEOUT must be a positive number of milliseconds, got '{value}'"
            ),
            ConfigError::InvalidMockOutcome(value) => write!(
                f,
                "TCE_MOCK_OUTCOME must be accept, reject or unreachable, got '{value}'"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidMockFlag(_)
            | ConfigError::InvalidTimeout(_)
            | ConfigError::InvalidMockOutcome(_) => None,
        }
    }
}
