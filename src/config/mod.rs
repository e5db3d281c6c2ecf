//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub tournament: TournamentSettings,
}

/// Parameters fixed for the lifetime of the tournament service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TournamentSettings {
    /// Quiet period after the last join/leave before the tournament starts
    pub start_delay: Duration,
    /// Registered players required for the start timer to fire
    pub min_players: usize,
    /// Stop the server once a champion is declared
    pub shutdown_on_finish: bool,
}

impl Default for TournamentSettings {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_secs(5),
            min_players: 2,
            shutdown_on_finish: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // PORT wins over SERVER_ADDR when both are present
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let defaults = TournamentSettings::default();

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            tournament: TournamentSettings {
                start_delay: Duration::from_secs(parse_or(
                    "START_DELAY_SECS",
                    defaults.start_delay.as_secs(),
                )?),
                min_players: parse_or("MIN_PLAYERS", defaults.min_players)?,
                shutdown_on_finish: parse_flag("SHUTDOWN_ON_FINISH", defaults.shutdown_on_finish)?,
            },
        })
    }
}

/// Client configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// WebSocket URL of the tournament server
    pub server_url: String,
    /// Prompt on stdin; otherwise pick hands at random
    pub interactive: bool,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server_url: env::var("SERVER_URL").unwrap_or_else(|_| "ws://localhost:8080".to_string()),
            interactive: parse_flag("INTERACTIVE", true)?,
        })
    }
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

fn parse_flag(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(key) {
        Ok(raw) => parse_bool(&raw).ok_or(ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
