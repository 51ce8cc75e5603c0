use crate::errors::{AppError, AppResult};
use crate::notifier::DEFAULT_QUEUE_CAPACITY;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

pub const DEFAULT_DATABASE_PATH: &str = "data/prompt_tree.sqlite";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_ALLOWED_ORIGINS: [&str; 2] = ["http://localhost:5173", "http://localhost:3000"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub host: IpAddr,
    pub port: u16,
    pub environment: String,
    pub api_key: Option<String>,
    pub allowed_origins: Vec<String>,
    pub seed_on_empty: bool,
    pub event_queue_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            host: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_PORT,
            environment: "development".to_string(),
            api_key: None,
            allowed_origins: DEFAULT_ALLOWED_ORIGINS.iter().map(|origin| origin.to_string()).collect(),
            seed_on_empty: true,
            event_queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl AppConfig {
    /// Reads configuration from the process environment, loading `.env` first
    /// when one is present.
    pub fn from_env() -> AppResult<Self> {
        if let Err(error) = dotenvy::dotenv() {
            if !error.not_found() {
                return Err(AppError::Config(format!("failed to read .env: {}", error)));
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).map(|raw| raw.trim().to_string()).filter(|raw| !raw.is_empty());

        let host_raw = value("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let host = host_raw
            .parse::<IpAddr>()
            .map_err(|_| AppError::Config(format!("HOST must be an IP address, got '{}'", host_raw)))?;

        let port = match value("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| AppError::Config(format!("PORT must be a number between 0 and 65535, got '{}'", raw)))?,
            None => DEFAULT_PORT,
        };

        let seed_on_empty = match value("SEED_ON_EMPTY") {
            Some(raw) => parse_bool("SEED_ON_EMPTY", &raw)?,
            None => true,
        };

        let event_queue_capacity = match value("EVENT_QUEUE_CAPACITY") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(capacity) if capacity > 0 => capacity,
                _ => {
                    return Err(AppError::Config(format!(
                        "EVENT_QUEUE_CAPACITY must be a positive integer, got '{}'",
                        raw
                    )))
                }
            },
            None => DEFAULT_QUEUE_CAPACITY,
        };

        let allowed_origins = match value("ALLOWED_ORIGINS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(|origin| origin.trim_end_matches('/').to_string())
                .collect(),
            None => DEFAULT_ALLOWED_ORIGINS.iter().map(|origin| origin.to_string()).collect(),
        };

        Ok(Self {
            database_path: value("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH)),
            host,
            port,
            environment: value("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            api_key: value("API_KEY"),
            allowed_origins,
            seed_on_empty,
            event_queue_capacity,
        })
    }

    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_allowed_origin(&self, origin: &str) -> bool {
        let origin = origin.trim_end_matches('/');
        self.allowed_origins.iter().any(|allowed| allowed == origin)
    }
}

fn parse_bool(key: &str, raw: &str) -> AppResult<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::Config(format!("{} must be a boolean, got '{}'", key, raw))),
    }
}
