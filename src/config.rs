use crate::service::{NotificationPayload, ServiceOptions};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_ORIGINS: &str = "https://quickpoll-frontend-mcyo.onrender.com,http://localhost:3000";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} has an invalid value {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub cors_origins: Vec<String>,
    pub service: ServiceOptions,
}

impl Config {
    /// Reads the process environment, after loading `.env` if one exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let payload = match lookup("NOTIFICATION_PAYLOAD").as_deref() {
            None | Some("counter") => NotificationPayload::Counter,
            Some("poll") => NotificationPayload::Poll,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    name: "NOTIFICATION_PAYLOAD",
                    value: other.to_string(),
                });
            }
        };

        let cors_origins = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| DEFAULT_ORIGINS.to_string())
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(String::from)
            .collect();

        Ok(Config {
            port: parse(&lookup, "PORT", 8080)?,
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            db_max_connections: parse(&lookup, "DB_MAX_CONNECTIONS", 20)?,
            cors_origins,
            service: ServiceOptions {
                send_timeout: Duration::from_millis(parse(
                    &lookup,
                    "SUBSCRIBER_SEND_TIMEOUT_MS",
                    2000,
                )?),
                subscriber_buffer: parse(&lookup, "SUBSCRIBER_BUFFER", 64)?,
                payload,
            },
        })
    }
}

fn parse<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
    }
}
