use std::{env, str::FromStr};

use anyhow::{anyhow, bail, Context, Result};

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8081;

/// Where the plain-text sensor endpoints take their numbers from.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SensorSource {
    /// Latest stored reading.
    #[default]
    Live,
    /// Fixed demo values, the store is not consulted.
    Stub,
}

impl FromStr for SensorSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(SensorSource::Live),
            "stub" => Ok(SensorSource::Stub),
            other => Err(anyhow!("expected 'live' or 'stub', got '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub port: u16,
    pub sensor_source: SensorSource,
    pub cors_allowed_origin: Option<String>,
}

impl Config {
    /// Reads the process environment. Load `.env` before calling this.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = match lookup("DATABASE_URL") {
            Some(url) if !url.trim().is_empty() => url,
            _ => bail!("DATABASE_URL must be set"),
        };

        let port = match lookup("PORT") {
            Some(port) => port
                .trim()
                .parse::<u16>()
                .with_context(|| format!("PORT is not a valid port number: '{port}'"))?,
            None => DEFAULT_PORT,
        };

        let sensor_source = match lookup("SENSOR_SOURCE") {
            Some(source) => source.parse::<SensorSource>().context("invalid SENSOR_SOURCE")?,
            None => SensorSource::default(),
        };

        Ok(Self {
            database_url,
            bind_address: lookup("BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_owned()),
            port,
            sensor_source,
            cors_allowed_origin: lookup("CORS_ALLOWED_ORIGIN").filter(|o| !o.trim().is_empty()),
        })
    }
}
