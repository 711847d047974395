use std::env;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::error::{Result, TelemetryError};
use crate::management::{normalize_url, ClientOpts};

pub const DEFAULT_SERVER_LISTEN: &str = "0.0.0.0:8115";
pub const DEFAULT_CLIENT_LISTEN: &str = "0.0.0.0:8114";
pub const DEFAULT_TO_URL: &str = "https://telemetry.rancher.io";
pub const DEFAULT_INTERVAL: &str = "6h";
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_STATE_FILE: &str = ".existing";

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn flag(name: &str) -> bool {
    matches!(
        env::var(name).unwrap_or_default().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Parses a human duration (`6h`, `1h30m`, `1.5h`) or a plain number of
/// seconds. Zero is rejected.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    let invalid = |reason: String| TelemetryError::Config(format!("Invalid duration {:?}: {}", input, reason));

    let duration = match humantime::parse_duration(input) {
        Ok(duration) => duration,
        Err(e) => scaled_unit(input).ok_or_else(|| invalid(e.to_string()))?,
    };

    if duration.is_zero() {
        return Err(invalid("must be > 0".to_string()));
    }
    Ok(duration)
}

/// `90`, `2.5` (seconds) or one fractional unit such as `1.5h`.
fn scaled_unit(input: &str) -> Option<Duration> {
    let split = input
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);
    let number: f64 = number.parse().ok()?;

    let unit = if unit.is_empty() {
        Duration::from_secs(1)
    } else {
        humantime::parse_duration(&format!("1{}", unit)).ok()?
    };
    Duration::try_from_secs_f64(unit.as_secs_f64() * number).ok()
}

#[derive(Debug, Clone)]
pub struct PgConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub dbname: String,
    pub ssl: String,
}

impl PgConfig {
    pub fn from_env() -> Result<Self> {
        let port = var_or("TELEMETRY_PG_PORT", "5432");
        Ok(Self {
            host: var_or("TELEMETRY_PG_HOST", ""),
            port: port
                .parse()
                .map_err(|_| TelemetryError::Config(format!("Invalid TELEMETRY_PG_PORT: {}", port)))?,
            user: var_or("TELEMETRY_PG_USER", ""),
            pass: var_or("TELEMETRY_PG_PASS", ""),
            dbname: var_or("TELEMETRY_PG_DBNAME", "telemetry"),
            ssl: var_or("TELEMETRY_PG_SSL", "disable"),
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.host.is_empty() && !self.user.is_empty() && !self.pass.is_empty()
    }

    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        let ssl_mode: PgSslMode = self
            .ssl
            .parse()
            .map_err(|_| TelemetryError::Config(format!("Invalid TELEMETRY_PG_SSL: {}", self.ssl)))?;

        Ok(PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.pass)
            .database(&self.dbname)
            .ssl_mode(ssl_mode))
    }
}

/// The single shared admin credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminCredential {
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: String,
    pub xff: bool,
    pub pg: PgConfig,
    pub admin: Option<AdminCredential>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let pg = PgConfig::from_env()?;
        if !pg.is_configured() {
            return Err(TelemetryError::Config(
                "TELEMETRY_PG_HOST, TELEMETRY_PG_USER and TELEMETRY_PG_PASS are required".to_string(),
            ));
        }

        let access_key = var_or("TELEMETRY_API_KEY", "");
        let secret_key = var_or("TELEMETRY_SECRET_KEY", "");
        let admin = (!access_key.is_empty() && !secret_key.is_empty())
            .then(|| AdminCredential { access_key, secret_key });

        Ok(Self {
            listen: var_or("TELEMETRY_LISTEN", DEFAULT_SERVER_LISTEN),
            xff: flag("TELEMETRY_XFF"),
            pg,
            admin,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub listen: String,
    pub url: String,
    pub access_key: String,
    pub secret_key: String,
    pub token_key: String,
    pub ca_cert_file: String,
    pub interval: Duration,
    pub to_url: String,
    pub api_timeout: Duration,
    pub once: bool,
    /// Remembers the record version of the last run so a fresh install
    /// reports right away.
    pub state_file: String,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        let timeout = var_or("TELEMETRY_API_TIMEOUT", &DEFAULT_API_TIMEOUT_SECS.to_string());

        let config = Self {
            listen: var_or("TELEMETRY_LISTEN", DEFAULT_CLIENT_LISTEN),
            url: normalize_url(&var_or("CATTLE_URL", "")),
            access_key: var_or("CATTLE_ACCESS_KEY", ""),
            secret_key: var_or("CATTLE_SECRET_KEY", ""),
            token_key: var_or("CATTLE_TOKEN_KEY", ""),
            ca_cert_file: var_or("CATTLE_CERTIFICATE", ""),
            interval: parse_duration(&var_or("TELEMETRY_INTERVAL", DEFAULT_INTERVAL))?,
            to_url: var_or("TELEMETRY_TO_URL", DEFAULT_TO_URL),
            api_timeout: parse_duration(&timeout)?,
            once: flag("TELEMETRY_ONCE"),
            state_file: var_or("TELEMETRY_STATE_FILE", DEFAULT_STATE_FILE),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(TelemetryError::Config("CATTLE_URL is required".to_string()));
        }
        self.token().map(|_| ())
    }

    /// `CATTLE_TOKEN_KEY`, or `access:secret` when only the key pair is set.
    pub fn token(&self) -> Result<String> {
        if !self.token_key.is_empty() {
            return Ok(self.token_key.clone());
        }
        if !self.access_key.is_empty() && !self.secret_key.is_empty() {
            return Ok(format!("{}:{}", self.access_key, self.secret_key));
        }
        Err(TelemetryError::Config(
            "CATTLE_TOKEN_KEY or CATTLE_ACCESS_KEY and CATTLE_SECRET_KEY are required".to_string(),
        ))
    }

    pub fn client_opts(&self) -> Result<ClientOpts> {
        let mut opts = ClientOpts::new(self.url.clone(), self.token()?);
        opts.timeout = self.api_timeout;

        if !self.ca_cert_file.is_empty() {
            let pem = std::fs::read_to_string(&self.ca_cert_file).map_err(|e| {
                TelemetryError::Config(format!("Failed to read {}: {}", self.ca_cert_file, e))
            })?;
            opts.ca_cert = Some(pem);
        }

        Ok(opts)
    }
}
