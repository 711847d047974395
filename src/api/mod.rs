//! HTTP surfaces: the ingest and admin server, and the local client API.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;
use serde::Deserialize;

use crate::error::{Result, TelemetryError};

pub mod admin;
pub mod client;
pub mod server;

pub const DEFAULT_HOURS: i32 = 7;
pub const DEFAULT_DAYS: i32 = 28;

/// Raw `?hours=&days=` query parameters. Values that are not numbers
/// fall back to the defaults.
#[derive(Debug, Default, Deserialize)]
pub struct WindowParams {
    pub hours: Option<String>,
    pub days: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOpts {
    pub hours: i32,
    pub days: i32,
}

impl Default for RequestOpts {
    fn default() -> Self {
        Self {
            hours: DEFAULT_HOURS,
            days: DEFAULT_DAYS,
        }
    }
}

impl RequestOpts {
    pub fn from_params(params: &WindowParams) -> Result<Self> {
        let parse = |raw: &Option<String>, default: i32| {
            raw.as_deref()
                .and_then(|value| value.trim().parse().ok())
                .unwrap_or(default)
        };

        let opts = Self {
            hours: parse(&params.hours, DEFAULT_HOURS),
            days: parse(&params.days, DEFAULT_DAYS),
        };

        if opts.hours < 1 {
            return Err(TelemetryError::InvalidRequest("Hours must be > 0".to_string()));
        }
        if opts.days < 1 {
            return Err(TelemetryError::InvalidRequest("Days must be > 0".to_string()));
        }
        Ok(opts)
    }
}

/// Comma separated field list from a path segment.
pub fn split_fields(raw: &str) -> Result<Vec<String>> {
    if raw.trim().is_empty() {
        return Err(TelemetryError::InvalidRequest("You must provide some fields".to_string()));
    }
    Ok(raw.split(',').map(|field| field.trim().to_string()).collect())
}

/// Address a request came from: the first `X-Forwarded-For` entry when
/// `xff` is enabled and the header is present, else the peer address.
pub fn request_ip(headers: &HeaderMap, peer: Option<SocketAddr>, xff: bool) -> String {
    if xff {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string()).unwrap_or_default()
}

/// Zeroes the host part: IPv4 keeps its /24, IPv6 its /64. Anything that
/// does not parse is returned unchanged.
pub fn anonymize_ip(input: &str) -> String {
    match input.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            let [a, b, c, _] = ip.octets();
            IpAddr::from([a, b, c, 0]).to_string()
        }
        Ok(IpAddr::V6(ip)) => match ip.to_ipv4_mapped() {
            Some(v4) => anonymize_ip(&v4.to_string()),
            None => {
                let mut segments = ip.segments();
                segments[4..].fill(0);
                IpAddr::from(segments).to_string()
            }
        },
        Err(_) => input.to_string(),
    }
}
