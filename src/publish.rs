use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::collector::Record;
use crate::error::{Result, TelemetryError};
use crate::metrics;

/// Where on the telemetry server a record goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Installation records.
    Publish,
    /// License records.
    Licensing,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Publish => "publish",
            Endpoint::Licensing => "licensing",
        }
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Returns the response body.
    async fn report(&self, endpoint: Endpoint, record: &Record) -> Result<String>;
}

/// Posts records as JSON to `<url>/<endpoint>`.
pub struct ToUrl {
    url: String,
    http: reqwest::Client,
}

impl ToUrl {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = url.trim_end_matches('/').to_string();
        if url.is_empty() {
            warn!("No to-url configured, not publishing");
        }

        Ok(Self {
            url,
            http: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn is_enabled(&self) -> bool {
        !self.url.is_empty()
    }
}

#[async_trait]
impl Publisher for ToUrl {
    async fn report(&self, endpoint: Endpoint, record: &Record) -> Result<String> {
        if !self.is_enabled() {
            return Ok(String::new());
        }

        let target = format!("{}/{}", self.url, endpoint.path());
        let response = match self.http.post(&target).json(record).send().await {
            Ok(response) => response,
            Err(e) => {
                metrics::record_publish_failure(endpoint.path());
                return Err(e.into());
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            debug!("Server said {}: {}", status.as_u16(), body);
            return Ok(body);
        }

        error!("Server said {}: {}", status.as_u16(), body);
        metrics::record_publish_failure(endpoint.path());
        Err(TelemetryError::Publish(format!(
            "Server returned {}: {}",
            status.as_u16(),
            body
        )))
    }
}
