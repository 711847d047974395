//! Access to the management API that the collectors traverse.
//!
//! Every resource kind is reached through the same [`ResourceClient`] seam:
//! the root client talks to `<url>`, cluster and project scoped clients talk
//! to `<url>/clusters/<id>` and `<url>/projects/<id>`. Records come back as
//! JSON and are decoded into the typed views in [`types`] where a collector
//! needs named fields.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

pub mod rest;
pub mod types;

#[cfg(test)]
pub mod mock;

pub use rest::{RestClient, RestFactory};

/// Resource collection names as they appear in API paths.
pub mod kind {
    pub const CLUSTERS: &str = "clusters";
    pub const CLUSTER_LOGGINGS: &str = "clusterLoggings";
    pub const NODES: &str = "nodes";
    pub const NODE_TEMPLATES: &str = "nodeTemplates";
    pub const PROJECTS: &str = "projects";
    pub const SETTINGS: &str = "settings";
    pub const CATALOGS: &str = "catalogs";
    pub const AUTH_CONFIGS: &str = "authConfigs";
    pub const USERS: &str = "users";
    pub const NODE_DRIVERS: &str = "nodeDrivers";
    pub const KONTAINER_DRIVERS: &str = "kontainerDrivers";
    pub const CLUSTER_TEMPLATES: &str = "clusterTemplates";
    pub const CLUSTER_TEMPLATE_REVISIONS: &str = "clusterTemplateRevisions";
    pub const MULTI_CLUSTER_APPS: &str = "multiClusterApps";
    pub const TEMPLATE_VERSIONS: &str = "templateVersions";
    pub const GLOBAL_DNS_PROVIDERS: &str = "globalDnsProviders";
    pub const GLOBAL_DNSES: &str = "globalDnses";

    // cluster scoped
    pub const NAMESPACES: &str = "namespaces";
    pub const API_SERVICES: &str = "apiServices";

    // project scoped
    pub const WORKLOADS: &str = "workloads";
    pub const PODS: &str = "pods";
    pub const HPAS: &str = "horizontalPodAutoscalers";
    pub const APPS: &str = "apps";
    pub const PIPELINES: &str = "pipelines";
    pub const SOURCE_CODE_PROVIDERS: &str = "sourceCodeProviders";
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{kind} {id} not found")]
    NotFound { kind: String, id: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("{0}")]
    Other(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Connection options for one API root.
#[derive(Debug, Clone)]
pub struct ClientOpts {
    pub url: String,
    pub token_key: String,
    pub ca_cert: Option<String>,
    pub timeout: Duration,
}

impl ClientOpts {
    pub fn new(url: impl Into<String>, token_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token_key: token_key.into(),
            ca_cert: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Options for a sub-scoped client, e.g. `scoped("clusters", "c-1")`.
    pub fn scoped(&self, collection: &str, id: &str) -> ClientOpts {
        ClientOpts {
            url: format!("{}/{}/{}", self.url, collection, id),
            ..self.clone()
        }
    }
}

/// Strips a trailing slash and makes sure the URL points at the `/v3` root.
pub fn normalize_url(url: &str) -> String {
    if url.is_empty() {
        return String::new();
    }

    let url = url.trim_end_matches('/');
    if url.ends_with("/v3") {
        url.to_string()
    } else {
        format!("{}/v3", url)
    }
}

/// Filters passed to list calls as query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOpts {
    pub filters: BTreeMap<String, String>,
}

impl ListOpts {
    /// Everything not in the `removed` state, unpaged.
    pub fn non_removed() -> Self {
        ListOpts::default()
            .filter("state_ne", "removed")
            .filter("limit", "-1")
    }

    pub fn filter(mut self, key: &str, value: impl ToString) -> Self {
        self.filters.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.filters.get(key).map(String::as_str)
    }
}

#[async_trait]
pub trait ResourceClient: Send + Sync {
    fn opts(&self) -> &ClientOpts;

    async fn list(&self, kind: &str, opts: &ListOpts) -> ApiResult<Vec<Value>>;

    async fn by_id(&self, kind: &str, id: &str) -> ApiResult<Value>;

    async fn create(&self, kind: &str, body: &Value) -> ApiResult<Value>;

    async fn update(&self, kind: &str, id: &str, body: &Value) -> ApiResult<Value>;
}

/// Builds clients for sub-scoped API roots.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self, opts: ClientOpts) -> ApiResult<Arc<dyn ResourceClient>>;
}

/// Drops `null` object members so that `#[serde(default)]` fills them in.
fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_nulls).collect()),
        other => other,
    }
}

pub fn decode<T: DeserializeOwned>(item: Value) -> ApiResult<T> {
    Ok(serde_json::from_value(strip_nulls(item))?)
}

/// Lists `kind` and decodes every item. An item that still fails to decode
/// is logged and skipped.
pub async fn list_as<T: DeserializeOwned>(
    client: &dyn ResourceClient,
    kind: &str,
    opts: &ListOpts,
) -> ApiResult<Vec<T>> {
    let items = client.list(kind, opts).await?;
    let mut out = Vec::with_capacity(items.len());

    for item in items {
        let id = item.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
        match decode(item) {
            Ok(decoded) => out.push(decoded),
            Err(e) => warn!("Skipping undecodable {} [{}] err={}", kind, id, e),
        }
    }

    Ok(out)
}

pub async fn by_id_as<T: DeserializeOwned>(
    client: &dyn ResourceClient,
    kind: &str,
    id: &str,
) -> ApiResult<T> {
    decode(client.by_id(kind, id).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url(""), "");
        assert_eq!(normalize_url("https://mgmt.example"), "https://mgmt.example/v3");
        assert_eq!(normalize_url("https://mgmt.example/"), "https://mgmt.example/v3");
        assert_eq!(normalize_url("https://mgmt.example/v3/"), "https://mgmt.example/v3");
    }

    #[test]
    fn test_scoped_opts() {
        let opts = ClientOpts::new("https://mgmt.example/v3", "token");
        assert_eq!(
            opts.scoped("clusters", "c-abc").url,
            "https://mgmt.example/v3/clusters/c-abc"
        );
        assert_eq!(opts.scoped("projects", "c-abc:p-1").token_key, "token");
    }

    #[test]
    fn test_non_removed_filters() {
        let opts = ListOpts::non_removed().filter("clusterId", "c-1");
        assert_eq!(opts.get("state_ne"), Some("removed"));
        assert_eq!(opts.get("limit"), Some("-1"));
        assert_eq!(opts.get("clusterId"), Some("c-1"));
    }

    #[test]
    fn test_decode_treats_null_as_default() {
        let node: types::Node = decode(serde_json::json!({
            "id": "n-1",
            "nodeTemplateId": null,
            "imported": null,
            "allocatable": null,
            "info": {"os": {"kernelVersion": null}}
        }))
        .unwrap();

        assert_eq!(node.id, "n-1");
        assert_eq!(node.node_template_id, "");
        assert!(!node.imported);
        assert!(node.allocatable.is_empty());
        assert_eq!(node.info.os.kernel_version, "");
    }

    #[test_log::test(tokio::test)]
    async fn test_list_as_skips_only_undecodable_items() {
        let client = mock::MockClient::new("test").with_list(
            kind::NODES,
            r#"[{"id": "n-1"}, {"id": "n-2", "worker": "yes"}, {"id": "n-3", "nodeTemplateId": null}]"#,
        );

        let nodes: Vec<types::Node> = list_as(&client, kind::NODES, &ListOpts::default()).await.unwrap();
        let ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["n-1", "n-3"]);
    }
}
