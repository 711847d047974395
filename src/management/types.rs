use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Cluster {
    pub id: String,
    pub name: String,
    pub uuid: String,
    pub state: String,
    pub driver: String,
    pub internal: bool,
    pub allocatable: HashMap<String, String>,
    pub requested: HashMap<String, String>,
    pub windows_worker_count: i64,
    pub linux_worker_count: i64,
    pub scheduled_cluster_scan: Option<ScheduledClusterScan>,
    pub applied_enable_network_policy: bool,
    pub rancher_kubernetes_engine_config: Option<EngineConfig>,
    pub enable_cluster_monitoring: bool,
    pub istio_enabled: bool,
}

impl Cluster {
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("({})", self.uuid)
        } else {
            self.name.clone()
        }
    }

    pub fn cis_profile(&self) -> Option<&str> {
        let scan = self.scheduled_cluster_scan.as_ref().filter(|s| s.enabled)?;
        Some(
            scan.scan_config
                .as_ref()
                .and_then(|c| c.cis_scan_config.as_ref())
                .map(|c| c.profile.as_str())
                .unwrap_or_default(),
        )
    }

    pub fn cloud_provider(&self) -> Option<&str> {
        self.rancher_kubernetes_engine_config
            .as_ref()
            .and_then(|c| c.cloud_provider.as_ref())
            .map(|p| p.name.as_str())
            .filter(|name| !name.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScheduledClusterScan {
    pub enabled: bool,
    pub scan_config: Option<ScanConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScanConfig {
    pub cis_scan_config: Option<CisScanConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CisScanConfig {
    pub profile: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub cloud_provider: Option<CloudProvider>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CloudProvider {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterLogging {
    pub applied_spec: Option<LoggingSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingSpec {
    pub elasticsearch_config: Option<Value>,
    pub splunk_config: Option<Value>,
    pub kafka_config: Option<Value>,
    pub syslog_config: Option<Value>,
    pub fluent_forwarder_config: Option<Value>,
    pub custom_target_config: Option<Value>,
}

impl LoggingSpec {
    /// Name of the first configured target, in precedence order.
    pub fn provider(&self) -> Option<&'static str> {
        [
            (&self.elasticsearch_config, "Elasticsearch"),
            (&self.splunk_config, "Splunk"),
            (&self.kafka_config, "Kafka"),
            (&self.syslog_config, "Syslog"),
            (&self.fluent_forwarder_config, "Fluentd"),
            (&self.custom_target_config, "Custom"),
        ]
        .into_iter()
        .find(|(config, _)| matches!(config, Some(v) if !v.is_null()))
        .map(|(_, name)| name)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub name: String,
    pub hostname: String,
    pub uuid: String,
    pub state: String,
    pub cluster_id: String,
    pub imported: bool,
    pub allocatable: HashMap<String, String>,
    pub requested: HashMap<String, String>,
    pub info: NodeInfo,
    pub control_plane: bool,
    pub etcd: bool,
    pub worker: bool,
    pub node_template_id: String,
}

impl Node {
    pub fn display_name(&self) -> String {
        if !self.name.is_empty() {
            self.name.clone()
        } else if !self.hostname.is_empty() {
            self.hostname.clone()
        } else {
            format!("({})", self.uuid)
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeInfo {
    pub os: OsInfo,
    pub kubernetes: KubernetesInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OsInfo {
    pub kernel_version: String,
    pub operating_system: String,
    pub docker_version: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KubernetesInfo {
    pub kubelet_version: String,
    pub kube_proxy_version: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeTemplate {
    pub driver: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub cluster_id: String,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Namespace {
    pub id: String,
    pub project_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Setting {
    pub id: String,
    pub name: String,
    pub value: String,
    pub default: String,
}

impl Setting {
    /// The configured value, else the built-in default.
    pub fn effective(&self) -> &str {
        if self.value.is_empty() {
            &self.default
        } else {
            &self.value
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Catalog {
    pub name: String,
    pub url: String,
    pub state: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct App {
    pub external_id: String,
    pub state: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MultiClusterApp {
    pub state: String,
    pub targets: Vec<Value>,
    pub template_version_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TemplateVersion {
    pub external_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceCodeProvider {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct User {
    pub principal_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Driver {
    pub name: String,
    pub active: bool,
}
