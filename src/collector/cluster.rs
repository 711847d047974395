use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use super::stats::{
    average, CpuInfo, LabelCount, MemoryInfo, NsInfo, PodInfo, ServiceInfo, UtilizationRollup,
};
use super::{to_value, Collector, CollectorOpts};
use crate::management::types::{Cluster, ClusterLogging, Namespace, Project};
use crate::management::{kind, list_as, ListOpts};

pub const RECORD_KEY: &str = "cluster";

const K3S_EMBEDDED_DRIVER: &str = "k3sBased";
const K3S_RANCHER_DEPLOY: &str = "rancher";
const K3S_RANCHER_DEPLOY_NS: &str = "cattle-system";
const SYSTEM_PROJECT_LABEL: &str = "authz.management.cattle.io/system-project";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStats {
    pub active: i64,
    pub total: i64,
    pub namespace: NsInfo,
    pub cpu: CpuInfo,
    pub mem: MemoryInfo,
    pub pod: PodInfo,
    pub driver: LabelCount,
    pub istio: i64,
    pub monitoring: i64,
    pub service: ServiceInfo,
    pub logging: LabelCount,
    pub cloud_provider: LabelCount,
    pub cis: i64,
    pub cis_profile_version: LabelCount,
    pub network_policy: i64,
    pub hybrid: i64,
    pub linux_worker: i64,
    pub windows_worker: i64,
}

/// Capacity, utilization and feature usage across all clusters.
pub struct ClusterCollector;

#[async_trait]
impl Collector for ClusterCollector {
    fn record_key(&self) -> &'static str {
        RECORD_KEY
    }

    async fn collect(&self, opts: &CollectorOpts) -> Option<Value> {
        debug!("Collecting Clusters");
        let non_removed = ListOpts::non_removed();

        let clusters = match list_as::<Cluster>(opts.client(), kind::CLUSTERS, &non_removed).await {
            Ok(clusters) => clusters,
            Err(e) => {
                error!("Failed to get Clusters err={}", e);
                return None;
            }
        };
        debug!("  Found {} Clusters", clusters.len());

        let mut out = ClusterStats::default();
        let mut rollup = UtilizationRollup::new();
        let mut ns_counts = Vec::new();
        let mut service_counts = Vec::new();

        for cluster in &clusters {
            debug!("  Cluster: {}", cluster.display_name());

            out.total += 1;
            if cluster.state == "active" {
                out.active += 1;
            }

            if !rollup.observe(&cluster.allocatable, &cluster.requested) {
                debug!("  Skipping Cluster with no resources: {}", cluster.display_name());
            }

            if is_k3s_embedded(opts, cluster).await {
                out.driver.increment(K3S_EMBEDDED_DRIVER);
            } else {
                out.driver.increment(&cluster.driver);
            }

            if cluster.windows_worker_count > 0 {
                out.hybrid += 1;
                out.windows_worker += cluster.windows_worker_count;
            }
            if cluster.linux_worker_count > 0 {
                out.linux_worker += cluster.linux_worker_count;
            }

            if let Some(profile) = cluster.cis_profile() {
                out.cis += 1;
                out.cis_profile_version.increment(profile);
            }
            if cluster.applied_enable_network_policy {
                out.network_policy += 1;
            }
            if let Some(provider) = cluster.cloud_provider() {
                out.cloud_provider.increment(provider);
            }
            if cluster.enable_cluster_monitoring {
                out.monitoring += 1;
            }
            if cluster.istio_enabled {
                out.istio += 1;
            }

            let cluster_client = match opts.cache.cluster_client(&cluster.id).await {
                Ok(client) => client,
                Err(e) => {
                    error!("Failed to get Cluster client err={}", e);
                    continue;
                }
            };

            match list_as::<Namespace>(cluster_client.as_ref(), kind::NAMESPACES, &ListOpts::default())
                .await
            {
                Ok(namespaces) => {
                    let total = namespaces.len() as i64;
                    out.namespace.update(total);
                    ns_counts.push(total as f64);
                    out.namespace
                        .update_details(namespaces.iter().map(|ns| ns.project_id.as_str()));
                }
                Err(e) => error!("Failed to get Namespaces err={}", e),
            }

            match cluster_client.list(kind::API_SERVICES, &non_removed).await {
                Ok(services) => {
                    let total = services.len() as i64;
                    out.service.update(total);
                    service_counts.push(total as f64);
                }
                Err(e) => error!("Failed to get Services err={}", e),
            }
        }

        let (cpu, mem, pod) = rollup.finish();
        out.cpu = cpu;
        out.mem = mem;
        out.pod = pod;
        out.namespace.update_avg(&ns_counts);
        out.service.update_avg(&service_counts);
        debug!("  Average namespaces per cluster {:.2}", average(&ns_counts));

        match list_as::<ClusterLogging>(opts.client(), kind::CLUSTER_LOGGINGS, &ListOpts::default())
            .await
        {
            Ok(loggings) => {
                for provider in loggings
                    .iter()
                    .filter_map(|l| l.applied_spec.as_ref())
                    .filter_map(|spec| spec.provider())
                {
                    out.logging.increment(provider);
                }
            }
            Err(e) => error!("Failed to get Cluster Loggings err={}", e),
        }

        to_value(RECORD_KEY, &out)
    }
}

/// A k3s local cluster is "embedded" when the management server does not
/// run as a workload inside its system project.
async fn is_k3s_embedded(opts: &CollectorOpts, cluster: &Cluster) -> bool {
    if cluster.driver != "k3s" || !cluster.internal {
        return false;
    }

    let system_project_id = match system_project_id(opts, &cluster.id).await {
        Some(id) => id,
        None => return false,
    };

    let project_client = match opts.cache.project_client(&system_project_id).await {
        Ok(client) => client,
        Err(e) => {
            debug!("Failed to get System project client err={}", e);
            return false;
        }
    };

    let filter = ListOpts::non_removed()
        .filter("name", K3S_RANCHER_DEPLOY)
        .filter("namespaceId", K3S_RANCHER_DEPLOY_NS);
    match project_client.list(kind::WORKLOADS, &filter).await {
        Ok(workloads) => workloads.is_empty(),
        Err(e) => {
            debug!("Failed to get System project deployments err={}", e);
            false
        }
    }
}

async fn system_project_id(opts: &CollectorOpts, cluster_id: &str) -> Option<String> {
    if cluster_id.is_empty() {
        debug!("Cluster id is empty");
        return None;
    }

    let filter = ListOpts::non_removed().filter("clusterId", cluster_id);
    let projects = match list_as::<Project>(opts.client(), kind::PROJECTS, &filter).await {
        Ok(projects) => projects,
        Err(e) => {
            debug!("Failed to get System project ID err={}", e);
            return None;
        }
    };

    let found = projects
        .into_iter()
        .find(|p| p.labels.get(SYSTEM_PROJECT_LABEL).map(String::as_str) == Some("true"))
        .map(|p| p.id);
    if found.is_none() {
        debug!("System project not found at Cluster id {}", cluster_id);
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::management::mock::{MockClient, MockFactory};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    const CLUSTER_A: &str = r#"{
        "id": "c-a", "name": "a", "state": "active", "driver": "k3s",
        "allocatable": {"cpu": "4", "memory": "8040912Ki", "pods": "220"},
        "requested": {"cpu": "200m", "memory": "140Mi", "pods": "14"}
    }"#;

    const CLUSTER_B: &str = r#"{
        "id": "c-b", "name": "b", "state": "active", "driver": "k3s",
        "allocatable": {"cpu": "8", "memory": "8040912Ki", "pods": "350"},
        "requested": {"cpu": "4000m", "memory": "471Mi", "pods": "70"}
    }"#;

    fn cluster_client(id: &str, namespaces: &str, services: &str) -> MockClient {
        MockClient::new(&format!("TEST_URL/clusters/{}", id))
            .with_list(kind::NAMESPACES, namespaces)
            .with_list(kind::API_SERVICES, services)
    }

    async fn collect(root: MockClient, factory: MockFactory) -> Option<ClusterStats> {
        let opts = CollectorOpts::new(root.into_arc(), Arc::new(factory));
        ClusterCollector
            .collect(&opts)
            .await
            .map(|value| serde_json::from_value(value).unwrap())
    }

    #[tokio::test]
    async fn test_single_cluster_rollup() {
        let root = MockClient::new("TEST_URL").with_list(kind::CLUSTERS, &format!("[{}]", CLUSTER_A));
        let factory = MockFactory::new().with_client(cluster_client(
            "c-a",
            r#"[{"id": "ns-1"}, {"id": "ns-2"}]"#,
            r#"[{"id": "svc-1"}]"#,
        ));

        let stats = collect(root, factory).await.unwrap();

        assert_eq!(stats.total, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(
            stats.cpu,
            CpuInfo { cores_min: 4, cores_max: 4, cores_total: 4, util_min: 5, util_avg: 5, util_max: 5 }
        );
        assert_eq!(
            stats.mem,
            MemoryInfo { mb_min: 7852, mb_max: 7852, mb_total: 7852, util_min: 2, util_avg: 2, util_max: 2 }
        );
        assert_eq!(
            stats.pod,
            PodInfo { pods_min: 220, pods_max: 220, pods_total: 220, util_min: 6, util_avg: 6, util_max: 6 }
        );
        assert_eq!(
            stats.namespace,
            NsInfo { min: 2, max: 2, total: 2, avg: 2, from_catalog: 0, no_project: 2 }
        );
        assert_eq!(stats.service, ServiceInfo { min: 1, max: 1, total: 1, avg: 1 });
    }

    #[tokio::test]
    async fn test_two_cluster_rollup() {
        let root = MockClient::new("TEST_URL")
            .with_list(kind::CLUSTERS, &format!("[{}, {}]", CLUSTER_A, CLUSTER_B));
        let factory = MockFactory::new()
            .with_client(cluster_client("c-a", r#"[{"id": "ns-1"}, {"id": "ns-2"}]"#, "[]"))
            .with_client(cluster_client("c-b", r#"[{"id": "ns-3"}]"#, "[]"));

        let stats = collect(root, factory).await.unwrap();

        assert_eq!(
            stats.cpu,
            CpuInfo { cores_min: 4, cores_max: 8, cores_total: 12, util_min: 5, util_avg: 28, util_max: 50 }
        );
        assert_eq!(
            stats.mem,
            MemoryInfo { mb_min: 7852, mb_max: 7852, mb_total: 15704, util_min: 2, util_avg: 4, util_max: 6 }
        );
        assert_eq!(
            stats.pod,
            PodInfo { pods_min: 220, pods_max: 350, pods_total: 570, util_min: 6, util_avg: 13, util_max: 20 }
        );
        assert_eq!(
            stats.namespace,
            NsInfo { min: 1, max: 2, total: 3, avg: 2, from_catalog: 0, no_project: 3 }
        );
        assert_eq!(stats.driver, LabelCount::from([("k3s", 2)]));
    }

    #[tokio::test]
    async fn test_cluster_without_capacity_is_counted_but_not_rolled_up() {
        let root = MockClient::new("TEST_URL").with_list(
            kind::CLUSTERS,
            &format!(r#"[{}, {{"id": "c-empty", "state": "active", "driver": "rke"}}]"#, CLUSTER_A),
        );

        let stats = collect(root, MockFactory::new()).await.unwrap();

        assert_eq!(stats.total, 2);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.cpu.cores_total, 4);
        assert_eq!(stats.cpu.util_avg, 5);
        assert_eq!(stats.pod.pods_min, 220);
        assert_eq!(stats.driver, LabelCount::from([("k3s", 1), ("rke", 1)]));
    }

    #[test_log::test(tokio::test)]
    async fn test_failing_cluster_client_only_drops_its_namespaces() {
        let root = MockClient::new("TEST_URL")
            .with_list(kind::CLUSTERS, &format!("[{}, {}]", CLUSTER_A, CLUSTER_B));
        let factory = MockFactory::new()
            .with_client(cluster_client(
                "c-a",
                r#"[{"id": "ns-1", "projectId": "c-a:p-1"}, {"id": "ns-2"}]"#,
                r#"[{"id": "svc-1"}, {"id": "svc-2"}]"#,
            ))
            .failing("TEST_URL/clusters/c-b");

        let stats = collect(root, factory).await.unwrap();

        assert_eq!(stats.total, 2);
        assert_eq!(
            stats.namespace,
            NsInfo { min: 2, max: 2, total: 2, avg: 2, from_catalog: 0, no_project: 1 }
        );
        assert_eq!(stats.service, ServiceInfo { min: 2, max: 2, total: 2, avg: 2 });
        assert_eq!(stats.cpu.cores_total, 12);
    }

    #[tokio::test]
    async fn test_cluster_list_failure_returns_none() {
        let root = MockClient::new("TEST_URL").failing_list(kind::CLUSTERS);
        assert_eq!(collect(root, MockFactory::new()).await, None);
    }

    #[tokio::test]
    async fn test_feature_counters() {
        let root = MockClient::new("TEST_URL")
            .with_list(
                kind::CLUSTERS,
                r#"[{
                    "id": "c-1", "driver": "rancherKubernetesEngine",
                    "windowsWorkerCount": 2, "linuxWorkerCount": 3,
                    "appliedEnableNetworkPolicy": true,
                    "enableClusterMonitoring": true,
                    "istioEnabled": true,
                    "rancherKubernetesEngineConfig": {"cloudProvider": {"name": "aws"}},
                    "scheduledClusterScan": {"enabled": true, "scanConfig": {"cisScanConfig": {"profile": "hardened"}}}
                }]"#,
            )
            .with_list(
                kind::CLUSTER_LOGGINGS,
                r#"[
                    {"appliedSpec": {"elasticsearchConfig": {"endpoint": "x"}}},
                    {"appliedSpec": {"kafkaConfig": {}}},
                    {"appliedSpec": null}
                ]"#,
            );

        let stats = collect(root, MockFactory::new()).await.unwrap();

        assert_eq!(stats.hybrid, 1);
        assert_eq!(stats.windows_worker, 2);
        assert_eq!(stats.linux_worker, 3);
        assert_eq!(stats.network_policy, 1);
        assert_eq!(stats.monitoring, 1);
        assert_eq!(stats.istio, 1);
        assert_eq!(stats.cis, 1);
        assert_eq!(stats.cis_profile_version, LabelCount::from([("hardened", 1)]));
        assert_eq!(stats.cloud_provider, LabelCount::from([("aws", 1)]));
        assert_eq!(stats.logging, LabelCount::from([("Elasticsearch", 1), ("Kafka", 1)]));
    }

    #[tokio::test]
    async fn test_k3s_embedded_detection() {
        let root = MockClient::new("TEST_URL")
            .with_list(kind::CLUSTERS, r#"[{"id": "local", "driver": "k3s", "internal": true}]"#)
            .with_list(
                kind::PROJECTS,
                r#"[
                    {"id": "local:p-default", "clusterId": "local"},
                    {"id": "local:p-system", "clusterId": "local",
                     "labels": {"authz.management.cattle.io/system-project": "true"}}
                ]"#,
            );

        let stats = collect(root, MockFactory::new()).await.unwrap();
        assert_eq!(stats.driver, LabelCount::from([("k3sBased", 1)]));
    }

    #[tokio::test]
    async fn test_k3s_hosting_management_workload_is_not_embedded() {
        let root = MockClient::new("TEST_URL")
            .with_list(kind::CLUSTERS, r#"[{"id": "local", "driver": "k3s", "internal": true}]"#)
            .with_list(
                kind::PROJECTS,
                r#"[{"id": "local:p-system", "clusterId": "local",
                     "labels": {"authz.management.cattle.io/system-project": "true"}}]"#,
            );
        let factory = MockFactory::new().with_client(
            MockClient::new("TEST_URL/projects/local:p-system").with_list(
                kind::WORKLOADS,
                r#"[{"id": "deployment:cattle-system:rancher", "name": "rancher", "namespaceId": "cattle-system"}]"#,
            ),
        );

        let stats = collect(root, factory).await.unwrap();
        assert_eq!(stats.driver, LabelCount::from([("k3s", 1)]));
    }
}
