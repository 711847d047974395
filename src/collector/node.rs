use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use super::stats::{CpuInfo, LabelCount, MemoryInfo, PodInfo, UtilizationRollup};
use super::{to_value, Collector, CollectorOpts};
use crate::management::types::{Node, NodeTemplate};
use crate::management::{by_id_as, kind, list_as, ListOpts};

pub const RECORD_KEY: &str = "node";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStats {
    pub active: i64,
    pub imported: i64,
    pub from_template: i64,
    pub total: i64,
    pub cpu: CpuInfo,
    pub mem: MemoryInfo,
    pub pod: PodInfo,
    pub kernel: LabelCount,
    pub kubelet: LabelCount,
    pub kubeproxy: LabelCount,
    pub os: LabelCount,
    pub docker: LabelCount,
    pub driver: LabelCount,
    pub role: LabelCount,
}

pub struct NodeCollector;

#[async_trait]
impl Collector for NodeCollector {
    fn record_key(&self) -> &'static str {
        RECORD_KEY
    }

    async fn collect(&self, opts: &CollectorOpts) -> Option<Value> {
        debug!("Collecting Nodes");
        let client = opts.client();

        let nodes = match list_as::<Node>(client, kind::NODES, &ListOpts::non_removed()).await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!("Failed to get Nodes err={}", e);
                return None;
            }
        };
        debug!("  Found {} Nodes", nodes.len());

        let mut out = NodeStats::default();
        let mut rollup = UtilizationRollup::new();

        for node in &nodes {
            debug!("  Node: {}", node.display_name());

            out.total += 1;
            if node.state == "active" {
                out.active += 1;
            }
            if node.imported {
                out.imported += 1;
            }

            if !rollup.observe(&node.allocatable, &node.requested) {
                debug!("  Skipping Node with no resources: {}", node.display_name());
                continue;
            }

            let os = &node.info.os;
            out.kernel.increment(&os.kernel_version);
            out.os.increment(&os.operating_system);
            out.docker.increment(&os.docker_version);

            let kube = &node.info.kubernetes;
            out.kubelet.increment(&kube.kubelet_version);
            out.kubeproxy.increment(&kube.kube_proxy_version);

            for (has_role, role) in [
                (node.control_plane, "controlplane"),
                (node.etcd, "etcd"),
                (node.worker, "worker"),
            ] {
                if has_role {
                    out.role.increment(role);
                }
            }

            if node.node_template_id.is_empty() {
                continue;
            }
            match by_id_as::<NodeTemplate>(client, kind::NODE_TEMPLATES, &node.node_template_id).await {
                Ok(template) => {
                    out.from_template += 1;
                    out.driver.increment(&template.driver);
                }
                Err(e) if e.is_not_found() => {
                    debug!("    nodeTemplate not found [{}]", node.node_template_id)
                }
                Err(e) => error!("Failed to get nodeTemplate [{}] err={}", node.node_template_id, e),
            }
        }

        let (cpu, mem, pod) = rollup.finish();
        out.cpu = cpu;
        out.mem = mem;
        out.pod = pod;

        to_value(RECORD_KEY, &out)
    }
}
