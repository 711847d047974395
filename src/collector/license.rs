use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};

use super::{settings, to_value, Collector, CollectorOpts};
use crate::management::{kind, list_as, ListOpts};
use crate::management::types::Cluster;

pub const RECORD_KEY: &str = "license";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct License {
    pub key: String,
    pub installation_uid: String,
    pub telemetry_uid: String,
    pub running_nodes: i64,
}

/// License key, identities and the number of nodes running outside the
/// local cluster.
pub struct LicenseCollector;

#[async_trait]
impl Collector for LicenseCollector {
    fn record_key(&self) -> &'static str {
        RECORD_KEY
    }

    async fn collect(&self, opts: &CollectorOpts) -> Option<Value> {
        debug!("Collecting License");
        let client = opts.client();

        debug!("  Getting key");
        let key = settings::license_key(client).await?;

        debug!("  Getting Installation uid");
        let installation_uid = settings::installation_uid(client).await?;

        let telemetry_uid = if settings::is_telemetry_enabled(client).await {
            debug!("  Getting Telemetry uid");
            settings::telemetry_uid(client).await.unwrap_or_else(|e| {
                error!("  Failed to get telemetry uid err={}", e);
                String::new()
            })
        } else {
            "disabled".to_string()
        };

        debug!("  Getting Local cluster");
        let local = ListOpts::non_removed().filter("internal", true);
        let local_cluster_id = match list_as::<Cluster>(client, kind::CLUSTERS, &local).await {
            Ok(clusters) if clusters.len() == 1 => {
                debug!("    Local cluster found");
                clusters[0].id.clone()
            }
            Ok(_) => {
                debug!("    Local cluster NOT found");
                String::new()
            }
            Err(e) => {
                error!("    Failed to get Local Cluster err={}", e);
                String::new()
            }
        };

        debug!("  Getting Nodes");
        let filter = ListOpts::non_removed().filter("clusterId_ne", &local_cluster_id);
        let nodes = match client.list(kind::NODES, &filter).await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!("    Failed collect running nodes info err={}", e);
                return None;
            }
        };
        debug!("    Found {} Nodes", nodes.len());

        let license = License {
            key,
            installation_uid,
            telemetry_uid,
            running_nodes: nodes.len() as i64,
        };
        to_value(RECORD_KEY, &license)
    }
}
