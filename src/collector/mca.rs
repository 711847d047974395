use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use super::app::{count_template, rancher_catalogs, RancherCatalogs};
use super::stats::{average, min_but_not_zero};
use super::{to_value, Collector, CollectorOpts};
use crate::management::types::{MultiClusterApp, TemplateVersion};
use crate::management::{by_id_as, kind, list_as, ListOpts, ResourceClient};

pub const RECORD_KEY: &str = "mca";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiClusterAppStats {
    pub total: i64,
    pub active: i64,
    pub target_min: i64,
    pub target_max: i64,
    pub target_avg: f64,
    pub target_total: i64,
    pub dns_providers: i64,
    pub dns_entries: i64,
    #[serde(rename = "rancheCatalogs")]
    pub catalogs: RancherCatalogs,
}

/// Multi-cluster apps, their targets and the global DNS objects serving
/// them.
pub struct MultiClusterAppCollector;

#[async_trait]
impl Collector for MultiClusterAppCollector {
    fn record_key(&self) -> &'static str {
        RECORD_KEY
    }

    async fn collect(&self, opts: &CollectorOpts) -> Option<Value> {
        debug!("Collecting MultiClusterApps");
        let client = opts.client();
        let non_removed = ListOpts::non_removed();
        let mut out = MultiClusterAppStats::default();

        match list_as::<MultiClusterApp>(client, kind::MULTI_CLUSTER_APPS, &non_removed).await {
            Ok(apps) => {
                debug!("  Found {} MultiClusterApps", apps.len());
                out.catalogs = rancher_catalogs(client).await.ok()?;

                let mut target_counts = Vec::with_capacity(apps.len());
                for app in &apps {
                    out.total += 1;
                    if app.state == "active" {
                        out.active += 1;
                    }

                    let targets = app.targets.len() as i64;
                    out.target_total += targets;
                    out.target_min = min_but_not_zero(out.target_min, targets);
                    out.target_max = out.target_max.max(targets);
                    target_counts.push(targets as f64);

                    match by_id_as::<TemplateVersion>(client, kind::TEMPLATE_VERSIONS, &app.template_version_id).await {
                        Ok(version) => {
                            count_template(&mut out.catalogs, &version.external_id);
                        }
                        Err(e) => debug!("    templateVersion {} err={}", app.template_version_id, e),
                    }
                }
                out.target_avg = average(&target_counts);
            }
            Err(e) => error!("Failed to get MultiClusterApps err={}", e),
        }

        // global DNS only exists with a management cluster
        debug!("  Collecting DNS Providers");
        out.dns_providers = count_or_zero(client, kind::GLOBAL_DNS_PROVIDERS).await;
        debug!("  Collecting DNS Entries");
        out.dns_entries = count_or_zero(client, kind::GLOBAL_DNSES).await;

        to_value(RECORD_KEY, &out)
    }
}

async fn count_or_zero(client: &dyn ResourceClient, kind: &str) -> i64 {
    match client.list(kind, &ListOpts::non_removed()).await {
        Ok(items) => {
            debug!("    Found {} {}", items.len(), kind);
            items.len() as i64
        }
        Err(e) => {
            debug!("    No {} err={}", kind, e);
            0
        }
    }
}
