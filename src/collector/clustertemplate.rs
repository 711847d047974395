use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use super::settings::CLUSTER_TEMPLATE_ENFORCEMENT_SETTING;
use super::{to_value, Collector, CollectorOpts};
use crate::management::types::Setting;
use crate::management::{by_id_as, kind, ListOpts};

pub const RECORD_KEY: &str = "clustertemplate";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTemplateStats {
    pub total: i64,
    pub revisions: i64,
    pub enforcement: String,
}

pub struct ClusterTemplateCollector;

#[async_trait]
impl Collector for ClusterTemplateCollector {
    fn record_key(&self) -> &'static str {
        RECORD_KEY
    }

    async fn collect(&self, opts: &CollectorOpts) -> Option<Value> {
        debug!("Collecting Cluster Templates");
        let client = opts.client();
        let non_removed = ListOpts::non_removed();

        let total = match client.list(kind::CLUSTER_TEMPLATES, &non_removed).await {
            Ok(templates) => templates.len() as i64,
            Err(e) => {
                error!("Failed to get Cluster Templates err={}", e);
                return None;
            }
        };

        let revisions = match client.list(kind::CLUSTER_TEMPLATE_REVISIONS, &non_removed).await {
            Ok(revisions) => revisions.len() as i64,
            Err(e) => {
                error!("Failed to get Cluster Template Revisions err={}", e);
                return None;
            }
        };

        let setting = match by_id_as::<Setting>(client, kind::SETTINGS, CLUSTER_TEMPLATE_ENFORCEMENT_SETTING).await {
            Ok(setting) => setting,
            Err(e) => {
                error!("Failed to get setting {} err={}", CLUSTER_TEMPLATE_ENFORCEMENT_SETTING, e);
                return None;
            }
        };
        debug!("  Found {} templates with {} revisions", total, revisions);

        let stats = ClusterTemplateStats {
            total,
            revisions,
            enforcement: setting.effective().to_string(),
        };
        to_value(RECORD_KEY, &stats)
    }
}
