use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use super::project::split_external_id;
use super::stats::LabelCount;
use super::{to_value, Collector, CollectorOpts};
use crate::management::types::{App, Catalog, Project};
use crate::management::{by_id_as, kind, list_as, ApiResult, ListOpts, ResourceClient};

pub const RECORD_KEY: &str = "app";

/// Catalogs shipped with the management server.
pub const RANCHER_CATALOGS: [&str; 2] = ["library", "system-library"];

const DISABLED_CATALOG: &str = "disabled";

/// Deployments out of one catalog: template to version counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogApps {
    pub state: String,
    pub apps: BTreeMap<String, LabelCount>,
}

pub type RancherCatalogs = BTreeMap<String, CatalogApps>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStats {
    pub total: i64,
    pub active: i64,
    #[serde(rename = "rancheCatalogs")]
    pub catalogs: RancherCatalogs,
}

/// State of catalog `id`, or `"disabled"` when it does not exist.
pub async fn catalog_state(client: &dyn ResourceClient, id: &str) -> ApiResult<String> {
    match by_id_as::<Catalog>(client, kind::CATALOGS, id).await {
        Ok(catalog) => Ok(catalog.state),
        Err(e) if e.is_not_found() => Ok(DISABLED_CATALOG.to_string()),
        Err(e) => Err(e),
    }
}

/// An empty entry for every Rancher catalog, carrying its state.
pub async fn rancher_catalogs(client: &dyn ResourceClient) -> ApiResult<RancherCatalogs> {
    let mut out = RancherCatalogs::new();
    for catalog in RANCHER_CATALOGS {
        let state = catalog_state(client, catalog).await.map_err(|e| {
            error!("Failed to get Catalog ID {} err={}", catalog, e);
            e
        })?;
        out.insert(
            catalog.to_string(),
            CatalogApps {
                state,
                apps: BTreeMap::new(),
            },
        );
    }
    Ok(out)
}

/// Counts the template version behind `external_id` when it comes from one
/// of `catalogs`. Returns whether it was counted.
pub fn count_template(catalogs: &mut RancherCatalogs, external_id: &str) -> bool {
    let id = match split_external_id(external_id) {
        Ok(id) if id.is_complete() => id,
        _ => {
            error!("Failed to split App External ID {}", external_id);
            return false;
        }
    };

    match catalogs.get_mut(&id.scoped_catalog) {
        Some(catalog) => {
            catalog.apps.entry(id.template).or_default().increment(&id.version);
            true
        }
        None => false,
    }
}

/// Apps deployed from the Rancher catalogs across all projects.
pub struct AppCollector;

#[async_trait]
impl Collector for AppCollector {
    fn record_key(&self) -> &'static str {
        RECORD_KEY
    }

    async fn collect(&self, opts: &CollectorOpts) -> Option<Value> {
        debug!("Collecting Apps");
        let client = opts.client();

        let mut out = AppStats {
            catalogs: rancher_catalogs(client).await.ok()?,
            ..Default::default()
        };

        debug!("  Collecting Projects");
        let all = ListOpts::non_removed().filter("all", "true");
        let projects = match list_as::<Project>(client, kind::PROJECTS, &all).await {
            Ok(projects) => projects,
            Err(e) => {
                error!("Failed to get Projects err={}", e);
                return None;
            }
        };
        debug!("  Found {} Projects", projects.len());

        for project in &projects {
            let project_client = match opts.cache.project_client(&project.id).await {
                Ok(client) => client,
                Err(e) => {
                    error!("Failed to get project client ID {} err={}", project.id, e);
                    continue;
                }
            };

            let apps = match list_as::<App>(project_client.as_ref(), kind::APPS, &ListOpts::non_removed()).await {
                Ok(apps) => apps,
                Err(e) => {
                    error!("Failed to get Apps for project {} err={}", project.id, e);
                    continue;
                }
            };
            debug!("  Found {} Apps", apps.len());

            for app in &apps {
                if !count_template(&mut out.catalogs, &app.external_id) {
                    continue;
                }
                out.total += 1;
                if app.state == "active" {
                    out.active += 1;
                }
            }
        }

        to_value(RECORD_KEY, &out)
    }
}
