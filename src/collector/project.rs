use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};
use url::Url;

use super::stats::{HpaInfo, LabelCount, NsInfo, PodData, WorkloadInfo};
use super::{to_value, Collector, CollectorOpts};
use crate::management::types::{App, Catalog, Namespace, Project, SourceCodeProvider};
use crate::management::{by_id_as, kind, list_as, ApiResult, ListOpts, ResourceClient};

pub const RECORD_KEY: &str = "project";

const ORCHESTRATION_NAME: &str = "cattle-V2.0";
const LIBRARY_CATALOG: &str = "library";
const LIBRARY_CATALOG_URL: &str = "https://git.rancher.io/charts";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineInfo {
    /// 1 when any source code provider is reachable.
    pub enabled: i64,
    pub source: LabelCount,
    pub total: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectStats {
    pub total: i64,
    pub namespace: NsInfo,
    pub workload: WorkloadInfo,
    pub pipeline: PipelineInfo,
    pub charts: LabelCount,
    pub hpa: HpaInfo,
    pub pod: PodData,
    pub orch: LabelCount,
}

/// Parsed `catalog://?catalog=<ns>/<name>&type=<type>&template=<name>&version=<v>` id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalId {
    /// Catalog name without its namespace.
    pub catalog: String,
    /// Catalog as apps are grouped by it: cluster and project catalogs
    /// become `<scope>:<name>`, global ones stay as given.
    pub scoped_catalog: String,
    pub catalog_type: String,
    pub template: String,
    pub version: String,
}

impl ExternalId {
    /// Catalog, template and version are all present.
    pub fn is_complete(&self) -> bool {
        !self.scoped_catalog.is_empty() && !self.template.is_empty() && !self.version.is_empty()
    }
}

pub fn split_external_id(external_id: &str) -> Result<ExternalId, url::ParseError> {
    let url = Url::parse(external_id)?;
    let query = |key: &str| {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default()
    };

    let catalog_with_namespace = query("catalog");
    let catalog_type = query("type");
    // Global catalogs created before namespacing carry no namespace prefix.
    let catalog = match catalog_with_namespace.split_once('/') {
        Some((namespace, name)) if !namespace.is_empty() => name.to_string(),
        _ => catalog_with_namespace.clone(),
    };
    let scoped_catalog = match catalog_type.as_str() {
        "clusterCatalog" | "projectCatalog" => catalog_with_namespace.replace('/', ":"),
        _ => catalog_with_namespace,
    };

    Ok(ExternalId {
        catalog,
        scoped_catalog,
        catalog_type,
        template: query("template"),
        version: query("version"),
    })
}

pub struct ProjectCollector;

#[async_trait]
impl Collector for ProjectCollector {
    fn record_key(&self) -> &'static str {
        RECORD_KEY
    }

    async fn collect(&self, opts: &CollectorOpts) -> Option<Value> {
        debug!("Collecting Projects");
        let client = opts.client();
        let non_removed = ListOpts::non_removed();

        let all = ListOpts::non_removed().filter("all", "true");
        let projects = match list_as::<Project>(client, kind::PROJECTS, &all).await {
            Ok(projects) => projects,
            Err(e) => {
                error!("Failed to get Projects err={}", e);
                return None;
            }
        };
        let total = projects.len() as i64;
        debug!("  Found {} Projects", total);

        let mut out = ProjectStats {
            total,
            ..Default::default()
        };
        out.orch.add(ORCHESTRATION_NAME, total);

        let mut ns_counts = Vec::new();
        let mut workload_counts = Vec::new();
        let mut hpa_counts = Vec::new();
        let mut pod_counts = Vec::new();

        let library = library_catalog(client).await.unwrap_or_else(|e| {
            warn!("Failed to get the library catalog err={}", e);
            None
        });
        let mut charts_seen = HashSet::new();

        for project in &projects {
            let parts: Vec<&str> = project.id.splitn(2, ':').collect();
            let cluster_id = parts[0];

            match opts.cache.cluster_client(cluster_id).await {
                Ok(cluster_client) => {
                    debug!("  Collecting namespaces");
                    let filter = ListOpts::non_removed().filter("projectId", &project.id);
                    match list_as::<Namespace>(cluster_client.as_ref(), kind::NAMESPACES, &filter).await {
                        Ok(namespaces) => {
                            let count = namespaces.len() as i64;
                            out.namespace.update(count);
                            ns_counts.push(count as f64);
                            out.namespace
                                .update_details(namespaces.iter().map(|ns| ns.project_id.as_str()));
                            debug!("    Found {} namespaces", count);
                        }
                        Err(e) => {
                            error!("Failed to get Namespaces for project {} err={}", project.id, e)
                        }
                    }
                }
                Err(e) => error!("Failed to get cluster client ID {} err={}", cluster_id, e),
            }

            let project_client = match opts.cache.project_client(&project.id).await {
                Ok(client) => client,
                Err(e) => {
                    error!("Failed to get project client ID {} err={}", project.id, e);
                    continue;
                }
            };
            let project_client = project_client.as_ref();

            if let Some(count) = count(project_client, kind::WORKLOADS, &project.id).await {
                out.workload.update(count);
                workload_counts.push(count as f64);
            }

            if let Some(count) = count(project_client, kind::PIPELINES, &project.id).await {
                out.pipeline.total += count;
            }

            match list_as::<SourceCodeProvider>(project_client, kind::SOURCE_CODE_PROVIDERS, &non_removed)
                .await
            {
                Ok(providers) => {
                    out.pipeline.enabled = 1;
                    for provider in &providers {
                        out.pipeline.source.increment(&provider.kind);
                    }
                }
                Err(e) => error!(
                    "Failed to get SourceCodeProvider for project {} err={}",
                    project.id, e
                ),
            }

            if let Some(count) = count(project_client, kind::HPAS, &project.id).await {
                out.hpa.update(count);
                hpa_counts.push(count as f64);
            }

            if let Some(count) = count(project_client, kind::PODS, &project.id).await {
                out.pod.update(count);
                pod_counts.push(count as f64);
            }

            let Some(library) = library.as_ref().filter(|_| parts.len() == 2) else {
                continue;
            };

            debug!("  Collecting Apps");
            let apps = match list_as::<App>(project_client, kind::APPS, &non_removed).await {
                Ok(apps) => apps,
                Err(e) => {
                    error!("Failed to get Apps for project {} err={}", project.id, e);
                    continue;
                }
            };

            for app in &apps {
                let id = match split_external_id(&app.external_id) {
                    Ok(id) => id,
                    Err(_) => {
                        debug!("Could not parse ExternalID {}", app.external_id);
                        continue;
                    }
                };
                let is_library_chart = id.catalog == library.name
                    && id.catalog_type != "clusterCatalog"
                    && id.catalog_type != "projectCatalog";
                // each chart is counted once per cluster
                if is_library_chart && charts_seen.insert(format!("{}:{}", cluster_id, id.template)) {
                    out.charts.increment(&id.template);
                }
            }
            debug!("    Found {} Apps", apps.len());
        }

        out.namespace.update_avg(&ns_counts);
        out.workload.update_avg(&workload_counts);
        out.hpa.update_avg(&hpa_counts);
        out.pod.update_avg(&pod_counts);

        to_value(RECORD_KEY, &out)
    }
}

/// The default library catalog, or `None` when it is absent or points
/// somewhere else.
async fn library_catalog(client: &dyn ResourceClient) -> ApiResult<Option<Catalog>> {
    match by_id_as::<Catalog>(client, kind::CATALOGS, LIBRARY_CATALOG).await {
        Ok(catalog) if catalog.url == LIBRARY_CATALOG_URL => Ok(Some(catalog)),
        Ok(catalog) => {
            debug!("  Library catalog points at {}, not counting charts", catalog.url);
            Ok(None)
        }
        Err(e) if e.is_not_found() => {
            debug!("  No library catalog");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

async fn count(client: &dyn ResourceClient, kind: &str, project_id: &str) -> Option<i64> {
    debug!("  Collecting {}", kind);
    match client.list(kind, &ListOpts::non_removed()).await {
        Ok(items) => {
            debug!("    Found {} {}", items.len(), kind);
            Some(items.len() as i64)
        }
        Err(e) => {
            error!("Failed to get {} for project {} err={}", kind, project_id, e);
            None
        }
    }
}
