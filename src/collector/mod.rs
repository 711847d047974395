//! Collection passes over the management API.
//!
//! A [`CollectorRegistry`] holds the collectors in registration order. Each
//! pass builds fresh [`CollectorOpts`] (and with them a fresh client cache),
//! evaluates the telemetry and license gates, then folds every collector's
//! value into the installation or license record under its key.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::management::{ClientFactory, ResourceClient};
use crate::metrics;

pub mod app;
pub mod cache;
pub mod cluster;
pub mod clustertemplate;
pub mod installation;
pub mod license;
pub mod mca;
pub mod node;
pub mod project;
pub mod settings;
pub mod stats;
pub mod units;

pub use cache::ClientCache;

/// Schema version written into every record as `r_version`.
pub const RECORD_VERSION: i64 = 2;

/// Key of the collector whose value goes into the license record.
pub const LICENSE_KEY: &str = license::RECORD_KEY;

/// One collection pass output: collector key to collected value.
pub type Record = Map<String, Value>;

pub fn new_record() -> Record {
    let mut record = Record::new();
    record.insert("r_version".to_string(), Value::from(RECORD_VERSION));
    record.insert("ts".to_string(), Value::from(chrono::Utc::now().to_rfc3339()));
    record
}

/// Shared inputs of one collection pass.
pub struct CollectorOpts {
    pub client: Arc<dyn ResourceClient>,
    pub cache: ClientCache,
}

impl CollectorOpts {
    pub fn new(client: Arc<dyn ResourceClient>, factory: Arc<dyn ClientFactory>) -> Self {
        let cache = ClientCache::new(client.opts().clone(), factory);
        Self { client, cache }
    }

    pub fn client(&self) -> &dyn ResourceClient {
        self.client.as_ref()
    }
}

#[async_trait]
pub trait Collector: Send + Sync {
    fn record_key(&self) -> &'static str;

    /// `None` means nothing could be collected this pass.
    async fn collect(&self, opts: &CollectorOpts) -> Option<Value>;
}

/// Serializes a collector's result, logging instead of failing the pass.
pub(crate) fn to_value<T: Serialize>(key: &str, value: &T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(value) => Some(value),
        Err(e) => {
            error!("Failed to serialize {} err={}", key, e);
            None
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectedRecords {
    pub installation: Option<Record>,
    pub license: Option<Record>,
}

#[derive(Default)]
pub struct CollectorRegistry {
    collectors: Vec<Box<dyn Collector>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// License first, so a licensed installation without telemetry can stop
    /// right after it.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(license::LicenseCollector);
        registry.register(installation::InstallationCollector);
        registry.register(cluster::ClusterCollector);
        registry.register(node::NodeCollector);
        registry.register(project::ProjectCollector);
        registry.register(app::AppCollector);
        registry.register(clustertemplate::ClusterTemplateCollector);
        registry.register(mca::MultiClusterAppCollector);
        registry
    }

    pub fn register(&mut self, collector: impl Collector + 'static) {
        self.collectors.push(Box::new(collector));
    }

    pub fn keys(&self) -> Vec<&'static str> {
        self.collectors.iter().map(|c| c.record_key()).collect()
    }

    pub async fn run(&self, opts: &CollectorOpts) -> CollectedRecords {
        let start = Instant::now();
        let telemetry = settings::is_telemetry_enabled(opts.client()).await;
        let licensed = settings::is_licensed(opts.client()).await;
        debug!("Collection gates telemetry={} licensed={}", telemetry, licensed);

        let mut out = CollectedRecords {
            installation: telemetry.then(new_record),
            license: licensed.then(new_record),
        };

        if !telemetry && !licensed {
            info!("Telemetry disabled and no license, nothing to collect");
            return out;
        }

        for collector in &self.collectors {
            let key = collector.record_key();

            if key == LICENSE_KEY {
                if let Some(record) = out.license.as_mut() {
                    record.insert(key.to_string(), collect_one(collector.as_ref(), opts).await);
                }
                if !telemetry {
                    debug!("Telemetry disabled, stopping after {}", key);
                    break;
                }
                continue;
            }

            if let Some(record) = out.installation.as_mut() {
                record.insert(key.to_string(), collect_one(collector.as_ref(), opts).await);
            }
        }

        metrics::record_collection_pass(start.elapsed().as_secs_f64());
        debug!("Collection pass finished in {:?}", start.elapsed());
        out
    }
}

async fn collect_one(collector: &dyn Collector, opts: &CollectorOpts) -> Value {
    let key = collector.record_key();
    match collector.collect(opts).await {
        Some(value) => value,
        None => {
            metrics::record_collector_failure(key);
            Value::Null
        }
    }
}
