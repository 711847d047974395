//! Per-pass cache of cluster and project scoped clients.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::management::{ApiResult, ClientFactory, ClientOpts, ResourceClient};

type Slot = Arc<OnceCell<Arc<dyn ResourceClient>>>;

/// Constructs each sub-scoped client at most once per id. Concurrent first
/// requests for the same id wait on the same construction; a failed
/// construction leaves the slot empty so the next request retries.
pub struct ClientCache {
    base: ClientOpts,
    factory: Arc<dyn ClientFactory>,
    clusters: Mutex<HashMap<String, Slot>>,
    projects: Mutex<HashMap<String, Slot>>,
}

impl ClientCache {
    pub fn new(base: ClientOpts, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            base,
            factory,
            clusters: Mutex::new(HashMap::new()),
            projects: Mutex::new(HashMap::new()),
        }
    }

    pub async fn cluster_client(&self, cluster_id: &str) -> ApiResult<Arc<dyn ResourceClient>> {
        self.get_or_connect(&self.clusters, "clusters", cluster_id).await
    }

    pub async fn project_client(&self, project_id: &str) -> ApiResult<Arc<dyn ResourceClient>> {
        self.get_or_connect(&self.projects, "projects", project_id).await
    }

    async fn get_or_connect(
        &self,
        slots: &Mutex<HashMap<String, Slot>>,
        collection: &str,
        id: &str,
    ) -> ApiResult<Arc<dyn ResourceClient>> {
        let slot = slots.lock().entry(id.to_string()).or_default().clone();

        let client = slot
            .get_or_try_init(|| async {
                let opts = self.base.scoped(collection, id);
                debug!("Creating {} client for {}", collection, opts.url);
                self.factory.connect(opts).await
            })
            .await?;

        Ok(client.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::management::mock::{MockClient, MockFactory};

    fn cache(factory: MockFactory) -> (ClientCache, Arc<MockFactory>) {
        let factory = Arc::new(factory);
        let cache = ClientCache::new(ClientOpts::new("TEST_URL", "test"), factory.clone());
        (cache, factory)
    }

    #[tokio::test]
    async fn test_cluster_client_is_scoped_and_reused() {
        let (cache, factory) = cache(MockFactory::new());

        let first = cache.cluster_client("ID_1").await.unwrap();
        assert_eq!(first.opts().url, "TEST_URL/clusters/ID_1");

        let second = cache.cluster_client("ID_1").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.connects(), 1);
    }

    #[tokio::test]
    async fn test_project_client_is_scoped() {
        let (cache, _) = cache(MockFactory::new().with_client(MockClient::new("TEST_URL/projects/c-1:p-1")));

        let client = cache.project_client("c-1:p-1").await.unwrap();
        assert_eq!(client.opts().url, "TEST_URL/projects/c-1:p-1");
    }

    #[tokio::test]
    async fn test_failed_construction_is_not_cached() {
        let (cache, factory) = cache(MockFactory::new().failing("TEST_URL/clusters/down"));

        let err = cache.cluster_client("down").await.err().unwrap();
        assert_eq!(err.to_string(), "ERROR: connection refused");
        assert!(cache.cluster_client("down").await.is_err());
        assert_eq!(factory.connects(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_first_access_connects_once() {
        let (cache, factory) = cache(MockFactory::new());
        let cache = Arc::new(cache);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.cluster_client("shared").await.map(|_| ()) })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(factory.connects(), 1);
    }
}
