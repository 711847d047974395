//! In-memory management API fed from JSON fixtures.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{ApiError, ApiResult, ClientFactory, ClientOpts, ListOpts, ResourceClient};

const PASS_THROUGH_FILTERS: [&str; 3] = ["state_ne", "limit", "all"];

pub struct MockClient {
    opts: ClientOpts,
    lists: HashMap<String, Vec<Value>>,
    failing_lists: HashSet<String>,
    items: Mutex<HashMap<String, Value>>,
    failing_by_id: HashSet<String>,
    failing_writes: bool,
}

impl MockClient {
    pub fn new(url: &str) -> Self {
        Self {
            opts: ClientOpts::new(url, "test"),
            lists: HashMap::new(),
            failing_lists: HashSet::new(),
            items: Mutex::new(HashMap::new()),
            failing_by_id: HashSet::new(),
            failing_writes: false,
        }
    }

    pub fn with_list(mut self, kind: &str, json: &str) -> Self {
        let items: Vec<Value> = serde_json::from_str(json).expect("fixture must be a JSON array");
        self.lists.insert(kind.to_string(), items);
        self
    }

    pub fn failing_list(mut self, kind: &str) -> Self {
        self.failing_lists.insert(kind.to_string());
        self
    }

    pub fn with_item(self, kind: &str, id: &str, json: &str) -> Self {
        let item: Value = serde_json::from_str(json).expect("fixture must be JSON");
        self.items.lock().insert(format!("{}/{}", kind, id), item);
        self
    }

    pub fn with_setting(self, name: &str, value: &str) -> Self {
        let json = serde_json::json!({"id": name, "name": name, "value": value}).to_string();
        self.with_item(super::kind::SETTINGS, name, &json)
    }

    pub fn failing_by_id(mut self, kind: &str) -> Self {
        self.failing_by_id.insert(kind.to_string());
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.failing_writes = true;
        self
    }

    pub fn item(&self, kind: &str, id: &str) -> Option<Value> {
        self.items.lock().get(&format!("{}/{}", kind, id)).cloned()
    }

    pub fn into_arc(self) -> Arc<dyn ResourceClient> {
        Arc::new(self)
    }
}

fn field_as_string(item: &Value, key: &str) -> String {
    match item.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn matches(item: &Value, opts: &ListOpts) -> bool {
    opts.filters
        .iter()
        .filter(|(key, _)| !PASS_THROUGH_FILTERS.contains(&key.as_str()))
        .all(|(key, want)| match key.strip_suffix("_ne") {
            Some(field) => &field_as_string(item, field) != want,
            None => &field_as_string(item, key) == want,
        })
}

#[async_trait]
impl ResourceClient for MockClient {
    fn opts(&self) -> &ClientOpts {
        &self.opts
    }

    async fn list(&self, kind: &str, opts: &ListOpts) -> ApiResult<Vec<Value>> {
        if self.failing_lists.contains(kind) {
            return Err(ApiError::Other(format!("[ERROR] {} ListAll Fail", kind)));
        }

        Ok(self
            .lists
            .get(kind)
            .map(|items| items.iter().filter(|i| matches(i, opts)).cloned().collect())
            .unwrap_or_default())
    }

    async fn by_id(&self, kind: &str, id: &str) -> ApiResult<Value> {
        if self.failing_by_id.contains(kind) {
            return Err(ApiError::Other(format!("[ERROR] {} ByID Fail", kind)));
        }

        self.item(kind, id).ok_or_else(|| ApiError::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        })
    }

    async fn create(&self, kind: &str, body: &Value) -> ApiResult<Value> {
        if self.failing_writes {
            return Err(ApiError::Other(format!("[ERROR] {} Create Fail", kind)));
        }
        let id = field_as_string(body, "name");
        self.items.lock().insert(format!("{}/{}", kind, id), body.clone());
        Ok(body.clone())
    }

    async fn update(&self, kind: &str, id: &str, body: &Value) -> ApiResult<Value> {
        if self.failing_writes {
            return Err(ApiError::Other(format!("[ERROR] {} Update Fail", kind)));
        }
        let key = format!("{}/{}", kind, id);
        let mut items = self.items.lock();
        let entry = items.entry(key).or_insert_with(|| serde_json::json!({}));
        if let (Value::Object(current), Value::Object(patch)) = (entry, body) {
            for (k, v) in patch {
                current.insert(k.clone(), v.clone());
            }
        }
        Ok(body.clone())
    }
}

/// Hands out pre-registered scoped clients by URL; unknown URLs get an
/// empty client, URLs marked failing get a connection error.
#[derive(Default)]
pub struct MockFactory {
    clients: HashMap<String, Arc<dyn ResourceClient>>,
    failing: HashSet<String>,
    connects: AtomicUsize,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, client: MockClient) -> Self {
        self.clients.insert(client.opts.url.clone(), Arc::new(client));
        self
    }

    pub fn failing(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientFactory for MockFactory {
    async fn connect(&self, opts: ClientOpts) -> ApiResult<Arc<dyn ResourceClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&opts.url) {
            return Err(ApiError::Other("ERROR: connection refused".to_string()));
        }

        Ok(self
            .clients
            .get(&opts.url)
            .cloned()
            .unwrap_or_else(|| Arc::new(MockClient::new(&opts.url))))
    }
}
