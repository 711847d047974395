use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{ApiError, ApiResult, ClientFactory, ClientOpts, ListOpts, ResourceClient};

/// Upper bound on followed `pagination.next` links for one list call.
const MAX_PAGES: usize = 1000;

#[derive(Debug, Deserialize)]
struct Collection {
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    next: Option<String>,
}

/// HTTP client for one API root.
pub struct RestClient {
    opts: ClientOpts,
    http: reqwest::Client,
}

impl RestClient {
    pub fn new(opts: ClientOpts) -> ApiResult<Self> {
        let mut builder = reqwest::Client::builder().timeout(opts.timeout);
        if let Some(pem) = &opts.ca_cert {
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(pem.as_bytes())?);
        }

        Ok(Self {
            http: builder.build()?,
            opts,
        })
    }

    fn collection_url(&self, kind: &str) -> String {
        format!("{}/{}", self.opts.url, kind)
    }

    fn item_url(&self, kind: &str, id: &str) -> ApiResult<String> {
        let mut url = url::Url::parse(&self.collection_url(kind))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::Other(format!("cannot extend URL {}", self.opts.url)))?
            .push(id);
        Ok(url.to_string())
    }

    async fn send(&self, request: RequestBuilder, kind: &str, id: &str) -> ApiResult<Value> {
        let response = request.bearer_auth(&self.opts.token_key).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound {
                kind: kind.to_string(),
                id: id.to_string(),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<Value>().await?)
    }
}

#[async_trait]
impl ResourceClient for RestClient {
    fn opts(&self) -> &ClientOpts {
        &self.opts
    }

    async fn list(&self, kind: &str, opts: &ListOpts) -> ApiResult<Vec<Value>> {
        let mut out = Vec::new();
        let mut followed = HashSet::new();
        let mut request = self.http.get(self.collection_url(kind)).query(&opts.filters);

        loop {
            let page: Collection = serde_json::from_value(self.send(request, kind, "").await?)?;
            out.extend(page.data);

            match page.pagination.and_then(|p| p.next) {
                Some(next) if !next.is_empty() => {
                    if followed.len() >= MAX_PAGES || !followed.insert(next.clone()) {
                        warn!("Stopping {} pagination at repeated or excess page {}", kind, next);
                        break;
                    }
                    debug!("Following {} page {}", kind, next);
                    request = self.http.get(next);
                }
                _ => break,
            }
        }

        Ok(out)
    }

    async fn by_id(&self, kind: &str, id: &str) -> ApiResult<Value> {
        let url = self.item_url(kind, id)?;
        self.send(self.http.get(url), kind, id).await
    }

    async fn create(&self, kind: &str, body: &Value) -> ApiResult<Value> {
        let request = self.http.post(self.collection_url(kind)).json(body);
        self.send(request, kind, "").await
    }

    async fn update(&self, kind: &str, id: &str, body: &Value) -> ApiResult<Value> {
        let url = self.item_url(kind, id)?;
        self.send(self.http.put(url).json(body), kind, id).await
    }
}

/// Connects sub-scoped clients, probing the scoped root once so that an
/// unreachable cluster or project fails here rather than on every list call.
#[derive(Debug, Default, Clone)]
pub struct RestFactory;

#[async_trait]
impl ClientFactory for RestFactory {
    async fn connect(&self, opts: ClientOpts) -> ApiResult<Arc<dyn ResourceClient>> {
        let client = RestClient::new(opts)?;
        let root = client.opts.url.clone();
        client.send(client.http.get(&root), "schema", &root).await?;
        debug!("Connected client for {}", root);
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, routing::get, Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_item_url_escapes_ids() {
        let client = RestClient::new(ClientOpts::new("https://mgmt.example/v3", "t")).unwrap();
        assert_eq!(
            client.item_url("settings", "server-license").unwrap(),
            "https://mgmt.example/v3/settings/server-license"
        );
        assert_eq!(
            client.item_url("projects", "c-1:p 2").unwrap(),
            "https://mgmt.example/v3/projects/c-1:p%202"
        );
    }

    #[test]
    fn test_collection_page_decoding() {
        let page: Collection = serde_json::from_str(
            r#"{"type":"collection","data":[{"id":"a"}],"pagination":{"next":"https://x/v3/nodes?marker=a"}}"#,
        )
        .unwrap();
        assert_eq!(page.data.len(), 1);
        assert_eq!(
            page.pagination.and_then(|p| p.next).as_deref(),
            Some("https://x/v3/nodes?marker=a")
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_list_stops_on_repeated_next_link() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/v3", listener.local_addr().unwrap());
        let next = format!("{}/nodes?marker=b", base);

        let app = Router::new().route(
            "/v3/nodes",
            get(move |Query(params): Query<HashMap<String, String>>| {
                let next = next.clone();
                async move {
                    let id = params.get("marker").cloned().unwrap_or_else(|| "a".to_string());
                    Json(json!({"data": [{"id": id}], "pagination": {"next": next}}))
                }
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = RestClient::new(ClientOpts::new(base, "token")).unwrap();
        let items = client.list("nodes", &ListOpts::default()).await.unwrap();
        let ids: Vec<&str> = items.iter().filter_map(|item| item["id"].as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
