use std::net::SocketAddr;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use super::{admin, anonymize_ip, request_ip};
use crate::config::{AdminCredential, ServerConfig};
use crate::error::{Result, TelemetryError};
use crate::metrics::{self, RequestTimer};
use crate::store::{record_uid, Store};

#[derive(Clone)]
pub struct ServerState {
    pub store: Store,
    pub xff: bool,
    pub admin: Option<AdminCredential>,
}

pub fn router(state: ServerState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(root))
        .route("/healthcheck.html", get(healthcheck))
        .route("/publish", post(publish))
        .route("/metrics", get(prometheus_metrics))
        .merge(admin::router(state.clone()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(config: ServerConfig) -> Result<()> {
    info!("Telemetry Server {}", env!("CARGO_PKG_VERSION"));

    let store = Store::connect(&config.pg).await?;
    store.init_schema().await?;

    if config.admin.is_none() {
        warn!("TELEMETRY_API_KEY/TELEMETRY_SECRET_KEY not set, admin API will reject every request");
    }

    let state = ServerState {
        store,
        xff: config.xff,
        admin: config.admin,
    };
    let app = router(state);

    info!("Listening on {}", config.listen);
    let listener = TcpListener::bind(&config.listen)
        .await
        .map_err(|e| TelemetryError::Internal(format!("Failed to bind to address: {}", e)))?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|e| TelemetryError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}

async fn root() -> String {
    format!("Fleet Telemetry {}\n", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Default, Deserialize)]
struct HealthParams {
    db: Option<String>,
}

async fn healthcheck(State(state): State<ServerState>, Query(params): Query<HealthParams>) -> Result<&'static str> {
    if params.db.as_deref() == Some("true") {
        state.store.ping().await?;
    }
    Ok("pageok")
}

async fn publish(
    State(state): State<ServerState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    let _timer = RequestTimer::new("/publish");

    let record: Value = serde_json::from_slice(&body)
        .ok()
        .filter(Value::is_object)
        .ok_or_else(|| TelemetryError::BadRequest("Error parsing Record".to_string()))?;
    record_uid(&record)?;

    let real_ip = request_ip(&headers, peer.map(|ConnectInfo(addr)| addr), state.xff);
    let ip = anonymize_ip(&real_ip);
    debug!("Publish from {}", real_ip);

    if let Err(e) = state.store.report(&record, &ip).await {
        error!("Error publishing to DB: {}", e);
        return Err(TelemetryError::Database("Error publishing to DB".to_string()));
    }

    Ok(Json(json!({"ok": "1"})))
}

async fn prometheus_metrics() -> Result<Response> {
    let body = metrics::gather()?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    /// State whose pool never connects; only routes that fail before
    /// touching Postgres are exercised.
    fn state(admin: Option<AdminCredential>) -> ServerState {
        let pool = PgPoolOptions::new()
            .acquire_timeout(std::time::Duration::from_millis(200))
            .connect_lazy("postgres://telemetry@127.0.0.1:1/unused")
            .unwrap();
        ServerState {
            store: Store::from_pool(pool),
            xff: false,
            admin,
        }
    }

    fn admin() -> Option<AdminCredential> {
        Some(AdminCredential {
            access_key: "admin".to_string(),
            secret_key: "secret".to_string(),
        })
    }

    fn authorized(uri: &str) -> Request<Body> {
        Request::get(uri)
            .header(header::AUTHORIZATION, format!("Basic {}", STANDARD.encode("admin:secret")))
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_root_and_healthcheck() {
        let app = router(state(None));

        let response = app.clone().oneshot(Request::get("/").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/healthcheck.html").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"pageok");
    }

    #[tokio::test]
    async fn test_healthcheck_db_failure_is_500() {
        let response = router(state(None))
            .oneshot(Request::get("/healthcheck.html?db=true").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_publish_rejects_unparseable_body() {
        let app = router(state(None));

        for body in ["not json", "[1,2]", r#"{"install": {}}"#] {
            let response = app
                .clone()
                .oneshot(Request::post("/publish").body(Body::from(body)).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", body);
        }

        let response = app
            .oneshot(Request::post("/publish").body(Body::from("{")).unwrap())
            .await
            .unwrap();
        assert_eq!(
            body_json(response).await,
            json!({"message": "Error parsing Record", "type": "error", "code": 400})
        );
    }

    #[tokio::test]
    async fn test_publish_persistence_failure_is_500() {
        let response = router(state(None))
            .oneshot(
                Request::post("/publish")
                    .body(Body::from(r#"{"install": {"uid": "abc"}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["message"], "Database error: Error publishing to DB");
    }

    #[tokio::test]
    async fn test_admin_requires_credentials() {
        let app = router(state(admin()));

        let response = app
            .clone()
            .oneshot(Request::get("/admin/active").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let wrong = Request::get("/admin/active")
            .header(header::AUTHORIZATION, format!("Basic {}", STANDARD.encode("admin:nope")))
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.oneshot(wrong).await.unwrap().status(), StatusCode::UNAUTHORIZED);

        let response = router(state(None)).oneshot(authorized("/admin/active")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_validation_is_422() {
        let app = router(state(admin()));

        for uri in [
            "/admin/active?hours=0",
            "/admin/history?days=-1",
            "/admin/active/fields/cpu;drop",
            "/admin/history/map/a..b",
            "/admin/installs/abc/value/bad%20field",
            "/admin/records/not-a-number",
        ] {
            let response = app.clone().oneshot(authorized(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let response = router(state(None))
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
