use axum::{
    extract::{Path, Query, Request, State},
    http::header,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use tracing::{debug, info};

use super::server::ServerState;
use super::{split_fields, RequestOpts, WindowParams};
use crate::config::AdminCredential;
use crate::error::{Result, TelemetryError};
use crate::metrics::RequestTimer;
use crate::models::{installs_by_day, Collection};

/// `true` when `authorization` carries `Basic base64(key:secret)` for the
/// configured credential.
pub fn check_basic_auth(authorization: &str, credential: &AdminCredential) -> bool {
    let Some(encoded) = authorization.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };

    match decoded.split_once(':') {
        Some((key, secret)) => key == credential.access_key && secret == credential.secret_key,
        None => false,
    }
}

async fn require_admin(State(state): State<ServerState>, request: Request, next: Next) -> Result<Response> {
    let credential = state.admin.as_ref().ok_or(TelemetryError::Unauthorized)?;
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| check_basic_auth(value, credential))
        .unwrap_or(false);

    if !authorized {
        debug!("Rejected admin request to {}", request.uri().path());
        return Err(TelemetryError::Unauthorized);
    }
    Ok(next.run(request).await)
}

pub fn router(state: ServerState) -> Router<ServerState> {
    Router::new()
        .route("/admin/active", get(active))
        .route("/admin/active/fields/:fields", get(active_fields))
        .route("/admin/active/map/:field", get(active_map))
        .route("/admin/active/value/:field", get(active_value))
        .route("/admin/history", get(history))
        .route("/admin/history/fields/:fields", get(history_fields))
        .route("/admin/history/map/:field", get(history_map))
        .route("/admin/history/value/:field", get(history_value))
        .route("/admin/history/installs", get(history_installs))
        .route("/admin/installs/:uid", get(install_by_uid))
        .route("/admin/installs/:uid/fields/:fields", get(install_fields))
        .route("/admin/installs/:uid/map/:field", get(install_map))
        .route("/admin/installs/:uid/value/:field", get(install_value))
        .route("/admin/records/:id", get(record_by_id))
        .route_layer(middleware::from_fn_with_state(state, require_admin))
}

/// Which records an aggregate covers.
enum Which {
    Active,
    History,
    Install(String),
}

impl Which {
    fn uid(&self) -> &str {
        match self {
            Which::Install(uid) => uid,
            _ => "",
        }
    }
}

fn required_uid(uid: String) -> Result<Which> {
    if uid.is_empty() {
        return Err(TelemetryError::InvalidRequest("You must provide a uid".to_string()));
    }
    Ok(Which::Install(uid))
}

fn required_field(field: &str) -> Result<()> {
    if field.is_empty() {
        return Err(TelemetryError::InvalidRequest("You must provide a field".to_string()));
    }
    Ok(())
}

async fn get_fields(state: &ServerState, which: Which, params: &WindowParams, raw: &str) -> Result<Response> {
    let opts = RequestOpts::from_params(params)?;
    let fields = split_fields(raw)?;

    Ok(match which {
        Which::Active => Json(state.store.sum_of_active_installs(opts.hours, &fields).await?).into_response(),
        _ => Json(state.store.sum_by_day(opts.days, &fields, which.uid()).await?).into_response(),
    })
}

async fn get_map(state: &ServerState, which: Which, params: &WindowParams, field: &str) -> Result<Response> {
    let opts = RequestOpts::from_params(params)?;
    required_field(field)?;

    Ok(match which {
        Which::Active => Json(state.store.sum_of_active_installs_map(opts.hours, field).await?).into_response(),
        _ => Json(state.store.sum_by_day_map(opts.days, field, which.uid()).await?).into_response(),
    })
}

async fn get_value(state: &ServerState, which: Which, params: &WindowParams, field: &str) -> Result<Response> {
    let opts = RequestOpts::from_params(params)?;
    required_field(field)?;

    Ok(match which {
        Which::Active => Json(state.store.sum_of_active_installs_value(opts.hours, field).await?).into_response(),
        _ => Json(state.store.sum_by_day_value(opts.days, field, which.uid()).await?).into_response(),
    })
}

async fn active(State(state): State<ServerState>, Query(params): Query<WindowParams>) -> Result<Response> {
    let _timer = RequestTimer::new("/admin/active");
    let opts = RequestOpts::from_params(&params)?;
    let installs = state.store.active_installs(opts.hours).await?;
    Ok(Json(Collection::new("installation", installs)).into_response())
}

async fn active_fields(
    State(state): State<ServerState>,
    Path(fields): Path<String>,
    Query(params): Query<WindowParams>,
) -> Result<Response> {
    let _timer = RequestTimer::new("/admin/active/fields");
    get_fields(&state, Which::Active, &params, &fields).await
}

async fn active_map(
    State(state): State<ServerState>,
    Path(field): Path<String>,
    Query(params): Query<WindowParams>,
) -> Result<Response> {
    let _timer = RequestTimer::new("/admin/active/map");
    get_map(&state, Which::Active, &params, &field).await
}

async fn active_value(
    State(state): State<ServerState>,
    Path(field): Path<String>,
    Query(params): Query<WindowParams>,
) -> Result<Response> {
    let _timer = RequestTimer::new("/admin/active/value");
    get_value(&state, Which::Active, &params, &field).await
}

async fn history(State(state): State<ServerState>, Query(params): Query<WindowParams>) -> Result<Response> {
    let _timer = RequestTimer::new("/admin/history");
    let opts = RequestOpts::from_params(&params)?;
    Ok(Json(state.store.records_grouped_by_day(opts.days).await?).into_response())
}

async fn history_fields(
    State(state): State<ServerState>,
    Path(fields): Path<String>,
    Query(params): Query<WindowParams>,
) -> Result<Response> {
    let _timer = RequestTimer::new("/admin/history/fields");
    get_fields(&state, Which::History, &params, &fields).await
}

async fn history_map(
    State(state): State<ServerState>,
    Path(field): Path<String>,
    Query(params): Query<WindowParams>,
) -> Result<Response> {
    let _timer = RequestTimer::new("/admin/history/map");
    get_map(&state, Which::History, &params, &field).await
}

async fn history_value(
    State(state): State<ServerState>,
    Path(field): Path<String>,
    Query(params): Query<WindowParams>,
) -> Result<Response> {
    let _timer = RequestTimer::new("/admin/history/value");
    get_value(&state, Which::History, &params, &field).await
}

async fn history_installs(State(state): State<ServerState>) -> Result<Response> {
    let _timer = RequestTimer::new("/admin/history/installs");
    let installs = state.store.all_installs().await?;
    let active = state.store.active_count_by_day().await?;
    info!("Counting {} installations by day", installs.len());
    Ok(Json(installs_by_day(&installs, &active, Utc::now().date_naive())).into_response())
}

async fn install_by_uid(
    State(state): State<ServerState>,
    Path(uid): Path<String>,
    Query(params): Query<WindowParams>,
) -> Result<Response> {
    let _timer = RequestTimer::new("/admin/installs");
    let opts = RequestOpts::from_params(&params)?;
    let which = required_uid(uid)?;
    let records = state.store.records_by_uid(which.uid(), opts.days).await?;
    Ok(Json(Collection::new("record", records)).into_response())
}

async fn install_fields(
    State(state): State<ServerState>,
    Path((uid, fields)): Path<(String, String)>,
    Query(params): Query<WindowParams>,
) -> Result<Response> {
    let _timer = RequestTimer::new("/admin/installs/fields");
    get_fields(&state, required_uid(uid)?, &params, &fields).await
}

async fn install_map(
    State(state): State<ServerState>,
    Path((uid, field)): Path<(String, String)>,
    Query(params): Query<WindowParams>,
) -> Result<Response> {
    let _timer = RequestTimer::new("/admin/installs/map");
    get_map(&state, required_uid(uid)?, &params, &field).await
}

async fn install_value(
    State(state): State<ServerState>,
    Path((uid, field)): Path<(String, String)>,
    Query(params): Query<WindowParams>,
) -> Result<Response> {
    let _timer = RequestTimer::new("/admin/installs/value");
    get_value(&state, required_uid(uid)?, &params, &field).await
}

async fn record_by_id(State(state): State<ServerState>, Path(id): Path<String>) -> Result<Response> {
    let _timer = RequestTimer::new("/admin/records");
    if id.is_empty() {
        return Err(TelemetryError::InvalidRequest("ID is required".to_string()));
    }
    let id: i64 = id
        .parse()
        .map_err(|_| TelemetryError::InvalidRequest(format!("Invalid record id: {}", id)))?;

    Ok(Json(state.store.record_by_id(id).await?).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential() -> AdminCredential {
        AdminCredential {
            access_key: "admin".to_string(),
            secret_key: "s3cret:with-colon".to_string(),
        }
    }

    fn basic(user_pass: &str) -> String {
        format!("Basic {}", STANDARD.encode(user_pass))
    }

    #[test]
    fn test_check_basic_auth() {
        assert!(check_basic_auth(&basic("admin:s3cret:with-colon"), &credential()));
        assert!(!check_basic_auth(&basic("admin:wrong"), &credential()));
        assert!(!check_basic_auth(&basic("admin"), &credential()));
        assert!(!check_basic_auth("Bearer abc", &credential()));
        assert!(!check_basic_auth("Basic !!!", &credential()));
    }
}
