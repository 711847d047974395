use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::collector::{CollectedRecords, CollectorOpts, CollectorRegistry, RECORD_VERSION};
use crate::config::ClientConfig;
use crate::error::{Result, TelemetryError};
use crate::management::{ClientFactory, ResourceClient, RestClient, RestFactory};
use crate::metrics::RequestTimer;
use crate::publish::{Endpoint, Publisher, ToUrl};

/// The client role: collection passes against the management API and the
/// records they produced.
pub struct ClientApp {
    registry: CollectorRegistry,
    client: Arc<dyn ResourceClient>,
    factory: Arc<dyn ClientFactory>,
    publisher: Arc<dyn Publisher>,
    records: Mutex<CollectedRecords>,
}

impl ClientApp {
    pub fn new(
        registry: CollectorRegistry,
        client: Arc<dyn ResourceClient>,
        factory: Arc<dyn ClientFactory>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            registry,
            client,
            factory,
            publisher,
            records: Mutex::new(CollectedRecords::default()),
        }
    }

    /// Runs one pass and keeps its records. Passes never overlap.
    pub async fn collect(&self) -> CollectedRecords {
        let mut records = self.records.lock().await;
        let opts = CollectorOpts::new(self.client.clone(), self.factory.clone());
        *records = self.registry.run(&opts).await;
        records.clone()
    }

    /// Collects, then publishes the installation and license records.
    pub async fn report(&self) -> Result<()> {
        let start = Instant::now();
        debug!("Starting report");

        let records = self.collect().await;
        debug!("Collected stats in {:?}", start.elapsed());

        if let Some(installation) = &records.installation {
            self.publisher.report(Endpoint::Publish, installation).await?;
            debug!("Published telemetry in {:?}", start.elapsed());
        }

        if let Some(license) = &records.license {
            self.publisher.report(Endpoint::Licensing, license).await?;
            debug!("Published licensing in {:?}", start.elapsed());
        }

        debug!("Completed report in {:?}", start.elapsed());
        Ok(())
    }

    /// Collects and sends the license record; `None` when unlicensed.
    pub async fn check_license(&self) -> Result<Option<String>> {
        let records = self.collect().await;
        match records.license {
            Some(license) => Ok(Some(self.publisher.report(Endpoint::Licensing, &license).await?)),
            None => Ok(None),
        }
    }
}

/// `true` when the state file already holds the current record version.
/// Otherwise records it and returns `false`.
pub fn is_existing(state_file: &str) -> bool {
    let want = RECORD_VERSION.to_string();
    let have = std::fs::read_to_string(state_file).unwrap_or_default();
    if have.trim() == want {
        return true;
    }

    if let Err(e) = std::fs::write(state_file, &want) {
        error!("Failed to write {} err={}", state_file, e);
    }
    false
}

pub fn router(app: Arc<ClientApp>) -> Router {
    Router::new()
        .route("/v1-telemetry", get(show))
        .route("/v1-telemetry/reload", post(reload))
        .route("/v1-telemetry/report", post(report))
        .route("/v1-license", get(license_show))
        .route("/v1-license/check", post(license_check))
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

async fn show(State(app): State<Arc<ClientApp>>) -> Response {
    let _timer = RequestTimer::new("/v1-telemetry");
    match app.collect().await.installation {
        Some(record) => Json(record).into_response(),
        None => Json("Telemetry is disabled").into_response(),
    }
}

async fn license_show(State(app): State<Arc<ClientApp>>) -> Response {
    let _timer = RequestTimer::new("/v1-license");
    match app.collect().await.license {
        Some(record) => Json(record).into_response(),
        None => Json("Rancher is not licensed").into_response(),
    }
}

async fn license_check(State(app): State<Arc<ClientApp>>) -> Result<Response> {
    let _timer = RequestTimer::new("/v1-license/check");
    match app.check_license().await {
        Ok(Some(body)) => Ok(body.into_response()),
        Ok(None) => Ok(Json("No License data").into_response()),
        Err(e) => {
            error!("Error licensing report: {}", e);
            Err(TelemetryError::BadRequest(e.to_string()))
        }
    }
}

async fn reload(State(app): State<Arc<ClientApp>>) -> &'static str {
    let _timer = RequestTimer::new("/v1-telemetry/reload");
    app.collect().await;
    "ok"
}

async fn report(State(app): State<Arc<ClientApp>>) -> &'static str {
    let _timer = RequestTimer::new("/v1-telemetry/report");
    if let Err(e) = app.report().await {
        error!("Error publishing report: {}", e);
    }
    "ok"
}

/// Prints every collected record and returns.
pub async fn show_once(app: &ClientApp) -> Result<()> {
    let records = app.collect().await;
    for record in [records.installation, records.license].into_iter().flatten() {
        println!("{}", serde_json::to_string_pretty(&record)?);
    }
    Ok(())
}

fn spawn_ticker(app: Arc<ClientApp>, interval: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = app.report().await {
                error!("Error publishing report: {}", e);
            }
        }
    });
}

pub async fn start_client(config: ClientConfig) -> Result<()> {
    info!("Telemetry Client {}", env!("CARGO_PKG_VERSION"));

    let client: Arc<dyn ResourceClient> = Arc::new(RestClient::new(config.client_opts()?)?);
    let factory: Arc<dyn ClientFactory> = Arc::new(RestFactory);
    let to_url = if config.once { "" } else { config.to_url.as_str() };
    let publisher: Arc<dyn Publisher> = Arc::new(ToUrl::new(to_url, config.api_timeout)?);

    let app = Arc::new(ClientApp::new(
        CollectorRegistry::with_defaults(),
        client,
        factory,
        publisher,
    ));

    if config.once {
        return show_once(&app).await;
    }

    spawn_ticker(app.clone(), config.interval);

    if !is_existing(&config.state_file) {
        let first = app.clone();
        tokio::spawn(async move {
            if let Err(e) = first.report().await {
                error!("Error publishing report: {}", e);
            }
        });
    }

    info!("Listening on {}", config.listen);
    let listener = TcpListener::bind(&config.listen)
        .await
        .map_err(|e| TelemetryError::Internal(format!("Failed to bind to address: {}", e)))?;

    axum::serve(listener, router(app))
        .await
        .map_err(|e| TelemetryError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
