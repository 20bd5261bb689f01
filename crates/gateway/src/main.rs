//! ReceiptFlow Gateway
//!
//! Serves the receipt upload form and runs every submitted document
//! through the receipt pipeline.
//! Handles:
//! - Upload form and flash notices
//! - Receipt processing endpoint
//! - Rate limiting
//! - Observability (logging, metrics, health probes)

mod flash;
mod handlers;
mod middleware;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use receiptflow_common::{
    config::{AppConfig, ObservabilityConfig},
    errors::Result,
    extraction::create_extractor,
    metrics::{register_metrics, UPSTREAM_BUCKETS},
    notion::{
        DatabaseService, EntryWriter, NotionClient, PayloadMapper, RelationBindings,
        RelationResolver, SchemaCache,
    },
    pipeline::ReceiptPipeline,
    storage::create_storage,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use middleware::rate_limit::{create_rate_limiter, rate_limit_middleware};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<ReceiptPipeline>,
    pub schemas: Arc<SchemaCache>,
}

impl AppState {
    /// Construct every long-lived client once and make sure the upload folder exists
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let notion: Arc<dyn DatabaseService> = Arc::new(NotionClient::new(&config.notion)?);
        let schemas = Arc::new(SchemaCache::new(notion.clone(), config.schema_cache_ttl()));

        let extractor = create_extractor(&config.extraction)?;
        let storage = create_storage(&config.storage).await?;

        let folder_id = storage
            .ensure_folder(
                &config.storage.folder_name,
                config.storage.parent_folder_id.as_deref(),
            )
            .await?;
        info!(folder = %config.storage.folder_name, folder_id = %folder_id, "Upload folder ready");

        let mapper = PayloadMapper::new(
            schemas.clone(),
            RelationResolver::new(notion.clone()),
            RelationBindings::from_config(&config.notion),
            config.notion.database_id.clone(),
        );
        let pipeline = ReceiptPipeline::new(
            extractor,
            storage,
            mapper,
            EntryWriter::new(notion),
            Some(folder_id),
        );

        Ok(Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            schemas,
        })
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;

    // Initialize tracing
    init_tracing(&config.observability);

    info!(
        service = %config.observability.service_name,
        "Starting ReceiptFlow gateway v{}",
        receiptflow_common::VERSION
    );

    config.validate().map_err(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        e
    })?;

    // Initialize metrics
    install_metrics(&config.observability)?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    // Create app state
    let state = AppState::from_config(config).await?;

    // Build the router
    let app = create_router(state)?;

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Exporter labelling every series with the service name
fn prometheus_builder(config: &ObservabilityConfig) -> std::result::Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .add_global_label("service", config.service_name.clone())
        .set_buckets(UPSTREAM_BUCKETS)
}

/// Install the Prometheus recorder, serving it on its own port unless disabled
fn install_metrics(config: &ObservabilityConfig) -> std::result::Result<(), BuildError> {
    if config.metrics_port != 0 {
        prometheus_builder(config)?
            .with_http_listener(SocketAddr::from(([0, 0, 0, 0], config.metrics_port)))
            .install()?;
        info!(port = config.metrics_port, "Metrics exporter listening");
    }

    register_metrics();
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Result<Router> {
    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let mut router = Router::new()
        .route("/", get(handlers::form::index))
        .route("/upload", post(handlers::upload::upload))
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .layer(DefaultBodyLimit::max(state.config.upload.max_bytes));

    let rate_limit = &state.config.rate_limit;
    if rate_limit.enabled {
        let limiter = create_rate_limiter(rate_limit.requests_per_second, rate_limit.burst)?;
        router = router.layer(axum::middleware::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ));
    }

    Ok(router
        .layer(TraceLayer::new_for_http())
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
