mod capture;
mod config;
mod consumer;
mod copy;
mod http;
mod jobs;
mod llm;
mod metrics;
mod models;
mod pipeline;
mod render;
mod video;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use config::AppConfig;
use eyre::WrapErr;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, IMAGE_SLOTS, ListingJob, ListingRequest};
use pipeline::{Pipeline, PipelineError, PipelineErrorKind};
use serde::Serialize;
use serde_json::json;
use std::{net::SocketAddr, path::Path as FsPath};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "reel.api", "server crashed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::from_env();
    let pipeline = Pipeline::from_app_config(&config).wrap_err("pipeline setup failed")?;
    info!(
        target = "reel.api",
        work_dir = %config.work_dir.display(),
        video_command = %config.video_command,
        "pipeline ready"
    );

    let (queue, _worker) = jobs::JobQueue::spawn(
        pipeline,
        config.queue_capacity,
        config.job_history_limit,
    );

    if let Some(url) = &config.redis_url {
        let client = redis::Client::open(url.as_str()).wrap_err("invalid REDIS_URL")?;
        tokio::spawn(consumer::run_subscriber(
            client,
            config.queue_channel.clone(),
            queue.clone(),
        ));
    } else {
        info!(target = "reel.api", "REDIS_URL not set; accepting jobs over HTTP only");
    }

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("prometheus recorder")?;
    let state = AppState {
        queue,
        prometheus_handle,
    };

    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/listings", post(create_listing))
        .route("/jobs/{id}", get(get_job_status))
        .merge(artifact_routes(&config.work_dir))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(config.request_max_bytes));

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!(target = "reel.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    queue: jobs::JobQueue,
    prometheus_handle: PrometheusHandle,
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "listing-reel",
    }))
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Serves finished job artifacts, including `<job_id>/product-video.mp4`,
/// straight from the work directory.
fn artifact_routes<S>(work_dir: &FsPath) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().nest_service("/videos", ServeDir::new(work_dir))
}

#[derive(Debug, Serialize)]
struct ListingAccepted {
    product_id: String,
    product_name: String,
    product_description: String,
    image_links: String,
    status: &'static str,
}

/// Accept a product submission and queue it for generation.
///
/// - Method: `POST`
/// - Path: `/listings`
/// - Body: `{ productName, productDescription, imageUrls: [3 urls] }`
/// - Response: the queued listing with `status: "requested"`
async fn create_listing(
    State(state): State<AppState>,
    Json(payload): Json<ListingRequest>,
) -> Result<Json<ListingAccepted>, AppError> {
    crate::metrics::inc_requests("/listings");
    let job = listing_job_from_request(payload)?;
    let accepted = ListingAccepted {
        product_id: job.id.clone(),
        product_name: job.product_name.clone(),
        product_description: job.product_description.clone(),
        image_links: job.image_links.join(","),
        status: "requested",
    };
    state.queue.enqueue(job).await.map_err(AppError::Queue)?;
    info!(target = "reel.api", product_id = %accepted.product_id, "listing accepted");
    Ok(Json(accepted))
}

fn listing_job_from_request(request: ListingRequest) -> Result<ListingJob, AppError> {
    if request.product_name.trim().is_empty() {
        return Err(PipelineError::validation("productName is required").into());
    }
    if request.product_description.trim().is_empty() {
        return Err(PipelineError::validation("productDescription is required").into());
    }
    if request.image_urls.len() != IMAGE_SLOTS {
        return Err(PipelineError::validation(format!(
            "imageUrls must contain exactly {IMAGE_SLOTS} entries"
        ))
        .into());
    }
    if request.image_urls.iter().any(|url| url.contains(',')) {
        return Err(PipelineError::validation("imageUrls must not contain commas").into());
    }
    Ok(ListingJob {
        id: Uuid::new_v4().simple().to_string(),
        product_name: request.product_name.trim().to_string(),
        product_description: request.product_description.trim().to_string(),
        image_links: request
            .image_urls
            .into_iter()
            .map(|url| url.trim().to_string())
            .collect(),
    })
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    state
        .queue
        .get(&id)
        .await
        .map(Json)
        .ok_or(AppError::NotFound(id))
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
    Queue(ApiError),
    NotFound(String),
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, payload) = match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::Validation => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (
                    status,
                    ApiError {
                        error: err.stage().to_string(),
                        detail: Some(err.detail().to_string()),
                    },
                )
            }
            AppError::Queue(err) => {
                let status = if err.error == "job_in_flight" {
                    StatusCode::CONFLICT
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                (status, err)
            }
            AppError::NotFound(id) => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: "not_found".into(),
                    detail: Some(format!("no job with id {id}")),
                },
            ),
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
