use axum::{
    body::Bytes,
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use usage_report_api::config::AppConfig;
use usage_report_api::error::ApiError;
use usage_report_api::models::{ApiResponse, Report, ReportEnvelope};
use usage_report_api::report;
use usage_report_api::window::{ReportWindow, WindowQuery};


/// Usage report HTTP API
/// Reads the chatbot's application log, never writes it
/// Every report is derived fresh from the log lines
#[derive(Clone)]
struct AppState {
    config: Arc<AppConfig>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config = AppConfig::from_env()?;
    let addr = config.bind_addr;
    tracing::info!(
        log_path = %config.log_path.display(),
        period = %config.default_period,
        "configuration loaded"
    );

    let state = AppState {
        config: Arc::new(config),
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "usage report server listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .flatten_event(true)
        .init();
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/reports", get(get_report).post(create_report))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn root() -> &'static str {
    "Chatbot Usage Report API v0.1.0"
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Report over the configured log file
async fn get_report(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<ApiResponse<ReportEnvelope>>, ApiError> {
    // Window problems surface before the log is touched
    let window = resolve_window(&state, &query)?;
    let content = read_log(&state.config.log_path).await?;
    let report = run_report(&state, content, window).await?;
    respond(&state, report).await
}

/// Report over log text supplied in the request body
async fn create_report(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
    body: Bytes,
) -> Result<Json<ApiResponse<ReportEnvelope>>, ApiError> {
    let window = resolve_window(&state, &query)?;
    let report = run_report(&state, body.to_vec(), window).await?;
    respond(&state, report).await
}

fn resolve_window(state: &AppState, query: &WindowQuery) -> Result<ReportWindow, ApiError> {
    let today = Utc::now().date_naive();
    let window = query.resolve(state.config.default_period, today)?;
    Ok(window)
}

async fn run_report(
    state: &AppState,
    content: Vec<u8>,
    window: ReportWindow,
) -> Result<Report, ApiError> {
    let options = state.config.aggregation.clone();
    let report =
        tokio::task::spawn_blocking(move || report::build_report(&content, window, options)).await?;
    Ok(report)
}

async fn respond(
    state: &AppState,
    report: Report,
) -> Result<Json<ApiResponse<ReportEnvelope>>, ApiError> {
    let message = format!(
        "{} report for {} to {}",
        report.window.period, report.window.start, report.window.end
    );
    let envelope = ReportEnvelope {
        report_id: Uuid::new_v4(),
        generated_at: Utc::now(),
        report,
    };

    if let Some(dir) = &state.config.output_dir {
        let path = write_snapshot(dir, &envelope).await?;
        tracing::info!(path = %path.display(), report_id = %envelope.report_id, "report snapshot written");
    }

    Ok(Json(ApiResponse {
        status: "success".to_string(),
        message,
        data: Some(envelope),
    }))
}

// Helper functions

async fn read_log(path: &Path) -> Result<Vec<u8>, ApiError> {
    tokio::fs::read(path).await.map_err(|source| ApiError::LogSource {
        path: path.display().to_string(),
        source,
    })
}

fn snapshot_path(dir: &Path, window: &ReportWindow) -> PathBuf {
    dir.join(format!("usage-report_{}_{}.json", window.start, window.end))
}

async fn write_snapshot(dir: &Path, envelope: &ReportEnvelope) -> Result<PathBuf, ApiError> {
    let path = snapshot_path(dir, &envelope.report.window);
    let snapshot_error = |source: std::io::Error| ApiError::Snapshot {
        path: path.display().to_string(),
        source,
    };

    let json = serde_json::to_vec_pretty(envelope).map_err(|e| snapshot_error(e.into()))?;
    tokio::fs::create_dir_all(dir).await.map_err(snapshot_error)?;
    tokio::fs::write(&path, json).await.map_err(snapshot_error)?;
    Ok(path)
}
