// Churn Warehouse - Web Server
// Read-only REST API over a published warehouse

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use clap::Parser;
use rusqlite::Connection;
use serde::Serialize;
use tower_http::cors::CorsLayer;

use churn_warehouse::{
    load_config_from, load_warehouse, open_database, publish_history, ChurnAxis, DimensionKind,
    SnapshotFilter, WarehouseSnapshot, CONFIG_FILE_NAME,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    snapshot: WarehouseSnapshot,
    db: Arc<Mutex<Connection>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ApiResponse {
        success: false,
        data: (),
        error: Some(message.into()),
    };
    (status, Json(body)).into_response()
}

/// Snapshot header attached to every aggregate response
#[derive(Serialize)]
struct Scoped<T> {
    snapshot: String,
    filter: SnapshotFilter,
    #[serde(flatten)]
    body: T,
}

#[derive(Serialize)]
struct Breakdown {
    axis: ChurnAxis,
    groups: Vec<churn_warehouse::ChurnStat>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/kpis - Headline KPIs for the filtered population
async fn get_kpis(State(state): State<AppState>, Query(filter): Query<SnapshotFilter>) -> Response {
    let kpis = state.snapshot.kpis(&filter);
    let body = Scoped {
        snapshot: state.snapshot.snapshot_time().to_string(),
        filter,
        body: kpis,
    };
    (StatusCode::OK, Json(ApiResponse::ok(body))).into_response()
}

/// GET /api/churn/:axis - Churn breakdown along one axis
async fn get_churn(
    State(state): State<AppState>,
    Path(axis): Path<String>,
    Query(filter): Query<SnapshotFilter>,
) -> Response {
    let axis: ChurnAxis = match axis.parse() {
        Ok(axis) => axis,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    let groups = state.snapshot.churn_by(axis, &filter);
    let body = Scoped {
        snapshot: state.snapshot.snapshot_time().to_string(),
        filter,
        body: Breakdown { axis, groups },
    };
    (StatusCode::OK, Json(ApiResponse::ok(body))).into_response()
}

/// GET /api/dimensions/:name - Raw dimension table rows
async fn get_dimension(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let kind = DimensionKind::ALL
        .into_iter()
        .find(|kind| kind.name() == name || kind.table() == name);

    let snapshot = &state.snapshot;
    match kind {
        Some(DimensionKind::Customer) => Json(ApiResponse::ok(snapshot.dim_customer())).into_response(),
        Some(DimensionKind::Geography) => Json(ApiResponse::ok(snapshot.dim_geo())).into_response(),
        Some(DimensionKind::Time) => Json(ApiResponse::ok(snapshot.dim_time())).into_response(),
        Some(DimensionKind::Segment) => Json(ApiResponse::ok(snapshot.dim_segment())).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("unknown dimension: {name}")),
    }
}

/// GET /api/filters - Values available to each filter
async fn get_filters(State(state): State<AppState>) -> Response {
    Json(ApiResponse::ok(state.snapshot.filter_options())).into_response()
}

/// GET /api/history - Past publishes recorded in the database
async fn get_history(State(state): State<AppState>) -> Response {
    let conn = match state.db.lock() {
        Ok(conn) => conn,
        Err(_) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, "database lock poisoned"),
    };

    match publish_history(&conn) {
        Ok(history) => (StatusCode::OK, Json(ApiResponse::ok(history))).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to read publish history");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/kpis", get(get_kpis))
        .route("/churn/:axis", get(get_churn))
        .route("/dimensions/:name", get(get_dimension))
        .route("/filters", get(get_filters))
        .route("/history", get(get_history))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

/// Serve a published churn warehouse as read-only JSON.
#[derive(Parser)]
#[command(name = "churn-warehouse-server", version, about, long_about = None)]
struct ServerArgs {
    #[arg(long, default_value = CONFIG_FILE_NAME, env = "CHURN_WAREHOUSE_CONFIG")]
    config: PathBuf,

    /// SQLite database written by `churn-warehouse build`.
    #[arg(long)]
    database: Option<PathBuf>,

    #[arg(long, default_value = "0.0.0.0:3000", env = "CHURN_WAREHOUSE_ADDR")]
    addr: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("churn_warehouse=info,churn_warehouse_server=info"));
    fmt().with_env_filter(env_filter).with_target(false).init();

    let args = ServerArgs::parse();

    println!("🌐 Churn Warehouse - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = load_config_from(&args.config)?;
    let db_path = args
        .database
        .or(config.paths.database)
        .context("No database configured; pass --database or set paths.database")?;

    if !db_path.exists() {
        anyhow::bail!(
            "Database not found at {}. Run `churn-warehouse build --database {}` first.",
            db_path.display(),
            db_path.display()
        );
    }

    let conn = open_database(&db_path).with_context(|| format!("Failed to open {}", db_path.display()))?;
    let warehouse = load_warehouse(&conn).context("Published warehouse failed validation")?;
    let snapshot = WarehouseSnapshot::from(warehouse);
    println!("✓ Loaded snapshot {} ({} customers)", snapshot.snapshot_time(), snapshot.facts().len());

    let state = AppState {
        snapshot,
        db: Arc::new(Mutex::new(conn)),
    };

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .with_context(|| format!("Failed to bind to {}", args.addr))?;

    println!("\n🚀 Server running on http://{}", args.addr);
    println!("   API: http://{}/api/kpis", args.addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, router(state)).await.context("Server error")?;
    Ok(())
}
