//! Web API for the sync service
//!
//! Thin axum layer over the orchestrator and the store: every sync
//! operation is exposed as an endpoint returning its structured report.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;

use crate::database::{self, SalesSummary, SyncStats};
use crate::error::SyncError;
use crate::models::{NewProduct, Platform, PlatformListing, Product, ProductStatus, Sale};
use crate::sales::RetryReport;
use crate::sync::{CheckSoldReport, CrossPostReport, ImportReport, SyncAllReport, SyncOrchestrator};

/// Shared application state (thread-safe database connection + orchestrator)
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    orchestrator: Arc<SyncOrchestrator>,
}

/// API response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

/// Map operation errors onto response codes. Adapter failures inside an
/// operation never get here; they are part of the report.
fn status_for(err: &SyncError) -> StatusCode {
    match err {
        SyncError::NotFound(_) => StatusCode::NOT_FOUND,
        SyncError::AlreadySynced { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Deserialize)]
struct ProductQuery {
    status: Option<ProductStatus>,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    100
}

#[derive(Serialize)]
struct ProductWithListings {
    #[serde(flatten)]
    product: Product,
    listings: Vec<PlatformListing>,
}

#[derive(Deserialize)]
struct CrossPostRequest {
    product_id: i64,
    platforms: Vec<Platform>,
}

/// GET /health
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy", "version": env!("CARGO_PKG_VERSION") }))
}

/// GET /api/products?status={status}&limit={n}&offset={n}
async fn list_products_handler(
    State(state): State<AppState>,
    Query(params): Query<ProductQuery>,
) -> Result<Json<ApiResponse<Vec<Product>>>, StatusCode> {
    let conn = state.db.lock().unwrap();
    match database::list_products(&conn, params.status, params.limit, params.offset) {
        Ok(products) => Ok(ApiResponse::ok(products)),
        Err(e) => {
            log::error!("Product listing error: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// POST /api/products
async fn create_product_handler(
    State(state): State<AppState>,
    Json(new): Json<NewProduct>,
) -> Result<Json<ApiResponse<Product>>, StatusCode> {
    let conn = state.db.lock().unwrap();
    let created = database::insert_product(&conn, &new, ProductStatus::Active)
        .and_then(|id| database::get_product(&conn, id));
    match created {
        Ok(Some(product)) => Ok(ApiResponse::ok(product)),
        Ok(None) => Err(StatusCode::INTERNAL_SERVER_ERROR),
        Err(e) => {
            log::error!("Product create error: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /api/products/{id} - product plus its ledger rows
async fn get_product_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<ProductWithListings>>, StatusCode> {
    let conn = state.db.lock().unwrap();
    let product = match database::get_product(&conn, id) {
        Ok(Some(p)) => p,
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            log::error!("Database error: {}", e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    let listings = match database::listings_for_product(&conn, id) {
        Ok(l) => l,
        Err(e) => {
            log::error!("Database error: {}", e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    Ok(ApiResponse::ok(ProductWithListings { product, listings }))
}

/// PUT /api/products/{id}
async fn update_product_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(new): Json<NewProduct>,
) -> Result<Json<ApiResponse<Product>>, StatusCode> {
    let conn = state.db.lock().unwrap();
    match database::update_product(&conn, id, &new) {
        Ok(true) => match database::get_product(&conn, id) {
            Ok(Some(product)) => Ok(ApiResponse::ok(product)),
            _ => Err(StatusCode::INTERNAL_SERVER_ERROR),
        },
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            log::error!("Product update error: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// POST /api/sync/import/{platform}
async fn import_handler(
    State(state): State<AppState>,
    Path(platform): Path<String>,
) -> Result<Json<ApiResponse<ImportReport>>, StatusCode> {
    let platform: Platform = platform.parse().map_err(|_| StatusCode::NOT_FOUND)?;
    match state.orchestrator.import(platform).await {
        Ok(report) => Ok(ApiResponse::ok(report)),
        Err(e) => {
            log::error!("Import error: {}", e);
            Err(status_for(&e))
        }
    }
}

/// POST /api/sync/cross-post
async fn cross_post_handler(
    State(state): State<AppState>,
    Json(request): Json<CrossPostRequest>,
) -> Result<Json<ApiResponse<CrossPostReport>>, StatusCode> {
    match state
        .orchestrator
        .cross_post(request.product_id, &request.platforms)
        .await
    {
        Ok(report) => Ok(ApiResponse::ok(report)),
        Err(e) => {
            log::error!("Cross-post error: {}", e);
            Err(status_for(&e))
        }
    }
}

/// POST /api/sync/check-sold
async fn check_sold_handler(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<CheckSoldReport>>, StatusCode> {
    match state.orchestrator.check_sold().await {
        Ok(report) => Ok(ApiResponse::ok(report)),
        Err(e) => {
            log::error!("Sold check error: {}", e);
            Err(status_for(&e))
        }
    }
}

/// POST /api/sync/all
async fn sync_all_handler(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<SyncAllReport>>, StatusCode> {
    match state.orchestrator.sync_all().await {
        Ok(report) => Ok(ApiResponse::ok(report)),
        Err(e) => {
            log::error!("Sync-all error: {}", e);
            Err(status_for(&e))
        }
    }
}

/// GET /api/sync/stats
async fn stats_handler(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<SyncStats>>, StatusCode> {
    match state.orchestrator.stats() {
        Ok(stats) => Ok(ApiResponse::ok(stats)),
        Err(e) => {
            log::error!("Stats error: {}", e);
            Err(status_for(&e))
        }
    }
}

/// GET /api/sales?limit={n}&offset={n}
async fn list_sales_handler(
    State(state): State<AppState>,
    Query(params): Query<PageQuery>,
) -> Result<Json<ApiResponse<Vec<Sale>>>, StatusCode> {
    let conn = state.db.lock().unwrap();
    match database::list_sales(&conn, params.limit, params.offset) {
        Ok(sales) => Ok(ApiResponse::ok(sales)),
        Err(e) => {
            log::error!("Sales listing error: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /api/sales/summary
async fn sales_summary_handler(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<SalesSummary>>, StatusCode> {
    let conn = state.db.lock().unwrap();
    match database::sales_summary(&conn) {
        Ok(summary) => Ok(ApiResponse::ok(summary)),
        Err(e) => {
            log::error!("Sales summary error: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /api/sales/{id}
async fn get_sale_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Sale>>, StatusCode> {
    let conn = state.db.lock().unwrap();
    match database::get_sale(&conn, id) {
        Ok(Some(sale)) => Ok(ApiResponse::ok(sale)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            log::error!("Database error: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// POST /api/sales/retry - re-forward unsynced sales to accounting
async fn retry_sales_handler(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<RetryReport>>, StatusCode> {
    match state.orchestrator.recorder().retry_unsynced().await {
        Ok(report) => Ok(ApiResponse::ok(report)),
        Err(e) => {
            log::error!("Retry sweep error: {}", e);
            Err(status_for(&e))
        }
    }
}

/// Build the web server router
pub fn create_router(db: Arc<Mutex<Connection>>, orchestrator: Arc<SyncOrchestrator>) -> Router {
    let state = AppState { db, orchestrator };

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/products", get(list_products_handler).post(create_product_handler))
        .route("/api/products/{id}", get(get_product_handler).put(update_product_handler))
        .route("/api/sync/import/{platform}", post(import_handler))
        .route("/api/sync/cross-post", post(cross_post_handler))
        .route("/api/sync/check-sold", post(check_sold_handler))
        .route("/api/sync/all", post(sync_all_handler))
        .route("/api/sync/stats", get(stats_handler))
        .route("/api/sales", get(list_sales_handler))
        .route("/api/sales/summary", get(sales_summary_handler))
        .route("/api/sales/{id}", get(get_sale_handler))
        .route("/api/sales/retry", post(retry_sales_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the web server (async)
///
/// Binds all interfaces so Docker port mapping works; restrict exposure at
/// the firewall or the port mapping.
pub async fn serve(
    db: Arc<Mutex<Connection>>,
    orchestrator: Arc<SyncOrchestrator>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_router(db, orchestrator);
    let addr = format!("0.0.0.0:{}", port);

    log::info!("Web API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_schema;
    use crate::sales::SalesRecorder;

    fn test_state() -> (Arc<Mutex<Connection>>, Arc<SyncOrchestrator>) {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let db = Arc::new(Mutex::new(conn));
        let recorder = SalesRecorder::new(db.clone(), None);
        let orchestrator = Arc::new(SyncOrchestrator::new(db.clone(), vec![], recorder));
        (db, orchestrator)
    }

    #[test]
    fn create_router_builds() {
        let (db, orchestrator) = test_state();
        let _router = create_router(db, orchestrator);
    }

    #[test]
    fn api_response_serialization() {
        let response: ApiResponse<Vec<i32>> = ApiResponse {
            success: true,
            data: Some(vec![1, 2, 3]),
            error: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"success\":true"));
        assert!(json.contains("\"data\":[1,2,3]"));
        // error is omitted when None
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn not_found_maps_to_404() {
        let err = SyncError::NotFound("product 9".to_string());
        assert_eq!(status_for(&err), StatusCode::NOT_FOUND);
    }

    #[test]
    fn conflict_maps_to_409() {
        let err = SyncError::AlreadySynced {
            product_id: 1,
            platform: Platform::Vinted,
        };
        assert_eq!(status_for(&err), StatusCode::CONFLICT);
    }
}
