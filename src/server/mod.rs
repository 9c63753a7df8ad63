//! Axum HTTP server: CRUD over people, farms, documents and debts,
//! plus the notification endpoints.

pub mod handlers;
pub mod types;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::cache::Cache;
use crate::db::Database;
use crate::notify::{NotificationEngine, RunSummary};

/// Shared state for all handlers.
pub struct AppState {
    pub store: Arc<dyn Database>,
    pub cache: Arc<Cache>,
    pub engine: Arc<NotificationEngine>,
    /// Summary of the most recent notification pass.
    pub last_run: RwLock<Option<RunSummary>>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/stats", get(handlers::stats))
        // People
        .route(
            "/api/people",
            get(handlers::list_people).post(handlers::create_person),
        )
        .route("/api/people/search", get(handlers::search_people))
        .route(
            "/api/people/{id}",
            get(handlers::get_person)
                .put(handlers::update_person)
                .delete(handlers::delete_person),
        )
        // Farms
        .route(
            "/api/farms",
            get(handlers::list_farms).post(handlers::create_farm),
        )
        .route(
            "/api/farms/{id}",
            get(handlers::get_farm)
                .put(handlers::update_farm)
                .delete(handlers::delete_farm),
        )
        // Documents
        .route(
            "/api/documents",
            get(handlers::list_documents).post(handlers::create_document),
        )
        .route(
            "/api/documents/{id}",
            get(handlers::get_document)
                .put(handlers::update_document)
                .delete(handlers::delete_document),
        )
        .route(
            "/api/documents/{id}/upcoming",
            get(handlers::document_upcoming),
        )
        // Debts
        .route(
            "/api/debts",
            get(handlers::list_debts).post(handlers::create_debt),
        )
        .route(
            "/api/debts/{id}",
            get(handlers::get_debt)
                .put(handlers::update_debt)
                .delete(handlers::delete_debt),
        )
        .route("/api/debts/{id}/people", get(handlers::debt_people))
        .route(
            "/api/debts/{id}/installments",
            get(handlers::list_installments).post(handlers::create_installment),
        )
        .route(
            "/api/installments/{id}",
            put(handlers::update_installment).delete(handlers::delete_installment),
        )
        .route(
            "/api/debts/{id}/alerts",
            get(handlers::get_debt_alert).put(handlers::put_debt_alert),
        )
        .route("/api/debts/{id}/upcoming", get(handlers::debt_upcoming))
        // Notifications
        .route("/api/notifications/run", post(handlers::run_notifications))
        .route(
            "/api/notifications/{kind}/{id}",
            get(handlers::dispatch_history),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process is stopped. Returns the bound
/// address (useful when binding to port 0).
pub async fn start_server(
    addr: SocketAddr,
    state: Arc<AppState>,
) -> anyhow::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound = listener.local_addr()?;
    tracing::info!(%bound, "http server listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, build_router(state)).await {
            tracing::error!(error = %e, "http server exited");
        }
    });
    Ok(bound)
}
