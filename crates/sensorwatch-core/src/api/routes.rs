//! API routes

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers::{self, AppState};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(handlers::health))
        .route("/health/db", get(handlers::health_db))

        // Alert definitions
        .route(
            "/api/v1/alerts",
            post(handlers::create_alert).get(handlers::list_alerts),
        )
        .route(
            "/api/v1/alerts/:alert_id",
            get(handlers::get_alert).patch(handlers::update_alert),
        )

        // Validation runs
        .route("/api/v1/alerts/validate", post(handlers::validate_alert_body))
        .route(
            "/api/v1/alerts/validate-all",
            post(handlers::validate_all).get(handlers::validate_all),
        )
        .route(
            "/api/v1/alerts/validate-project",
            post(handlers::validate_project_body),
        )
        .route("/api/v1/alerts/:alert_id/validate", post(handlers::validate_alert))
        .route(
            "/api/v1/projects/:project_id/alerts/validate",
            post(handlers::validate_project),
        )

        // Legacy paths
        .route("/insertarAlerta", post(handlers::create_alert))
        .route("/listarAlertas", get(handlers::list_alerts))
        .route("/validarAlerta", post(handlers::validate_alert_body))
        .route(
            "/validarTodasLasAlertas",
            get(handlers::validate_all).post(handlers::validate_all),
        )
        .route(
            "/validarAlertasPorProyecto",
            post(handlers::validate_project_body),
        )

        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
