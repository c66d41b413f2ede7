//! REST API implementation
//!
//! This module provides the HTTP API for SensorWatch.

pub mod error;
pub mod handlers;
pub mod routes;

pub use error::{ApiError, ApiResult};
pub use handlers::AppState;
pub use routes::create_router;

use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::error::{Error, Result};

/// HTTP API server
pub struct HttpServer {
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Start the HTTP server
    pub async fn serve(self, addr: &str) -> Result<()> {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let app = create_router(self.state).layer(cors);

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Internal(format!("cannot bind {addr}: {e}")))?;

        info!("HTTP server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        Ok(())
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::alerting::{AlertEvaluator, FixedClock, JsonFileAlertStore, NotificationDispatcher};
    use crate::config::AlertingConfig;
    use crate::testing::{base_time, numeric_series, InMemorySource, ScriptedMailer};

    const TEMP: &str = "DHT22 [Temperatura (°C)]";

    fn app(source: InMemorySource) -> (tempfile::TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileAlertStore::new(dir.path().join("alerts.json")));
        let source = Arc::new(source);
        let notifier = NotificationDispatcher::new(
            Arc::new(ScriptedMailer::default()),
            vec!["fallback@example.com".into()],
            Duration::from_secs(5),
        );
        let evaluator = AlertEvaluator::new(
            store.clone(),
            source.clone(),
            notifier,
            &AlertingConfig::default(),
        )
        .with_clock(Arc::new(FixedClock(base_time())));

        let state = AppState {
            store,
            source,
            evaluator: Arc::new(evaluator),
        };
        (dir, create_router(state))
    }

    fn sensors() -> InMemorySource {
        InMemorySource::default()
            .with_device("7", 1, "DEV-1")
            .with_series(1, TEMP, numeric_series(&[50.0, 150.0]))
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())).unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        send(app, request).await
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn alert(id: &str) -> Value {
        json!({
            "id": id,
            "projectId": 7,
            "ruleType": "calidad",
            "validationKind": "range_threshold",
            "parameter": TEMP,
            "config": {"operador": ">", "limite": 100},
            "email": "ops@example.com"
        })
    }

    #[tokio::test]
    async fn test_health() {
        let (_dir, app) = app(sensors());
        let (status, body) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, _) = call(&app, Method::GET, "/health/db", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_db_health_down() {
        let (_dir, app) = app(sensors().down());
        let (status, body) = call(&app, Method::GET, "/health/db", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["database"], "unreachable");
    }

    #[tokio::test]
    async fn test_create_conflict_and_list() {
        let (_dir, app) = app(sensors());

        let (status, body) = call(&app, Method::POST, "/api/v1/alerts", Some(alert("a1"))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["alert"]["projectId"], "7");

        let (status, body) = call(&app, Method::POST, "/insertarAlerta", Some(alert("a2"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["existing_alert"]["id"], "a1");

        let (status, body) = call(&app, Method::GET, "/api/v1/alerts?projectId=7", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);

        let (_, body) = call(&app, Method::GET, "/listarAlertas?projectId=8", None).await;
        assert_eq!(body["total"], 0);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let (_dir, app) = app(sensors());

        let mut unknown = alert("a1");
        unknown["validationKind"] = json!("fourier");
        let (status, body) = call(&app, Method::POST, "/api/v1/alerts", Some(unknown)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_kind"], "validation");

        let (status, _) = call(&app, Method::POST, "/api/v1/alerts", Some(json!([1]))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_json_gets_error_envelope() {
        let (_dir, app) = app(sensors());

        for (method, uri) in [
            (Method::POST, "/api/v1/alerts"),
            (Method::PATCH, "/api/v1/alerts/a1"),
            (Method::POST, "/validarAlerta"),
        ] {
            let request = Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap();
            let (status, body) = send(&app, request).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["status"], "error");
            assert_eq!(body["error_kind"], "validation");
        }
    }

    #[tokio::test]
    async fn test_get_and_patch() {
        let (_dir, app) = app(sensors());
        call(&app, Method::POST, "/api/v1/alerts", Some(alert("a1"))).await;

        let (status, _) = call(&app, Method::GET, "/api/v1/alerts/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(
            &app,
            Method::PATCH,
            "/api/v1/alerts/a1",
            Some(json!({"active": false})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["alert"]["active"], false);

        let (status, _) = call(
            &app,
            Method::PATCH,
            "/api/v1/alerts/a1",
            Some(json!({"projectId": "9"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_validate_one() {
        let (_dir, app) = app(sensors());
        call(&app, Method::POST, "/api/v1/alerts", Some(alert("a1"))).await;

        let (status, body) = call(&app, Method::POST, "/api/v1/alerts/a1/validate", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["validation_type"], "range_threshold");
        assert_eq!(body["issues_found"][0]["issue_type"], "threshold_exceeded");
        assert_eq!(body["issues_found"][0]["threshold_violations"], 1);

        let (status, body) = call(
            &app,
            Method::POST,
            "/validarAlerta",
            Some(json!({"alertId": "a1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["alert_id"], "a1");
    }

    #[tokio::test]
    async fn test_validate_one_error_statuses() {
        let (_dir, app) = app(sensors());
        let mut inactive = alert("off");
        inactive["active"] = json!(false);
        call(&app, Method::POST, "/api/v1/alerts", Some(inactive)).await;

        let mut orphan = alert("orphan");
        orphan["projectId"] = json!("99");
        call(&app, Method::POST, "/api/v1/alerts", Some(orphan)).await;

        let (status, _) = call(&app, Method::POST, "/api/v1/alerts/ghost/validate", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&app, Method::POST, "/api/v1/alerts/off/validate", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error_kind"], "inactive_alert");

        let (status, body) = call(&app, Method::POST, "/api/v1/alerts/orphan/validate", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");
        assert_eq!(body["error_kind"], "no_devices_found");

        let (status, _) = call(&app, Method::POST, "/validarAlerta", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_batch_endpoints_always_ok() {
        let (_dir, app) = app(sensors());
        call(&app, Method::POST, "/api/v1/alerts", Some(alert("a1"))).await;
        let mut orphan = alert("orphan");
        orphan["projectId"] = json!("99");
        call(&app, Method::POST, "/api/v1/alerts", Some(orphan)).await;

        let (status, body) = call(&app, Method::GET, "/validarTodasLasAlertas", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_alerts_processed"], 2);
        assert_eq!(body["validation_results"][0]["result"]["status"], "success");
        assert_eq!(body["validation_results"][1]["result"]["status"], "error");

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v1/projects/7/alerts/validate",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_alerts_processed"], 1);

        let (_, body) = call(
            &app,
            Method::POST,
            "/validarAlertasPorProyecto",
            Some(json!({"projectId": 42})),
        )
        .await;
        assert_eq!(body["total_alerts_processed"], 0);
        assert_eq!(body["project_id"], "42");
        assert!(body["message"].is_string());
    }
}
