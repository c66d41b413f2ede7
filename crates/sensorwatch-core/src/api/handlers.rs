//! API handlers for the HTTP REST API

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::alerting::{AlertEvaluator, AlertStore};
use crate::db::MeasurementSource;
use crate::error::Error;
use crate::models::{AlertDefinition, AlertDefinitionPatch, BatchReport, ValidationResult};

use super::error::{status_for_kind, ApiError, ApiResult};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn AlertStore>,
    pub source: Arc<dyn MeasurementSource>,
    pub evaluator: Arc<AlertEvaluator>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Measurement store connectivity
pub async fn health_db(State(state): State<AppState>) -> Response {
    match state.source.health_check().await {
        Ok(()) => Json(json!({ "status": "ok", "database": "reachable" })).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "database": "unreachable",
                "message": e.to_string(),
            })),
        )
            .into_response(),
    }
}

/// Read a request body as JSON, rejecting malformed input with the error envelope
fn parse_body(body: &Bytes) -> Result<Value, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| Error::validation(format!("request body must be valid JSON: {e}")).into())
}

/// Create an alert definition
pub async fn create_alert(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let body = parse_body(&body)?;
    if !body.is_object() {
        return Err(Error::validation("request body must be a JSON object").into());
    }
    let definition: AlertDefinition =
        serde_json::from_value(body).map_err(|e| Error::validation(e.to_string()))?;

    let created = state.store.create(definition).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "success",
            "message": "Alert created",
            "alert": created,
        })),
    ))
}

/// Query parameters for listing alerts
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAlertsQuery {
    pub project_id: Option<String>,
}

/// List alert definitions
pub async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<ListAlertsQuery>,
) -> ApiResult<Json<Value>> {
    let alerts: Vec<AlertDefinition> = state
        .store
        .list()
        .await?
        .into_iter()
        .filter(|a| query.project_id.as_deref().map_or(true, |p| a.project_id == p))
        .collect();

    Ok(Json(json!({
        "status": "success",
        "total": alerts.len(),
        "alerts": alerts,
    })))
}

/// Get one alert definition
pub async fn get_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let alert = state.store.get(&alert_id).await?;
    Ok(Json(json!({ "status": "success", "alert": alert })))
}

/// Fields a patch may not touch
const IMMUTABLE_FIELDS: [&str; 4] = ["id", "validationKind", "validationId", "projectId"];

/// Update mutable fields of an alert definition
pub async fn update_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let body = parse_body(&body)?;
    let Some(fields) = body.as_object() else {
        return Err(Error::validation("request body must be a JSON object").into());
    };
    if let Some(field) = IMMUTABLE_FIELDS.iter().find(|f| fields.contains_key(**f)) {
        return Err(Error::validation(format!("{field} cannot be changed")).into());
    }

    let patch: AlertDefinitionPatch =
        serde_json::from_value(body).map_err(|e| Error::validation(e.to_string()))?;
    let alert = state.store.update(&alert_id, patch).await?;

    Ok(Json(json!({ "status": "success", "alert": alert })))
}

/// Render a single-alert run with a status derived from its outcome
fn validation_response(result: ValidationResult) -> Response {
    let status = match &result {
        ValidationResult::Success(_) => StatusCode::OK,
        ValidationResult::Error(failure) => status_for_kind(&failure.error_kind),
    };
    (status, Json(result)).into_response()
}

/// Run one alert
pub async fn validate_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
) -> ApiResult<Response> {
    let result = state.evaluator.run_one(&alert_id).await?;
    Ok(validation_response(result))
}

/// Body of the single-alert run request
#[derive(Debug, Deserialize)]
pub struct ValidateAlertRequest {
    #[serde(rename = "alertId", alias = "alert_id", alias = "id")]
    pub alert_id: String,
}

/// Run one alert named in the body
pub async fn validate_alert_body(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Response> {
    let body = parse_body(&body)?;
    let request: ValidateAlertRequest = serde_json::from_value(body)
        .map_err(|_| Error::validation("alertId is required"))?;

    let result = state.evaluator.run_one(&request.alert_id).await?;
    Ok(validation_response(result))
}

/// Run every active alert
pub async fn validate_all(State(state): State<AppState>) -> ApiResult<Json<BatchReport>> {
    Ok(Json(state.evaluator.run_all_active().await?))
}

/// Run the active alerts of one project
pub async fn validate_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<BatchReport>> {
    Ok(Json(state.evaluator.run_by_project(&project_id).await?))
}

/// Run the active alerts of the project named in the body
pub async fn validate_project_body(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<BatchReport>> {
    let body = parse_body(&body)?;
    let project_id = match body.get("projectId") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(Error::validation("projectId is required").into()),
    };

    Ok(Json(state.evaluator.run_by_project(&project_id).await?))
}
