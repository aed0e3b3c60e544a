use crate::errors::{ErrorDetail, ServiceError};
use crate::handlers::AppState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

const NOT_READY: &str = "Model not loaded. Service not fully ready.";

/// Readiness of the serving process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    pub model_loaded: bool,
    #[schema(example = "API and model are operational.")]
    pub message: String,
}

#[utoipa::path(
    get,
    path = "/health/",
    responses(
        (status = 200, description = "Model loaded and serving", body = HealthResponse),
        (status = 503, description = "Model not loaded", body = ErrorDetail)
    ),
    tag = "health"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, ServiceError> {
    if !state.models.is_loaded() {
        return Err(ServiceError::ServiceUnavailable(NOT_READY.to_string()));
    }
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        model_loaded: true,
        message: "API and model are operational.".to_string(),
    }))
}
