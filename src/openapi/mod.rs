use axum::Json;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "AQI Anomaly Detection API",
        description = r#"
Flags air-quality readings that fall outside the interval forecast by the
seasonal model trained on the city's history.

- `POST /predict_anomaly/` classifies one reading
- `GET /health/` reports whether the model is loaded

Errors are returned as `{"detail": "..."}`.
"#
    ),
    paths(
        crate::handlers::predict::predict_anomaly,
        crate::handlers::health::health_check,
    ),
    components(
        schemas(
            crate::handlers::predict::AnomalyInput,
            crate::handlers::predict::AnomalyPrediction,
            crate::handlers::health::HealthResponse,
            crate::errors::ErrorDetail,
        )
    ),
    tags(
        (name = "anomaly", description = "Anomaly classification"),
        (name = "health", description = "Readiness check"),
    )
)]
pub struct ApiDoc;

/// Serves the generated OpenAPI document
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
