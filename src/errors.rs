use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Error body returned by every endpoint of the serving process
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Human-readable error description
    #[schema(example = "Model not loaded. Service unavailable.")]
    pub detail: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Model not loaded. Service unavailable.")]
    ModelNotLoaded,

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("Prediction failed: {0}")]
    PredictionFailed(String),

    #[error("{0}")]
    InvalidInput(String),
}

impl From<JsonRejection> for ServiceError {
    fn from(rejection: JsonRejection) -> Self {
        ServiceError::InvalidInput(rejection.body_text())
    }
}

impl From<crate::forecast::ForecastError> for ServiceError {
    fn from(err: crate::forecast::ForecastError) -> Self {
        ServiceError::PredictionFailed(err.to_string())
    }
}

impl From<crate::anomaly::AnomalyError> for ServiceError {
    fn from(err: crate::anomaly::AnomalyError) -> Self {
        ServiceError::PredictionFailed(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ModelNotLoaded | Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::PredictionFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorDetail {
            detail: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn status_table() {
        assert_eq!(
            ServiceError::ModelNotLoaded.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ServiceError::ServiceUnavailable("warming up".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ServiceError::PredictionFailed("nan".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServiceError::InvalidInput("missing field".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[tokio::test]
    async fn prediction_failure_body_surfaces_message() {
        let response =
            ServiceError::PredictionFailed("regressor 'humidity' is not finite".into())
                .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: ErrorDetail = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            parsed.detail,
            "Prediction failed: regressor 'humidity' is not finite"
        );
    }
}
