use crate::anomaly::classify;
use crate::errors::{ErrorDetail, ServiceError};
use crate::forecast::ForecastInput;
use crate::handlers::AppState;
use axum::{extract::rejection::JsonRejection, extract::State, Json};
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{error, info};
use utoipa::ToSchema;

/// Timestamp of a reading as sent by the caller.
///
/// The original text is kept so it can be echoed back unchanged; inference
/// uses the wall-clock time with any UTC offset dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingTimestamp {
    raw: String,
    wall_clock: NaiveDateTime,
}

impl ReadingTimestamp {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        let wall_clock = DateTime::parse_from_rfc3339(trimmed)
            .or_else(|_| DateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f%z"))
            .or_else(|_| DateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M%:z"))
            .map(|dt| dt.naive_local())
            .ok()
            .or_else(|| crate::store::parse_naive_text(trimmed))
            .ok_or_else(|| format!("invalid ISO-8601 timestamp: {:?}", raw))?;
        Ok(Self {
            raw: raw.to_string(),
            wall_clock,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn wall_clock(&self) -> NaiveDateTime {
        self.wall_clock
    }
}

impl<'de> Deserialize<'de> for ReadingTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ReadingTimestamp::parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl Serialize for ReadingTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

/// A new reading to check
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AnomalyInput {
    /// ISO-8601 timestamp; a UTC offset is optional
    #[schema(value_type = String, format = DateTime, example = "2024-06-01T14:00:00+05:00")]
    pub timestamp: ReadingTimestamp,
    #[schema(example = 155.0)]
    pub aqi_value: f64,
    #[schema(example = 35.0)]
    pub temperature: f64,
    #[schema(example = 70.0)]
    pub humidity: f64,
    #[schema(example = 6.5)]
    pub wind_speed: f64,
}

/// Forecast interval and anomaly verdict for one reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AnomalyPrediction {
    /// The request timestamp, unchanged
    pub timestamp: String,
    pub actual_aqi: f64,
    pub predicted_mean_aqi: f64,
    pub aqi_lower_bound: f64,
    pub aqi_upper_bound: f64,
    pub is_anomaly: bool,
    /// Signed distance outside the interval, 0 when inside
    pub deviation: f64,
}

/// Predicts the expected AQI interval for a reading and flags it when the
/// actual value falls outside.
#[utoipa::path(
    post,
    path = "/predict_anomaly/",
    request_body = AnomalyInput,
    responses(
        (status = 200, description = "Reading classified", body = AnomalyPrediction),
        (status = 422, description = "Malformed request body", body = ErrorDetail),
        (status = 500, description = "Prediction failed", body = ErrorDetail),
        (status = 503, description = "Model not loaded", body = ErrorDetail)
    ),
    tag = "anomaly"
)]
pub async fn predict_anomaly(
    State(state): State<AppState>,
    payload: Result<Json<AnomalyInput>, JsonRejection>,
) -> Result<Json<AnomalyPrediction>, ServiceError> {
    let Json(input) = payload?;
    let model = state.models.get().ok_or(ServiceError::ModelNotLoaded)?;

    let features = ForecastInput::new(input.timestamp.wall_clock())
        .with_regressor("temperature", input.temperature)
        .with_regressor("humidity", input.humidity)
        .with_regressor("wind_speed", input.wind_speed);

    let forecast = model.predict(&features).map_err(|e| {
        error!(timestamp = input.timestamp.as_str(), error = %e, "prediction failed");
        ServiceError::from(e)
    })?;

    let verdict = classify(input.aqi_value, forecast.yhat_lower, forecast.yhat_upper)
        .map_err(|e| {
            error!(timestamp = input.timestamp.as_str(), error = %e, "classification failed");
            ServiceError::from(e)
        })?;

    if verdict.is_anomaly {
        info!(
            timestamp = input.timestamp.as_str(),
            actual = input.aqi_value,
            lower = forecast.yhat_lower,
            upper = forecast.yhat_upper,
            deviation = verdict.deviation,
            "anomalous reading"
        );
    }

    Ok(Json(AnomalyPrediction {
        timestamp: input.timestamp.as_str().to_string(),
        actual_aqi: input.aqi_value,
        predicted_mean_aqi: forecast.yhat,
        aqi_lower_bound: forecast.yhat_lower,
        aqi_upper_bound: forecast.yhat_upper,
        is_anomaly: verdict.is_anomaly,
        deviation: verdict.deviation,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn offset_is_dropped_keeping_wall_clock() {
        let ts = ReadingTimestamp::parse("2024-06-01T14:00:00+05:00").unwrap();
        assert_eq!(ts.wall_clock(), at(14, 0));
        assert_eq!(ts.as_str(), "2024-06-01T14:00:00+05:00");

        let zulu = ReadingTimestamp::parse("2024-06-01T14:00:00Z").unwrap();
        assert_eq!(zulu.wall_clock(), at(14, 0));
    }

    #[test]
    fn accepts_naive_and_short_forms() {
        assert_eq!(
            ReadingTimestamp::parse("2024-06-01T14:30:00").unwrap().wall_clock(),
            at(14, 30)
        );
        assert_eq!(
            ReadingTimestamp::parse("2024-06-01T14:30+05:00").unwrap().wall_clock(),
            at(14, 30)
        );
        assert_eq!(
            ReadingTimestamp::parse("2024-06-01 14:30:00.250").unwrap().wall_clock(),
            at(14, 30) + chrono::Duration::milliseconds(250)
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(ReadingTimestamp::parse("June 1st").is_err());
    }

    #[test]
    fn input_round_trips_raw_timestamp() {
        let input: AnomalyInput = serde_json::from_str(
            r#"{"timestamp":"2024-06-01T14:00:00.000+05:00","aqi_value":155,
                "temperature":35,"humidity":70,"wind_speed":6.5}"#,
        )
        .unwrap();
        assert_eq!(input.timestamp.as_str(), "2024-06-01T14:00:00.000+05:00");
        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json["timestamp"], "2024-06-01T14:00:00.000+05:00");
    }
}
