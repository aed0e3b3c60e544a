/*!
 * # Reading store
 *
 * Historical readings live in one table (the "collection") of a SQL database
 * reached through sea-orm. Rows written by older feeds are not always clean:
 * timestamps may be native datetimes, ISO-8601 text or epoch seconds, and
 * numbers may arrive as text. Rows are therefore read as [`RawReading`]s made
 * of loosely typed [`FieldValue`]s and coerced by the consumer.
 */

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

mod sql;

pub use sql::SeaOrmReadingStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: DbErr,
    },

    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

/// Location of the readings table, optionally qualified by a schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRef {
    schema: Option<String>,
    table: String,
}

impl CollectionRef {
    pub fn new(schema: Option<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.filter(|s| !s.is_empty()),
            table: table.into(),
        }
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.table),
            None => f.write_str(&self.table),
        }
    }
}

/// A column value as it came out of the database
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    DateTime(DateTime<Utc>),
    NaiveDateTime(NaiveDateTime),
    Text(String),
    Integer(i64),
    Float(f64),
    Null,
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Interprets the value as a timestamp, converting offset-aware values to
    /// naive UTC. Integers and floats are epoch seconds.
    pub fn to_naive_utc(&self) -> Option<NaiveDateTime> {
        match self {
            FieldValue::DateTime(dt) => Some(dt.naive_utc()),
            FieldValue::NaiveDateTime(dt) => Some(*dt),
            FieldValue::Text(text) => parse_timestamp_text(text).or_else(|| {
                let secs = text.trim().parse::<f64>().ok()?;
                FieldValue::Float(secs).to_naive_utc()
            }),
            FieldValue::Integer(secs) => DateTime::from_timestamp(*secs, 0).map(|dt| dt.naive_utc()),
            FieldValue::Float(secs) if secs.is_finite() => {
                let millis = (secs * 1000.0).round();
                if millis.abs() > i64::MAX as f64 {
                    return None;
                }
                DateTime::from_timestamp_millis(millis as i64).map(|dt| dt.naive_utc())
            }
            FieldValue::Float(_) | FieldValue::Null => None,
        }
    }

    /// Interprets the value as a finite number.
    pub fn to_number(&self) -> Option<f64> {
        let value = match self {
            FieldValue::Float(v) => *v,
            FieldValue::Integer(v) => *v as f64,
            FieldValue::Text(text) => text.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        value.is_finite().then_some(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parses ISO-8601 text. Offset-aware text is converted to naive UTC.
pub fn parse_timestamp_text(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    parse_naive_text(text)
}

/// Parses ISO-8601 text without an offset, or a bare date at midnight.
pub fn parse_naive_text(text: &str) -> Option<NaiveDateTime> {
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// One stored row as read back for retraining or display
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    pub timestamp: FieldValue,
    pub aqi: FieldValue,
    /// Regressor columns by name
    pub regressors: BTreeMap<String, FieldValue>,
}

impl RawReading {
    pub fn regressor(&self, name: &str) -> &FieldValue {
        self.regressors.get(name).unwrap_or(&FieldValue::Null)
    }
}

/// Concentrations reported alongside the AQI, in μg/m³
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PollutantComponents {
    #[serde(default)]
    pub co: f64,
    #[serde(default)]
    pub no: f64,
    #[serde(default)]
    pub no2: f64,
    #[serde(default)]
    pub o3: f64,
    #[serde(default)]
    pub so2: f64,
    #[serde(default)]
    pub pm2_5: f64,
    #[serde(default)]
    pub pm10: f64,
    #[serde(default)]
    pub nh3: f64,
}

/// A validated reading ready to be written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub city: String,
    pub timestamp: DateTime<Utc>,
    pub aqi: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub wind_speed: f64,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub conditions: Option<String>,
    pub components: Option<PollutantComponents>,
}

/// Access to the readings collection
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Every row for `city`, oldest first
    async fn fetch_city(&self, city: &str) -> Result<Vec<RawReading>, StoreError>;

    /// Newest row for `city`
    async fn latest_for_city(&self, city: &str) -> Result<Option<RawReading>, StoreError>;

    async fn insert(&self, reading: &Reading) -> Result<(), StoreError>;

    /// Creates the table if it does not exist yet.
    async fn ensure_collection(&self) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn naive(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn timestamps_coerce_from_every_shape() {
        let expected = naive(2024, 5, 1, 10);
        let cases = vec![
            FieldValue::DateTime(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()),
            FieldValue::NaiveDateTime(expected),
            FieldValue::Text("2024-05-01T10:00:00".into()),
            FieldValue::Text("2024-05-01 10:00:00".into()),
            FieldValue::Text("2024-05-01T15:00:00+05:00".into()),
            FieldValue::Text("2024-05-01T10:00:00Z".into()),
            FieldValue::Integer(expected.and_utc().timestamp()),
            FieldValue::Float(expected.and_utc().timestamp() as f64),
            FieldValue::Text(expected.and_utc().timestamp().to_string()),
        ];
        for case in cases {
            assert_eq!(case.to_naive_utc(), Some(expected), "{case:?}");
        }
    }

    #[test]
    fn bad_timestamps_become_missing() {
        assert_eq!(FieldValue::Text("yesterday".into()).to_naive_utc(), None);
        assert_eq!(FieldValue::Float(f64::NAN).to_naive_utc(), None);
        assert_eq!(FieldValue::Null.to_naive_utc(), None);
    }

    #[test]
    fn bare_date_is_midnight() {
        assert_eq!(parse_naive_text("2024-02-29"), Some(naive(2024, 2, 29, 0)));
    }

    #[test]
    fn numbers_coerce_from_text() {
        assert_eq!(FieldValue::Text(" 152.5 ".into()).to_number(), Some(152.5));
        assert_eq!(FieldValue::Integer(4).to_number(), Some(4.0));
        assert_eq!(FieldValue::Text("n/a".into()).to_number(), None);
        assert_eq!(FieldValue::Float(f64::INFINITY).to_number(), None);
        assert_eq!(FieldValue::from(None::<f64>).to_number(), None);
    }

    #[test]
    fn collection_display() {
        assert_eq!(CollectionRef::new(None, "city_data").to_string(), "city_data");
        assert_eq!(
            CollectionRef::new(Some("aqi".into()), "city_data").to_string(),
            "aqi.city_data"
        );
        assert_eq!(CollectionRef::new(Some(String::new()), "t").schema(), None);
    }
}
