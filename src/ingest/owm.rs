//! OpenWeatherMap current-weather and air-pollution client.

use super::IngestError;
use crate::config::CityConfig;
use crate::store::PollutantComponents;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const WEATHER_PATH: &str = "/data/2.5/weather";
const AIR_POLLUTION_PATH: &str = "/data/2.5/air_pollution";

/// Current weather for one location, metric units
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherData {
    pub temperature: f64,
    pub humidity: f64,
    pub wind_speed: f64,
    pub conditions: String,
}

/// Current air quality for one location
#[derive(Debug, Clone, PartialEq)]
pub struct AirQuality {
    /// OpenWeatherMap index, 1 (good) to 5 (very poor)
    pub aqi: i64,
    pub components: PollutantComponents,
}

#[derive(Debug, Deserialize)]
struct WeatherResponse {
    main: WeatherMain,
    wind: Wind,
    #[serde(default)]
    weather: Vec<WeatherDescription>,
}

#[derive(Debug, Deserialize)]
struct WeatherMain {
    temp: f64,
    humidity: f64,
}

#[derive(Debug, Deserialize)]
struct Wind {
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct WeatherDescription {
    description: String,
}

#[derive(Debug, Deserialize)]
struct AirPollutionResponse {
    #[serde(default)]
    list: Vec<AirPollutionEntry>,
}

#[derive(Debug, Deserialize)]
struct AirPollutionEntry {
    main: AirPollutionMain,
    #[serde(default)]
    components: PollutantComponents,
}

#[derive(Debug, Deserialize)]
struct AirPollutionMain {
    aqi: i64,
}

#[derive(Debug, Clone)]
pub struct OwmClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl OwmClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, IngestError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("aqi-sentinel/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    pub async fn fetch_weather(&self, city: &CityConfig) -> Result<WeatherData, IngestError> {
        let response: WeatherResponse = self
            .get_json(WEATHER_PATH, city, &[("units", "metric")])
            .await?;
        Ok(WeatherData {
            temperature: response.main.temp,
            humidity: response.main.humidity,
            wind_speed: response.wind.speed,
            conditions: response
                .weather
                .into_iter()
                .next()
                .map(|w| w.description)
                .unwrap_or_default(),
        })
    }

    pub async fn fetch_air_quality(&self, city: &CityConfig) -> Result<AirQuality, IngestError> {
        let response: AirPollutionResponse =
            self.get_json(AIR_POLLUTION_PATH, city, &[]).await?;
        let entry = response
            .list
            .into_iter()
            .next()
            .ok_or(IngestError::NoAirQualityData)?;
        Ok(AirQuality {
            aqi: entry.main.aqi,
            components: entry.components,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        city: &CityConfig,
        extra: &[(&str, &str)],
    ) -> Result<T, IngestError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(city = %city.name, %url, "calling OpenWeatherMap");

        let lat = city.lat.to_string();
        let lon = city.lon.to_string();
        let mut query: Vec<(&str, &str)> =
            vec![("lat", lat.as_str()), ("lon", lon.as_str()), ("appid", self.api_key.as_str())];
        query.extend_from_slice(extra);

        let response = self.http.get(&url).query(&query).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| IngestError::Decode(e.to_string()))
    }
}

/// Plausibility checks on weather values
pub fn validate_weather(data: &WeatherData) -> Result<(), IngestError> {
    let valid = data.temperature > -50.0
        && data.temperature < 70.0
        && (0.0..=100.0).contains(&data.humidity)
        && data.wind_speed >= 0.0;
    if valid {
        Ok(())
    } else {
        Err(IngestError::InvalidData(format!(
            "weather out of range: temperature={} humidity={} wind_speed={}",
            data.temperature, data.humidity, data.wind_speed
        )))
    }
}

/// OpenWeatherMap reports the AQI on a 1 to 5 scale
pub fn validate_air_quality(data: &AirQuality) -> Result<(), IngestError> {
    if (1..=5).contains(&data.aqi) {
        Ok(())
    } else {
        Err(IngestError::InvalidData(format!(
            "aqi {} outside 1..=5",
            data.aqi
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn weather(temperature: f64, humidity: f64, wind_speed: f64) -> WeatherData {
        WeatherData {
            temperature,
            humidity,
            wind_speed,
            conditions: "haze".into(),
        }
    }

    #[test]
    fn weather_ranges() {
        assert!(validate_weather(&weather(35.0, 70.0, 6.5)).is_ok());
        assert!(validate_weather(&weather(-49.9, 0.0, 0.0)).is_ok());
        assert!(validate_weather(&weather(69.9, 100.0, 0.0)).is_ok());
        assert_matches!(
            validate_weather(&weather(70.0, 50.0, 1.0)),
            Err(IngestError::InvalidData(_))
        );
        assert!(validate_weather(&weather(-50.0, 50.0, 1.0)).is_err());
        assert!(validate_weather(&weather(20.0, 101.0, 1.0)).is_err());
        assert!(validate_weather(&weather(20.0, 50.0, -0.1)).is_err());
        assert!(validate_weather(&weather(f64::NAN, 50.0, 1.0)).is_err());
    }

    #[test]
    fn aqi_scale() {
        let quality = |aqi| AirQuality {
            aqi,
            components: PollutantComponents::default(),
        };
        assert!(validate_air_quality(&quality(1)).is_ok());
        assert!(validate_air_quality(&quality(5)).is_ok());
        assert!(validate_air_quality(&quality(0)).is_err());
        assert!(validate_air_quality(&quality(6)).is_err());
    }

    #[test]
    fn parses_air_pollution_payload() {
        let body = r#"{"coord":{"lon":74.3587,"lat":31.5204},
            "list":[{"main":{"aqi":5},
                     "components":{"co":1281.72,"no":0.12,"no2":37.01,"o3":80.11,
                                   "so2":21.22,"pm2_5":152.9,"pm10":201.3,"nh3":17.1},
                     "dt":1717236000}]}"#;
        let parsed: AirPollutionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.list[0].main.aqi, 5);
        assert_eq!(parsed.list[0].components.pm2_5, 152.9);
    }
}
