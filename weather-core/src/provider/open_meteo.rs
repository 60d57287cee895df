use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::model::{Coordinates, HourlySeries};

use super::{ForecastSource, truncate_body};

pub const OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";
pub const HOURLY_FIELDS: &str =
    "temperature_2m,precipitation,precipitation_probability,uv_index,weather_code";

#[derive(Debug, Serialize)]
struct ForecastQuery<'a> {
    latitude: String,
    longitude: String,
    hourly: &'a str,
    timeformat: &'a str,
    timezone: &'a str,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    hourly: Option<HourlyBlock>,
}

#[derive(Debug, Deserialize)]
struct HourlyBlock {
    time: Option<Vec<String>>,
    temperature_2m: Option<Vec<Option<f64>>>,
    precipitation: Option<Vec<Option<f64>>>,
    precipitation_probability: Option<Vec<Option<f64>>>,
    uv_index: Option<Vec<Option<f64>>>,
    weather_code: Option<Vec<Option<i32>>>,
}

#[derive(Debug, Clone)]
pub struct OpenMeteoProvider {
    http: Client,
    base_url: String,
}

impl OpenMeteoProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FetchError::from_reqwest)?;

        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl ForecastSource for OpenMeteoProvider {
    async fn fetch_hourly(
        &self,
        coordinates: &Coordinates,
        timezone: &str,
    ) -> Result<HourlySeries, FetchError> {
        let query = ForecastQuery {
            latitude: format!("{:.4}", coordinates.latitude),
            longitude: format!("{:.4}", coordinates.longitude),
            hourly: HOURLY_FIELDS,
            timeformat: "iso8601",
            timezone,
        };

        let res = self
            .http
            .get(&self.base_url)
            .query(&query)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = res.status();
        let body = res.text().await.map_err(FetchError::from_reqwest)?;

        if !status.is_success() {
            return Err(FetchError::Failed(format!(
                "Open-Meteo request failed with status {}: {}",
                status,
                truncate_body(&body),
            )));
        }

        let series = parse_forecast_response(&body)?;
        tracing::info!(hours = series.len(), timezone, "fetched hourly forecast");
        Ok(series)
    }
}

fn parse_forecast_response(body: &str) -> Result<HourlySeries, FetchError> {
    let parsed: ForecastResponse = serde_json::from_str(body)
        .map_err(|error| FetchError::Malformed(format!("forecast payload: {error}")))?;

    let hourly = parsed
        .hourly
        .ok_or_else(|| FetchError::Malformed("missing hourly block".to_string()))?;

    let series = HourlySeries {
        time: required("time", hourly.time)?,
        temperature: required_values("temperature_2m", hourly.temperature_2m)?,
        precipitation: zero_filled("precipitation", hourly.precipitation)?,
        precipitation_probability: zero_filled(
            "precipitation_probability",
            hourly.precipitation_probability,
        )?,
        uv_index: zero_filled("uv_index", hourly.uv_index)?,
        weather_code: required_values("weather_code", hourly.weather_code)?,
    };

    series
        .validate()
        .map_err(|error| FetchError::Malformed(error.to_string()))?;
    Ok(series)
}

fn required<T>(field: &str, values: Option<Vec<T>>) -> Result<Vec<T>, FetchError> {
    values.ok_or_else(|| FetchError::Malformed(format!("missing hourly.{field}")))
}

/// Every entry must be present.
fn required_values<T>(
    field: &str,
    values: Option<Vec<Option<T>>>,
) -> Result<Vec<T>, FetchError> {
    required(field, values)?
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            value.ok_or_else(|| FetchError::Malformed(format!("null hourly.{field}[{index}]")))
        })
        .collect()
}

/// Gaps read as zero; the endpoint leaves these null past its model horizon.
fn zero_filled(field: &str, values: Option<Vec<Option<f64>>>) -> Result<Vec<f64>, FetchError> {
    Ok(required(field, values)?
        .into_iter()
        .map(|value| value.unwrap_or(0.0))
        .collect())
}
