//! Reverse geocoding: convert coordinates to human-readable place names.
//! Uses Nominatim (OpenStreetMap) - free, no API key required.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::GeocodeError;
use crate::model::Coordinates;

pub const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/reverse";
const USER_AGENT: &str = concat!("hourly-weather/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
struct ReverseQuery {
    format: &'static str,
    lat: String,
    lon: String,
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    address: Option<NominatimAddress>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct NominatimAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    state: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReverseGeocoder {
    http: Client,
    base_url: String,
}

impl ReverseGeocoder {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GeocodeError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|error| GeocodeError::Transport(error.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    /// Best-effort place name; failures are logged and yield `None`.
    pub async fn place_name(&self, coordinates: &Coordinates) -> Option<String> {
        match self.lookup(coordinates).await {
            Ok(name) => {
                tracing::info!(place = %name, "reverse geocoded location");
                Some(name)
            }
            Err(error) => {
                tracing::warn!(%error, "reverse geocoding failed; using coordinates");
                None
            }
        }
    }

    pub async fn lookup(&self, coordinates: &Coordinates) -> Result<String, GeocodeError> {
        let query = ReverseQuery {
            format: "json",
            lat: format!("{:.4}", coordinates.latitude),
            lon: format!("{:.4}", coordinates.longitude),
        };

        let response = self
            .http
            .get(&self.base_url)
            .query(&query)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeocodeError::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(classify)?;
        let parsed: NominatimResponse =
            serde_json::from_str(&body).map_err(|error| GeocodeError::Parse(error.to_string()))?;

        parsed
            .address
            .as_ref()
            .and_then(extract_place_name)
            .ok_or(GeocodeError::MissingAddress)
    }
}

fn classify(error: reqwest::Error) -> GeocodeError {
    if error.is_timeout() {
        GeocodeError::Timeout
    } else {
        GeocodeError::Transport(error.to_string())
    }
}

/// City, then town, then village, then state; first non-empty wins.
pub(crate) fn extract_place_name(address: &NominatimAddress) -> Option<String> {
    [&address.city, &address.town, &address.village, &address.state]
        .into_iter()
        .flatten()
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
        .map(ToString::to_string)
}
