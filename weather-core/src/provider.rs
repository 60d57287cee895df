use std::fmt::Debug;

use async_trait::async_trait;

use crate::{Config, HourlySeries, error::FetchError, model::Coordinates};

pub mod open_meteo;

pub use open_meteo::OpenMeteoProvider;

/// Hourly forecast source.
#[async_trait]
pub trait ForecastSource: Send + Sync + Debug {
    /// One request, no retries. Timestamps come back in `timezone`.
    async fn fetch_hourly(
        &self,
        coordinates: &Coordinates,
        timezone: &str,
    ) -> Result<HourlySeries, FetchError>;
}

/// Construct the forecast provider described by config.
pub fn provider_from_config(config: &Config) -> Result<Box<dyn ForecastSource>, FetchError> {
    let provider = OpenMeteoProvider::new(config.forecast_url.clone(), config.request_timeout())?;
    Ok(Box::new(provider))
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}
