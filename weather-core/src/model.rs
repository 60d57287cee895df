use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::SeriesError;

/// Minute-precision local timestamp format used by the forecast endpoint.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M";
const TIMESTAMP_FORMAT_SECONDS: &str = "%Y-%m-%dT%H:%M:%S";

/// Device position in decimal degrees, kept at 4 decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// Build coordinates rounded to 4 decimal places (~11 m), which keeps the
    /// cached payload stable across small GPS jitter.
    pub fn rounded(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: round4(latitude),
            longitude: round4(longitude),
        }
    }

    /// `"52.5200, 13.4050"`
    pub fn label(&self) -> String {
        format!("{:.4}, {:.4}", self.latitude, self.longitude)
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Parallel hourly arrays as returned by the forecast endpoint.
///
/// All vectors share one length and `time[i]` is the local timestamp for the
/// values at index `i`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HourlySeries {
    pub time: Vec<String>,
    pub temperature: Vec<f64>,
    pub precipitation: Vec<f64>,
    pub precipitation_probability: Vec<f64>,
    pub uv_index: Vec<f64>,
    pub weather_code: Vec<i32>,
}

impl HourlySeries {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Check the structural invariants: equal lengths, parseable timestamps,
    /// strictly increasing order.
    pub fn validate(&self) -> Result<(), SeriesError> {
        self.parsed_times().map(|_| ())
    }

    /// Parse every timestamp, validating the series along the way.
    pub fn parsed_times(&self) -> Result<Vec<NaiveDateTime>, SeriesError> {
        let expected = self.time.len();
        let lengths = [
            ("temperature", self.temperature.len()),
            ("precipitation", self.precipitation.len()),
            ("precipitation_probability", self.precipitation_probability.len()),
            ("uv_index", self.uv_index.len()),
            ("weather_code", self.weather_code.len()),
        ];
        for (field, actual) in lengths {
            if actual != expected {
                return Err(SeriesError::LengthMismatch {
                    field,
                    expected,
                    actual,
                });
            }
        }

        let mut parsed: Vec<NaiveDateTime> = Vec::with_capacity(expected);
        for (index, raw) in self.time.iter().enumerate() {
            let value = parse_local_timestamp(raw).ok_or_else(|| SeriesError::InvalidTimestamp {
                index,
                value: raw.clone(),
            })?;
            if let Some(previous) = parsed.last()
                && *previous >= value
            {
                return Err(SeriesError::NotIncreasing { index });
            }
            parsed.push(value);
        }

        Ok(parsed)
    }
}

/// Parse `2024-01-02T08:00` (or with seconds) as a naive local date-time.
pub fn parse_local_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT_SECONDS))
        .ok()
}

/// Everything one successful fetch produced. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPayload {
    pub hourly: HourlySeries,
    pub coordinates: Coordinates,
    #[serde(default)]
    pub location_name: Option<String>,
    /// IANA identifier the hourly timestamps are expressed in.
    pub timezone: String,
}

impl ForecastPayload {
    /// Place name when known, raw coordinates otherwise.
    pub fn display_label(&self) -> String {
        self.location_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(ToString::to_string)
            .unwrap_or_else(|| self.coordinates.label())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub payload: ForecastPayload,
    pub fetched_at_ms: i64,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::Duration;

    use super::*;

    /// `hours` consecutive hourly points starting at `start` with simple
    /// deterministic values.
    pub(crate) fn hourly_series(start: &str, hours: usize) -> HourlySeries {
        let start = parse_local_timestamp(start).expect("fixture start");
        let mut series = HourlySeries::default();
        for i in 0..hours {
            let t = start + Duration::hours(i as i64);
            series.time.push(t.format(TIMESTAMP_FORMAT).to_string());
            series.temperature.push(10.0 + (i % 24) as f64 * 0.5);
            series.precipitation.push(if i % 5 == 0 { 1.2 } else { 0.0 });
            series.precipitation_probability.push((i % 11) as f64 * 10.0);
            series.uv_index.push((i % 24) as f64 / 4.0);
            series.weather_code.push(if i % 2 == 0 { 61 } else { 3 });
        }
        series
    }

    pub(crate) fn payload(start: &str, hours: usize) -> ForecastPayload {
        ForecastPayload {
            hourly: hourly_series(start, hours),
            coordinates: Coordinates::rounded(52.52, 13.405),
            location_name: Some("Berlin".to_string()),
            timezone: "UTC".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::hourly_series;
    use super::*;

    #[test]
    fn coordinates_are_rounded_to_four_places() {
        let coords = Coordinates::rounded(52.520008, 13.404954);
        assert_eq!(coords.latitude, 52.52);
        assert_eq!(coords.longitude, 13.405);
        assert_eq!(coords.label(), "52.5200, 13.4050");
    }

    #[test]
    fn parses_minute_and_second_precision_timestamps() {
        assert!(parse_local_timestamp("2024-01-02T08:00").is_some());
        assert!(parse_local_timestamp("2024-01-02T08:00:00").is_some());
        assert!(parse_local_timestamp("2024-01-02 08:00").is_none());
    }

    #[test]
    fn validate_accepts_fixture_series() {
        let series = hourly_series("2024-01-01T00:00", 48);
        assert!(series.validate().is_ok());
        assert_eq!(series.len(), 48);
    }

    #[test]
    fn validate_rejects_length_mismatch() {
        let mut series = hourly_series("2024-01-01T00:00", 4);
        series.uv_index.pop();

        let err = series.validate().unwrap_err();
        assert_eq!(
            err,
            SeriesError::LengthMismatch {
                field: "uv_index",
                expected: 4,
                actual: 3,
            }
        );
    }

    #[test]
    fn validate_rejects_out_of_order_timestamps() {
        let mut series = hourly_series("2024-01-01T00:00", 4);
        series.time.swap(1, 2);

        assert_eq!(
            series.validate().unwrap_err(),
            SeriesError::NotIncreasing { index: 2 }
        );
    }

    #[test]
    fn validate_rejects_garbage_timestamp() {
        let mut series = hourly_series("2024-01-01T00:00", 2);
        series.time[1] = "tomorrow".to_string();

        assert!(matches!(
            series.validate().unwrap_err(),
            SeriesError::InvalidTimestamp { index: 1, .. }
        ));
    }

    #[test]
    fn display_label_falls_back_to_coordinates() {
        let mut payload = fixtures::payload("2024-01-01T00:00", 1);
        assert_eq!(payload.display_label(), "Berlin");

        payload.location_name = Some("  ".to_string());
        assert_eq!(payload.display_label(), "52.5200, 13.4050");

        payload.location_name = None;
        assert_eq!(payload.display_label(), "52.5200, 13.4050");
    }
}
