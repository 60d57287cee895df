use thiserror::Error;

/// Structural problems in an hourly series.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeriesError {
    #[error("{field} has {actual} entries, expected {expected}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("timestamp #{index} is not a local ISO-8601 time: {value:?}")]
    InvalidTimestamp { index: usize, value: String },
    #[error("timestamp #{index} does not increase")]
    NotIncreasing { index: usize },
}

/// Location service errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("location request denied: {0}")]
    Denied(String),
    #[error("location service unavailable: {0}")]
    Unavailable(String),
}

/// Reverse geocoding errors. Never leave the location module: the place name
/// is cosmetic, so these are logged and turned into "no name".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeocodeError {
    #[error("geocode transport error: {0}")]
    Transport(String),
    #[error("geocode request timed out")]
    Timeout,
    #[error("geocode returned status {0}")]
    Status(u16),
    #[error("geocode payload: {0}")]
    Parse(String),
    #[error("geocode payload has no usable address fields")]
    MissingAddress,
}

/// Forecast provider errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("forecast request failed: {0}")]
    Failed(String),
    #[error("forecast request timed out")]
    Timeout,
    #[error("malformed forecast response: {0}")]
    Malformed(String),
}

impl FetchError {
    pub(crate) fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::Failed(error.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlignError {
    #[error("every forecast hour precedes the display window")]
    NoDataInWindow,
    #[error("display window is empty")]
    EmptyWindow,
    #[error("invalid hourly series: {0}")]
    InvalidSeries(#[from] SeriesError),
    #[error("unknown time zone {0:?}")]
    UnknownTimezone(String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Terminal failure of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("location denied: {0}")]
    LocationDenied(String),
    #[error("location unavailable: {0}")]
    LocationUnavailable(String),
    #[error("forecast fetch failed: {0}")]
    FetchFailed(String),
    #[error("malformed forecast: {0}")]
    MalformedResponse(String),
    #[error("no forecast data in the display window")]
    NoDataInWindow,
    #[error("display window is empty")]
    EmptyWindow,
    #[error("run superseded by a newer run")]
    Superseded,
}

impl PipelineError {
    /// Short message suitable for showing to the user in place of the chart.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::LocationDenied(_) => "Location denied.",
            Self::LocationUnavailable(_) => "Geolocation not supported.",
            Self::FetchFailed(_) => "Weather error.",
            Self::MalformedResponse(_) => "Weather data was malformed.",
            Self::NoDataInWindow | Self::EmptyWindow => "No weather data available.",
            Self::Superseded => "Refreshing.",
        }
    }
}

impl From<LocationError> for PipelineError {
    fn from(error: LocationError) -> Self {
        match error {
            LocationError::Denied(reason) => Self::LocationDenied(reason),
            LocationError::Unavailable(reason) => Self::LocationUnavailable(reason),
        }
    }
}

impl From<FetchError> for PipelineError {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::Failed(cause) => Self::FetchFailed(cause),
            FetchError::Timeout => Self::FetchFailed("timeout".to_string()),
            FetchError::Malformed(detail) => Self::MalformedResponse(detail),
        }
    }
}

impl From<AlignError> for PipelineError {
    fn from(error: AlignError) -> Self {
        match error {
            AlignError::NoDataInWindow => Self::NoDataInWindow,
            AlignError::EmptyWindow => Self::EmptyWindow,
            other @ (AlignError::InvalidSeries(_) | AlignError::UnknownTimezone(_)) => {
                Self::MalformedResponse(other.to_string())
            }
        }
    }
}
