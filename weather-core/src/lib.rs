//! Core library for the `hourly-weather` CLI.
//!
//! This crate defines:
//! - Configuration handling and local timezone detection
//! - Device location and reverse geocoding
//! - The Open-Meteo hourly forecast client and its one-hour cache
//! - Alignment of the hourly series against "now" for a week-long chart
//! - The pipeline tying those together, and the sink renderers plug into
//!
//! It is used by `weather-cli`, but can also be reused by other binaries or services.

pub mod align;
pub mod cache;
pub mod clock;
pub mod condition;
pub mod config;
pub mod error;
pub mod geocode;
pub mod location;
pub mod model;
pub mod pipeline;
pub mod provider;
pub mod render;
pub mod timezone;

pub use align::{AlignOptions, AlignmentResult, SlotDetail, align};
pub use cache::CacheStore;
pub use condition::WeatherCondition;
pub use config::{Config, LocationConfig, LocationSourceKind};
pub use error::PipelineError;
pub use model::{Coordinates, ForecastPayload, HourlySeries};
pub use pipeline::{Pipeline, PipelineState};
pub use provider::ForecastSource;
pub use render::{ForecastView, RenderSink};
pub use timezone::LocalTimezone;
