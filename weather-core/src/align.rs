//! Alignment of a fetched hourly series against the wall clock.
//!
//! The display window starts a couple of hours before "now" and spans a week.
//! Everything the chart needs (slices, tick labels, bar weights, condition
//! categories and the position of the "now" marker) is derived here once, so
//! consumers never redo index arithmetic against the raw series.

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::condition::WeatherCondition;
use crate::error::AlignError;
use crate::model::{HourlySeries, parse_local_timestamp};

pub const LOOK_BACK_HOURS: i64 = 2;
pub const WINDOW_HOURS: usize = 24 * 7;

pub const NOON_LABEL: &str = "12PM";
const MIN_BAR_OPACITY: f64 = 0.3;
const MAX_BAR_OPACITY: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignOptions {
    pub look_back_hours: i64,
    pub window_hours: usize,
}

impl Default for AlignOptions {
    fn default() -> Self {
        Self {
            look_back_hours: LOOK_BACK_HOURS,
            window_hours: WINDOW_HOURS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PrecipitationSlot {
    pub amount: f64,
    pub probability: f64,
    pub opacity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignmentResult {
    /// Index into the source series of the first slot in the window.
    pub window_start_index: usize,
    /// Slot of the first hour at or after now, relative to the window start.
    pub current_moment_offset: i64,
    pub window_length: usize,
    pub time: Vec<String>,
    pub labels: Vec<String>,
    pub tick_positions: Vec<usize>,
    pub temperature: Vec<f64>,
    pub precipitation: Vec<PrecipitationSlot>,
    pub uv_index: Vec<f64>,
    pub weather_code: Vec<i32>,
    pub conditions: Vec<WeatherCondition>,
}

/// Everything shown when hovering one hour of the chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotDetail {
    pub slot: usize,
    pub timestamp: String,
    /// e.g. `Tue, Jan 2 · 10:00 AM`
    pub heading: String,
    pub condition: WeatherCondition,
    pub temperature: f64,
    pub precipitation: f64,
    pub precipitation_probability: f64,
    pub uv_index: f64,
}

impl AlignmentResult {
    /// Marker slot when now falls inside the window.
    pub fn marker_index(&self) -> Option<usize> {
        usize::try_from(self.current_moment_offset)
            .ok()
            .filter(|offset| *offset < self.window_length)
    }

    pub fn slot(&self, slot: usize) -> Option<SlotDetail> {
        let timestamp = self.time.get(slot)?;
        let precipitation = self.precipitation.get(slot)?;
        let heading = parse_local_timestamp(timestamp)
            .map(|t| t.format("%a, %b %-d · %I:%M %p").to_string())
            .unwrap_or_else(|| timestamp.clone());

        Some(SlotDetail {
            slot,
            timestamp: timestamp.clone(),
            heading,
            condition: *self.conditions.get(slot)?,
            temperature: *self.temperature.get(slot)?,
            precipitation: precipitation.amount,
            precipitation_probability: precipitation.probability,
            uv_index: *self.uv_index.get(slot)?,
        })
    }
}

/// Align with the default two-hour look-back and one-week window.
pub fn align(
    series: &HourlySeries,
    now: DateTime<Utc>,
    tz: Tz,
) -> Result<AlignmentResult, AlignError> {
    align_with(series, now, tz, AlignOptions::default())
}

pub fn align_with(
    series: &HourlySeries,
    now: DateTime<Utc>,
    tz: Tz,
    options: AlignOptions,
) -> Result<AlignmentResult, AlignError> {
    let times = series.parsed_times()?;

    let now_local = now.with_timezone(&tz).naive_local();
    let anchor = (now - Duration::hours(options.look_back_hours))
        .with_timezone(&tz)
        .naive_local();

    // `times` is strictly increasing, so "first index >= x" is a partition point.
    let window_start_index = times.partition_point(|t| *t < anchor);
    if window_start_index == times.len() {
        return Err(AlignError::NoDataInWindow);
    }

    let current_moment_index = times.partition_point(|t| *t < now_local);
    let current_moment_offset = current_moment_index as i64 - window_start_index as i64;

    let window_length = options.window_hours.min(times.len() - window_start_index);
    if window_length == 0 {
        return Err(AlignError::EmptyWindow);
    }
    let window = window_start_index..window_start_index + window_length;

    let (labels, tick_positions) = tick_labels(&times[window.clone()]);

    let precipitation = series.precipitation[window.clone()]
        .iter()
        .zip(&series.precipitation_probability[window.clone()])
        .map(|(&amount, &probability)| PrecipitationSlot {
            amount,
            probability,
            opacity: precipitation_opacity(probability),
        })
        .collect();

    let weather_code = series.weather_code[window.clone()].to_vec();
    let conditions = weather_code
        .iter()
        .map(|&code| WeatherCondition::from_wmo_code(code))
        .collect();

    tracing::debug!(
        window_start_index,
        current_moment_offset,
        window_length,
        "aligned hourly series"
    );

    Ok(AlignmentResult {
        window_start_index,
        current_moment_offset,
        window_length,
        time: series.time[window.clone()].to_vec(),
        labels,
        tick_positions,
        temperature: series.temperature[window.clone()].to_vec(),
        precipitation,
        uv_index: series.uv_index[window].to_vec(),
        weather_code,
        conditions,
    })
}

/// Midnight slots get `Tue-2`, noon slots get `12PM`; both are ticks.
fn tick_labels(times: &[NaiveDateTime]) -> (Vec<String>, Vec<usize>) {
    let mut labels = Vec::with_capacity(times.len());
    let mut ticks = Vec::new();

    for (slot, t) in times.iter().enumerate() {
        match t.hour() {
            0 => {
                labels.push(format!("{}-{}", t.format("%a"), t.day()));
                ticks.push(slot);
            }
            12 => {
                labels.push(NOON_LABEL.to_string());
                ticks.push(slot);
            }
            _ => labels.push(String::new()),
        }
    }

    (labels, ticks)
}

/// Bar weight for a precipitation probability in percent.
pub fn precipitation_opacity(probability: f64) -> f64 {
    if !probability.is_finite() {
        return MIN_BAR_OPACITY;
    }
    (MIN_BAR_OPACITY + probability / 100.0).clamp(MIN_BAR_OPACITY, MAX_BAR_OPACITY)
}
