//! Terminal renderers for the aligned forecast.

use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Local};
use weather_core::{ForecastView, PipelineError, RenderSink};

const MARKER: &str = "▶ now";

/// One row per chart tick (midnight and noon) plus the "now" slot.
pub struct TextRenderer<W: Write> {
    out: W,
}

impl<W: Write> TextRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> RenderSink for TextRenderer<W> {
    fn render(&mut self, view: &ForecastView) -> Result<()> {
        let alignment = &view.alignment;
        writeln!(self.out, "{}", view.title)?;

        let fetched = DateTime::from_timestamp_millis(view.fetched_at_ms)
            .map(|at| at.with_timezone(&Local).format("%H:%M").to_string())
            .unwrap_or_else(|| "?".to_string());
        let origin = if view.from_cache { "cached" } else { "live" };
        writeln!(
            self.out,
            "Timezone: {} · fetched {fetched} ({origin})",
            view.timezone
        )?;
        writeln!(self.out)?;

        let marker = alignment.marker_index();
        let mut rows = alignment.tick_positions.clone();
        rows.extend(marker);
        rows.sort_unstable();
        rows.dedup();

        for slot in rows {
            let Some(detail) = alignment.slot(slot) else {
                continue;
            };
            let label = if marker == Some(slot) {
                MARKER
            } else {
                alignment.labels[slot].as_str()
            };
            writeln!(
                self.out,
                "{label:<7} {heading:<24} {icon} {desc:<18} {temp:>6.1}°C {precip:>5.1} mm {prob:>3.0}%  UV {uv:.0}",
                heading = detail.heading,
                icon = detail.condition.icon(),
                desc = detail.condition.description(),
                temp = detail.temperature,
                precip = detail.precipitation,
                prob = detail.precipitation_probability,
                uv = detail.uv_index,
            )?;
        }

        Ok(())
    }

    fn render_failure(&mut self, error: &PipelineError) -> Result<()> {
        writeln!(self.out, "{}", error.user_message())?;
        Ok(())
    }
}

/// Pretty JSON of the whole view, or `{"error": ...}`.
pub struct JsonRenderer<W: Write> {
    out: W,
}

impl<W: Write> JsonRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> RenderSink for JsonRenderer<W> {
    fn render(&mut self, view: &ForecastView) -> Result<()> {
        serde_json::to_writer_pretty(&mut self.out, view)?;
        writeln!(self.out)?;
        Ok(())
    }

    fn render_failure(&mut self, error: &PipelineError) -> Result<()> {
        let body = serde_json::json!({ "error": error.user_message() });
        serde_json::to_writer_pretty(&mut self.out, &body)?;
        writeln!(self.out)?;
        Ok(())
    }
}
