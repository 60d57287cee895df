use serde::Serialize;

use crate::align::AlignmentResult;
use crate::error::PipelineError;

/// What a renderer receives after a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastView {
    /// `Weather in Berlin`
    pub title: String,
    /// Place name, or `lat, lon` when reverse geocoding gave nothing.
    pub location_label: String,
    pub timezone: String,
    pub fetched_at_ms: i64,
    pub from_cache: bool,
    pub alignment: AlignmentResult,
}

impl ForecastView {
    pub fn new(
        location_label: String,
        timezone: String,
        fetched_at_ms: i64,
        from_cache: bool,
        alignment: AlignmentResult,
    ) -> Self {
        Self {
            title: format!("Weather in {location_label}"),
            location_label,
            timezone,
            fetched_at_ms,
            from_cache,
            alignment,
        }
    }
}

/// Chart renderer sink.
pub trait RenderSink {
    fn render(&mut self, view: &ForecastView) -> anyhow::Result<()>;

    /// Show a short message in place of the chart.
    fn render_failure(&mut self, error: &PipelineError) -> anyhow::Result<()>;
}

/// Hand one run outcome to `sink`. A superseded run renders nothing; the run
/// that replaced it will.
pub fn deliver(
    outcome: &Result<ForecastView, PipelineError>,
    sink: &mut dyn RenderSink,
) -> anyhow::Result<()> {
    match outcome {
        Ok(view) => sink.render(view),
        Err(PipelineError::Superseded) => Ok(()),
        Err(error) => sink.render_failure(error),
    }
}
