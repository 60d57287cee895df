//! Cache check, location, fetch, cache write, alignment, in that order.
//!
//! One `Pipeline` serves one display. Runs may be started again at any time
//! (a reload); a new run cancels the one in flight so a late response can
//! never overwrite newer data or state.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::align::align;
use crate::cache::{CacheStore, FileStore};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{AlignError, PipelineError};
use crate::geocode::ReverseGeocoder;
use crate::location::{LocationResolver, SystemLocationResolver, source_from_config};
use crate::model::ForecastPayload;
use crate::provider::{ForecastSource, provider_from_config};
use crate::render::ForecastView;
use crate::timezone::{LocalTimezone, detect_local_timezone, parse_timezone};

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineState {
    Idle,
    Loading,
    Ready(ForecastView),
    /// Terminal until the next explicit `run()`.
    Failed(PipelineError),
}

#[derive(Debug, Default)]
struct RunControl {
    generation: u64,
    in_flight: Option<CancellationToken>,
}

#[derive(Debug)]
pub struct Pipeline {
    cache: CacheStore,
    locator: Arc<dyn LocationResolver>,
    forecast: Arc<dyn ForecastSource>,
    clock: Arc<dyn Clock>,
    timezone: LocalTimezone,
    control: Mutex<RunControl>,
    state: watch::Sender<PipelineState>,
}

impl Pipeline {
    pub fn new(
        cache: CacheStore,
        locator: Arc<dyn LocationResolver>,
        forecast: Arc<dyn ForecastSource>,
        clock: Arc<dyn Clock>,
        timezone: LocalTimezone,
    ) -> Self {
        let (state, _) = watch::channel(PipelineState::Idle);
        Self {
            cache,
            locator,
            forecast,
            clock,
            timezone,
            control: Mutex::new(RunControl::default()),
            state,
        }
    }

    /// Wire the production collaborators described by `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let cache = CacheStore::new(FileStore::new(&config.resolved_cache_dir()?));
        let geocoder = ReverseGeocoder::new(config.geocode_url.clone(), config.request_timeout())?;
        let locator = SystemLocationResolver::new(
            source_from_config(&config.location),
            geocoder,
            config.location_timeout(),
        );
        let forecast: Arc<dyn ForecastSource> = Arc::from(provider_from_config(config)?);
        let timezone = detect_local_timezone(config.timezone.as_deref());

        Ok(Self::new(
            cache,
            Arc::new(locator),
            forecast,
            Arc::new(SystemClock),
            timezone,
        ))
    }

    pub fn state(&self) -> PipelineState {
        self.state.borrow().clone()
    }

    /// Loading-state notifications.
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub fn timezone(&self) -> &LocalTimezone {
        &self.timezone
    }

    /// Run the pipeline once. Returns `Superseded` when a newer run started
    /// before this one finished; such a run leaves cache and state untouched.
    pub async fn run(&self) -> Result<ForecastView, PipelineError> {
        let (generation, cancel) = self.begin();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Superseded),
            outcome = self.acquire(generation) => outcome,
        };

        self.finish(generation, outcome)
    }

    fn begin(&self) -> (u64, CancellationToken) {
        let mut control = self.control.lock();
        if let Some(previous) = control.in_flight.take() {
            tracing::info!(
                generation = control.generation,
                "superseding in-flight forecast run"
            );
            previous.cancel();
        }
        control.generation += 1;
        let token = CancellationToken::new();
        control.in_flight = Some(token.clone());
        self.state.send_replace(PipelineState::Loading);
        (control.generation, token)
    }

    async fn acquire(&self, generation: u64) -> Result<ForecastView, PipelineError> {
        let now_ms = self.clock.now_millis();
        if let Some(entry) = self.cache.read() {
            if CacheStore::is_valid(&entry, now_ms) {
                tracing::debug!(
                    age_ms = now_ms - entry.fetched_at_ms,
                    "serving forecast from cache"
                );
                return self.present(&entry.payload, entry.fetched_at_ms, true);
            }
            tracing::debug!("cached forecast expired");
        }

        let coordinates = self.locator.resolve_coordinates().await?;
        let location_name = self.locator.resolve_place_name(&coordinates).await;
        let hourly = self
            .forecast
            .fetch_hourly(&coordinates, &self.timezone.id)
            .await?;

        let payload = ForecastPayload {
            hourly,
            coordinates,
            location_name,
            timezone: self.timezone.id.clone(),
        };
        let fetched_at_ms = self.clock.now_millis();
        self.persist(generation, &payload, fetched_at_ms)?;

        self.present(&payload, fetched_at_ms, false)
    }

    fn persist(
        &self,
        generation: u64,
        payload: &ForecastPayload,
        fetched_at_ms: i64,
    ) -> Result<(), PipelineError> {
        let control = self.control.lock();
        if control.generation != generation {
            return Err(PipelineError::Superseded);
        }
        // A failed write costs a refetch next time, not this render.
        if let Err(error) = self.cache.write(payload, fetched_at_ms) {
            tracing::warn!(%error, "failed to persist forecast cache");
        }
        Ok(())
    }

    fn present(
        &self,
        payload: &ForecastPayload,
        fetched_at_ms: i64,
        from_cache: bool,
    ) -> Result<ForecastView, PipelineError> {
        let tz = parse_timezone(&payload.timezone)
            .ok_or_else(|| AlignError::UnknownTimezone(payload.timezone.clone()))?;
        let alignment = align(&payload.hourly, self.clock.now(), tz)?;

        Ok(ForecastView::new(
            payload.display_label(),
            payload.timezone.clone(),
            fetched_at_ms,
            from_cache,
            alignment,
        ))
    }

    fn finish(
        &self,
        generation: u64,
        outcome: Result<ForecastView, PipelineError>,
    ) -> Result<ForecastView, PipelineError> {
        let mut control = self.control.lock();
        if control.generation != generation {
            return Err(PipelineError::Superseded);
        }
        control.in_flight = None;

        match &outcome {
            Ok(view) => {
                tracing::info!(
                    location = %view.location_label,
                    from_cache = view.from_cache,
                    hours = view.alignment.window_length,
                    "forecast ready"
                );
                self.state.send_replace(PipelineState::Ready(view.clone()));
            }
            Err(error) => {
                tracing::warn!(%error, "forecast pipeline failed");
                self.state.send_replace(PipelineState::Failed(error.clone()));
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use tokio::sync::Notify;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::cache::{KeyValueStore, MemoryStore};
    use crate::clock::FixedClock;
    use crate::error::{CacheError, FetchError, LocationError};
    use crate::location::FixedSource;
    use crate::model::{Coordinates, HourlySeries, fixtures::hourly_series};

    #[derive(Debug)]
    struct FakeLocator {
        coordinates: Result<Coordinates, LocationError>,
        place_name: Option<String>,
        calls: AtomicUsize,
    }

    impl FakeLocator {
        fn berlin() -> Self {
            Self {
                coordinates: Ok(Coordinates::rounded(52.52, 13.405)),
                place_name: Some("Berlin".to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(error: LocationError) -> Self {
            Self {
                coordinates: Err(error),
                ..Self::berlin()
            }
        }
    }

    #[async_trait]
    impl LocationResolver for FakeLocator {
        async fn resolve_coordinates(&self) -> Result<Coordinates, LocationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.coordinates.clone()
        }

        async fn resolve_place_name(&self, _coordinates: &Coordinates) -> Option<String> {
            self.place_name.clone()
        }
    }

    #[derive(Debug)]
    enum Reply {
        Series(Result<HourlySeries, FetchError>),
        Hang,
    }

    #[derive(Debug)]
    struct FakeForecast {
        replies: parking_lot::Mutex<VecDeque<Reply>>,
        calls: AtomicUsize,
        entered: Notify,
    }

    impl FakeForecast {
        fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: parking_lot::Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
                entered: Notify::new(),
            }
        }

        fn week() -> Self {
            Self::new(vec![
                Reply::Series(Ok(hourly_series("2024-01-01T00:00", 200))),
                Reply::Series(Ok(hourly_series("2024-01-01T00:00", 200))),
            ])
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ForecastSource for FakeForecast {
        async fn fetch_hourly(
            &self,
            _coordinates: &Coordinates,
            _timezone: &str,
        ) -> Result<HourlySeries, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            let reply = self.replies.lock().pop_front();
            match reply {
                Some(Reply::Series(result)) => result,
                Some(Reply::Hang) => std::future::pending().await,
                None => Err(FetchError::Failed("no scripted reply".to_string())),
            }
        }
    }

    struct Harness {
        pipeline: Arc<Pipeline>,
        store: Arc<MemoryStore>,
        clock: Arc<FixedClock>,
        locator: Arc<FakeLocator>,
        forecast: Arc<FakeForecast>,
    }

    fn harness(locator: FakeLocator, forecast: FakeForecast) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).single().expect("time"),
        ));
        let locator = Arc::new(locator);
        let forecast = Arc::new(forecast);
        let pipeline = Pipeline::new(
            CacheStore::new(store.clone()),
            locator.clone(),
            forecast.clone(),
            clock.clone(),
            LocalTimezone::utc(),
        );

        Harness {
            pipeline: Arc::new(pipeline),
            store,
            clock,
            locator,
            forecast,
        }
    }

    impl Harness {
        fn cached(&self) -> Option<crate::model::CacheEntry> {
            CacheStore::new(self.store.clone()).read()
        }
    }

    #[tokio::test]
    async fn cold_run_fetches_caches_and_aligns() {
        let h = harness(FakeLocator::berlin(), FakeForecast::week());
        assert_eq!(h.pipeline.state(), PipelineState::Idle);

        let view = h.pipeline.run().await.expect("ready");

        assert_eq!(view.title, "Weather in Berlin");
        assert!(!view.from_cache);
        assert_eq!(view.alignment.window_start_index, 32);
        assert_eq!(view.alignment.window_length, 168);
        assert_eq!(view.timezone, "UTC");
        assert_eq!(h.forecast.calls(), 1);

        let cached = h.cached().expect("cache written");
        assert_eq!(cached.fetched_at_ms, h.clock.now_millis());
        assert_eq!(cached.payload.location_name.as_deref(), Some("Berlin"));
        assert_eq!(h.pipeline.state(), PipelineState::Ready(view));
    }

    #[tokio::test]
    async fn fresh_cache_skips_location_and_fetch() {
        let h = harness(FakeLocator::berlin(), FakeForecast::week());
        h.pipeline.run().await.expect("first");

        h.clock.advance(Duration::minutes(59));
        let view = h.pipeline.run().await.expect("second");

        assert!(view.from_cache);
        assert_eq!(h.forecast.calls(), 1);
        assert_eq!(h.locator.calls.load(Ordering::SeqCst), 1);
        // alignment follows the clock, not the fetch time
        assert_eq!(view.alignment.window_start_index, 33);
        assert_eq!(view.alignment.current_moment_offset, 2);
    }

    #[tokio::test]
    async fn cache_expires_after_exactly_one_hour() {
        let h = harness(FakeLocator::berlin(), FakeForecast::week());
        h.pipeline.run().await.expect("first");

        h.clock.advance(Duration::hours(1));
        let view = h.pipeline.run().await.expect("second");

        assert!(!view.from_cache);
        assert_eq!(h.forecast.calls(), 2);
        assert_eq!(h.cached().expect("entry").fetched_at_ms, h.clock.now_millis());
    }

    #[tokio::test]
    async fn denied_location_fails_without_fetching() {
        let h = harness(
            FakeLocator::failing(LocationError::Denied("user refused".into())),
            FakeForecast::week(),
        );

        let err = h.pipeline.run().await.unwrap_err();

        assert_eq!(err.user_message(), "Location denied.");
        assert_eq!(h.forecast.calls(), 0);
        assert_eq!(h.pipeline.state(), PipelineState::Failed(err.clone()));

        // no automatic recovery
        tokio::task::yield_now().await;
        assert_eq!(h.pipeline.state(), PipelineState::Failed(err));
    }

    #[tokio::test]
    async fn unavailable_location_is_reported() {
        let h = harness(
            FakeLocator::failing(LocationError::Unavailable("no geoclue".into())),
            FakeForecast::week(),
        );

        let err = h.pipeline.run().await.unwrap_err();
        assert_eq!(err, PipelineError::LocationUnavailable("no geoclue".into()));
        assert_eq!(err.user_message(), "Geolocation not supported.");
    }

    #[derive(Debug)]
    struct ReadOnlyStore;

    impl KeyValueStore for ReadOnlyStore {
        fn get_many(&self, keys: &[&str]) -> Vec<Option<String>> {
            vec![None; keys.len()]
        }

        fn set_all(&self, _entries: &[(&str, String)]) -> Result<(), CacheError> {
            Err(CacheError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only cache dir",
            )))
        }
    }

    #[tokio::test]
    async fn cache_write_failure_still_renders() {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).single().expect("time"),
        ));
        let forecast = Arc::new(FakeForecast::week());
        let pipeline = Pipeline::new(
            CacheStore::new(ReadOnlyStore),
            Arc::new(FakeLocator::berlin()),
            forecast.clone(),
            clock,
            LocalTimezone::utc(),
        );

        let view = pipeline.run().await.expect("ready despite write failure");
        assert!(!view.from_cache);
        assert_eq!(pipeline.state(), PipelineState::Ready(view));

        // nothing was stored, so the next run fetches again
        pipeline.run().await.expect("second run");
        assert_eq!(forecast.calls(), 2);
    }

    #[tokio::test]
    async fn fetch_failure_leaves_cache_empty() {
        let h = harness(
            FakeLocator::berlin(),
            FakeForecast::new(vec![Reply::Series(Err(FetchError::Timeout))]),
        );

        let err = h.pipeline.run().await.unwrap_err();

        assert_eq!(err, PipelineError::FetchFailed("timeout".to_string()));
        assert_eq!(err.user_message(), "Weather error.");
        assert!(h.cached().is_none());
    }

    #[tokio::test]
    async fn missing_place_name_uses_coordinates() {
        let locator = FakeLocator {
            place_name: None,
            ..FakeLocator::berlin()
        };
        let h = harness(locator, FakeForecast::week());

        let view = h.pipeline.run().await.expect("ready");
        assert_eq!(view.location_label, "52.5200, 13.4050");
        assert_eq!(view.title, "Weather in 52.5200, 13.4050");
    }

    #[tokio::test]
    async fn fresh_but_outdated_cache_reports_no_data() {
        let h = harness(
            FakeLocator::berlin(),
            FakeForecast::new(vec![Reply::Series(Ok(hourly_series(
                "2023-12-20T00:00",
                24,
            )))]),
        );

        let err = h.pipeline.run().await.unwrap_err();
        assert_eq!(err, PipelineError::NoDataInWindow);
        assert_eq!(err.user_message(), "No weather data available.");
    }

    #[tokio::test]
    async fn newer_run_supersedes_in_flight_fetch() {
        let h = harness(
            FakeLocator::berlin(),
            FakeForecast::new(vec![
                Reply::Hang,
                Reply::Series(Ok(hourly_series("2024-01-01T00:00", 190))),
            ]),
        );

        let first = tokio::spawn({
            let pipeline = h.pipeline.clone();
            async move { pipeline.run().await }
        });
        h.forecast.entered.notified().await;
        assert_eq!(h.pipeline.state(), PipelineState::Loading);

        let second = h.pipeline.run().await.expect("second run");
        let first = first.await.expect("join");

        assert_eq!(first, Err(PipelineError::Superseded));
        assert_eq!(h.pipeline.state(), PipelineState::Ready(second));
        assert_eq!(h.cached().expect("entry").payload.hourly.len(), 190);
        assert_eq!(h.forecast.calls(), 2);
    }

    #[tokio::test]
    async fn subscribers_observe_final_state() {
        let h = harness(FakeLocator::berlin(), FakeForecast::week());
        let mut rx = h.pipeline.subscribe();
        assert_eq!(*rx.borrow_and_update(), PipelineState::Idle);

        h.pipeline.run().await.expect("ready");

        assert!(rx.has_changed().expect("sender alive"));
        assert!(matches!(*rx.borrow_and_update(), PipelineState::Ready(_)));
    }

    #[tokio::test]
    async fn geocode_timeout_still_reaches_ready() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(StdDuration::from_secs(2))
                    .set_body_json(serde_json::json!({ "address": { "city": "Berlin" } })),
            )
            .mount(&server)
            .await;

        let geocoder =
            ReverseGeocoder::new(server.uri(), StdDuration::from_millis(200)).expect("client");
        let locator = SystemLocationResolver::new(
            Box::new(FixedSource::new(Some(Coordinates::rounded(52.52, 13.405)))),
            geocoder,
            StdDuration::from_secs(5),
        );
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).single().expect("time"),
        ));
        let pipeline = Pipeline::new(
            CacheStore::in_memory(),
            Arc::new(locator),
            Arc::new(FakeForecast::week()),
            clock,
            LocalTimezone::utc(),
        );

        let view = pipeline.run().await.expect("ready despite geocode timeout");
        assert_eq!(view.location_label, "52.5200, 13.4050");
        assert!(matches!(pipeline.state(), PipelineState::Ready(_)));
    }
}
