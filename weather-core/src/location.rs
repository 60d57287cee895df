use std::fmt::Debug;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::config::{LocationConfig, LocationSourceKind};
use crate::error::LocationError;
use crate::geocode::ReverseGeocoder;
use crate::model::Coordinates;

/// Install locations of the GeoClue demo agent across distributions.
const WHERE_AM_I_CANDIDATES: &[&str] = &[
    "/usr/lib/geoclue-2.0/demos/where-am-i",
    "/usr/libexec/geoclue-2.0/demos/where-am-i",
];

/// Platform location capability.
#[async_trait]
pub trait LocationSource: Send + Sync + Debug {
    async fn locate(&self) -> Result<Coordinates, LocationError>;
}

/// Coordinates and optional place name for the pipeline.
#[async_trait]
pub trait LocationResolver: Send + Sync + Debug {
    async fn resolve_coordinates(&self) -> Result<Coordinates, LocationError>;

    /// Cosmetic; never fails.
    async fn resolve_place_name(&self, coordinates: &Coordinates) -> Option<String>;
}

/// Coordinates taken from configuration.
#[derive(Debug, Clone)]
pub struct FixedSource {
    coordinates: Option<Coordinates>,
}

impl FixedSource {
    pub fn new(coordinates: Option<Coordinates>) -> Self {
        Self { coordinates }
    }
}

#[async_trait]
impl LocationSource for FixedSource {
    async fn locate(&self) -> Result<Coordinates, LocationError> {
        self.coordinates
            .map(|c| Coordinates::rounded(c.latitude, c.longitude))
            .ok_or_else(|| {
                LocationError::Unavailable("no fixed coordinates configured".to_string())
            })
    }
}

/// Asks GeoClue through its `where-am-i` agent, which honours the desktop's
/// location permission settings.
#[derive(Debug, Clone)]
pub struct GeoclueSource {
    helper: PathBuf,
}

impl GeoclueSource {
    pub fn new(helper: PathBuf) -> Self {
        Self { helper }
    }

    /// First installed helper, or the conventional path when none is found.
    pub fn discover() -> Self {
        let helper = WHERE_AM_I_CANDIDATES
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .unwrap_or_else(|| Path::new(WHERE_AM_I_CANDIDATES[0]));
        Self::new(helper.to_path_buf())
    }
}

#[async_trait]
impl LocationSource for GeoclueSource {
    /// The agent keeps running after its first fix, so stdout is read line by
    /// line and the child is killed once a full position has been seen.
    async fn locate(&self) -> Result<Coordinates, LocationError> {
        let mut child = Command::new(&self.helper)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| match error.kind() {
                io::ErrorKind::NotFound => LocationError::Unavailable(format!(
                    "{} not found; is geoclue installed?",
                    self.helper.display()
                )),
                io::ErrorKind::PermissionDenied => LocationError::Denied(error.to_string()),
                _ => LocationError::Unavailable(error.to_string()),
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LocationError::Unavailable("where-am-i stdout not captured".into()))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut fix = PartialFix::default();

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|error| LocationError::Unavailable(error.to_string()))?
        {
            fix.update(&line);
            let Some((latitude, longitude)) = fix.complete() else {
                continue;
            };
            if let Err(error) = child.start_kill() {
                tracing::debug!(%error, "where-am-i already exited");
            }
            return in_range(latitude, longitude).ok_or_else(|| {
                LocationError::Unavailable(format!(
                    "where-am-i reported an impossible position {latitude}, {longitude}"
                ))
            });
        }

        let mut stderr = String::new();
        if let Some(mut pipe) = child.stderr.take()
            && let Err(error) = pipe.read_to_string(&mut stderr).await
        {
            tracing::debug!(%error, "could not read where-am-i stderr");
        }
        let status = child
            .wait()
            .await
            .map_err(|error| LocationError::Unavailable(error.to_string()))?;

        if status.success() {
            return Err(LocationError::Unavailable(
                "no position in where-am-i output".into(),
            ));
        }
        Err(classify_exit(stderr.trim(), &status.to_string()))
    }
}

/// GeoClue rejects clients it has no agent authorisation for with a D-Bus
/// `AccessDenied`; every other failure means the service is not usable here.
fn classify_exit(stderr: &str, status: &str) -> LocationError {
    let detail = if stderr.is_empty() {
        format!("where-am-i exited with {status}")
    } else {
        stderr.to_string()
    };

    let lowered = stderr.to_lowercase();
    let refused = ["accessdenied", "access denied", "disallowed", "not authorized"]
        .iter()
        .any(|marker| lowered.contains(marker));

    if refused {
        LocationError::Denied(detail)
    } else {
        LocationError::Unavailable(detail)
    }
}

#[derive(Debug, Default)]
struct PartialFix {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl PartialFix {
    fn update(&mut self, line: &str) {
        if let Some(value) = field_value(line, "Latitude:") {
            self.latitude = Some(value);
        } else if let Some(value) = field_value(line, "Longitude:") {
            self.longitude = Some(value);
        }
    }

    fn complete(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }
}

/// `Latitude:    52.520008°` -> `52.520008`
fn field_value(line: &str, name: &str) -> Option<f64> {
    line.trim()
        .strip_prefix(name)
        .map(|rest| rest.trim().trim_end_matches('°').trim())
        .and_then(|value| value.parse::<f64>().ok())
}

fn in_range(latitude: f64, longitude: f64) -> Option<Coordinates> {
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return None;
    }
    Some(Coordinates::rounded(latitude, longitude))
}

/// Extract the first `Latitude:` / `Longitude:` pair from a full transcript.
pub fn parse_where_am_i(output: &str) -> Option<Coordinates> {
    let mut fix = PartialFix::default();
    for line in output.lines() {
        fix.update(line);
        if let Some((latitude, longitude)) = fix.complete() {
            return in_range(latitude, longitude);
        }
    }
    None
}

pub fn source_from_config(config: &LocationConfig) -> Box<dyn LocationSource> {
    match config.source {
        LocationSourceKind::Fixed => Box::new(FixedSource::new(config.fixed_coordinates())),
        LocationSourceKind::Geoclue => match &config.where_am_i {
            Some(path) => Box::new(GeoclueSource::new(path.clone())),
            None => Box::new(GeoclueSource::discover()),
        },
    }
}

/// Location source plus reverse geocoder.
#[derive(Debug)]
pub struct SystemLocationResolver {
    source: Box<dyn LocationSource>,
    geocoder: ReverseGeocoder,
    timeout: Duration,
}

impl SystemLocationResolver {
    pub fn new(
        source: Box<dyn LocationSource>,
        geocoder: ReverseGeocoder,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            geocoder,
            timeout,
        }
    }
}

#[async_trait]
impl LocationResolver for SystemLocationResolver {
    async fn resolve_coordinates(&self) -> Result<Coordinates, LocationError> {
        let coordinates = tokio::time::timeout(self.timeout, self.source.locate())
            .await
            .map_err(|_| {
                LocationError::Unavailable(format!(
                    "no position within {}s",
                    self.timeout.as_secs()
                ))
            })??;

        tracing::info!(
            latitude = coordinates.latitude,
            longitude = coordinates.longitude,
            "resolved device location"
        );
        Ok(coordinates)
    }

    async fn resolve_place_name(&self, coordinates: &Coordinates) -> Option<String> {
        self.geocoder.place_name(coordinates).await
    }
}
