use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};

use crate::geocode::NOMINATIM_URL;
use crate::model::Coordinates;
use crate::provider::open_meteo::OPEN_METEO_URL;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_LOCATION_TIMEOUT_SECS: u64 = 30;

/// Where device coordinates come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationSourceKind {
    /// GeoClue via its `where-am-i` agent.
    #[default]
    Geoclue,
    /// Coordinates stored in this config file.
    Fixed,
}

impl LocationSourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationSourceKind::Geoclue => "geoclue",
            LocationSourceKind::Fixed => "fixed",
        }
    }

    pub const fn all() -> &'static [LocationSourceKind] {
        &[LocationSourceKind::Geoclue, LocationSourceKind::Fixed]
    }
}

impl std::fmt::Display for LocationSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for LocationSourceKind {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_lowercase().as_str() {
            "geoclue" => Ok(LocationSourceKind::Geoclue),
            "fixed" => Ok(LocationSourceKind::Fixed),
            _ => Err(anyhow!(
                "Unknown location source '{value}'. Supported sources: geoclue, fixed."
            )),
        }
    }
}

/// Example TOML:
/// [location]
/// source = "fixed"
/// latitude = 52.52
/// longitude = 13.405
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationConfig {
    #[serde(default)]
    pub source: LocationSourceKind,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Override for the GeoClue agent path.
    pub where_am_i: Option<PathBuf>,
}

impl LocationConfig {
    /// Rounded coordinates when both halves are present and in range.
    pub fn fixed_coordinates(&self) -> Option<Coordinates> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon))
                if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) =>
            {
                Some(Coordinates::rounded(lat, lon))
            }
            _ => None,
        }
    }
}

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// IANA zone for hourly timestamps; detected from the system when absent.
    pub timezone: Option<String>,

    pub forecast_url: String,
    pub geocode_url: String,
    pub request_timeout_secs: u64,
    pub location_timeout_secs: u64,

    /// Directory for the forecast cache; the platform cache dir when absent.
    pub cache_dir: Option<PathBuf>,

    pub location: LocationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: None,
            forecast_url: OPEN_METEO_URL.to_string(),
            geocode_url: NOMINATIM_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            location_timeout_secs: DEFAULT_LOCATION_TIMEOUT_SECS,
            cache_dir: None,
            location: LocationConfig::default(),
        }
    }
}

impl Config {
    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, return defaults.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("dev", "hourly-weather", "hourly-weather")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Directory holding the forecast cache store.
    pub fn resolved_cache_dir(&self) -> Result<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::project_dirs()?.cache_dir().to_path_buf()),
        }
    }

    /// Switch to fixed coordinates.
    pub fn set_fixed_location(&mut self, latitude: f64, longitude: f64) {
        self.location.source = LocationSourceKind::Fixed;
        self.location.latitude = Some(latitude);
        self.location.longitude = Some(longitude);
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn location_timeout(&self) -> Duration {
        Duration::from_secs(self.location_timeout_secs.max(1))
    }
}
