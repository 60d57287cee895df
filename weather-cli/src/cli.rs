use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use inquire::validator::Validation;
use inquire::{CustomType, Select, Text};
use weather_core::render::deliver;
use weather_core::timezone::is_known_timezone;
use weather_core::{Config, LocationSourceKind, Pipeline};

use crate::render::{JsonRenderer, TextRenderer};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(
    name = "hourly-weather",
    version,
    about = "Hourly weather for the coming week"
)]
pub struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace). `RUST_LOG` wins.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Choose the location source and timezone interactively.
    Configure,

    /// Show the hourly forecast for the current location.
    Show {
        /// Print the aligned forecast as JSON instead of a table.
        #[arg(long)]
        json: bool,

        /// Override the directory holding the forecast cache.
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
}

impl Cli {
    pub async fn run(self) -> Result<ExitCode> {
        match self.command {
            Command::Configure => configure(),
            Command::Show { json, cache_dir } => show(json, cache_dir).await,
        }
    }
}

async fn show(json: bool, cache_dir: Option<PathBuf>) -> Result<ExitCode> {
    let mut config = Config::load()?;
    if cache_dir.is_some() {
        config.cache_dir = cache_dir;
    }

    let pipeline = Pipeline::from_config(&config)?;
    tracing::debug!(
        timezone = %pipeline.timezone().id,
        source = ?pipeline.timezone().source,
        "resolved local timezone"
    );

    let outcome = pipeline.run().await;

    let stdout = io::stdout();
    if json {
        deliver(&outcome, &mut JsonRenderer::new(stdout.lock()))?;
    } else {
        deliver(&outcome, &mut TextRenderer::new(stdout.lock()))?;
    }

    Ok(if outcome.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn configure() -> Result<ExitCode> {
    let mut config = Config::load()?;

    let sources = LocationSourceKind::all().to_vec();
    let cursor = sources
        .iter()
        .position(|kind| *kind == config.location.source)
        .unwrap_or(0);
    let source = Select::new("Where should your location come from?", sources)
        .with_starting_cursor(cursor)
        .prompt()?;

    match source {
        LocationSourceKind::Geoclue => config.location.source = LocationSourceKind::Geoclue,
        LocationSourceKind::Fixed => {
            let latitude = prompt_degrees("Latitude:", 90.0, config.location.latitude)?;
            let longitude = prompt_degrees("Longitude:", 180.0, config.location.longitude)?;
            config.set_fixed_location(latitude, longitude);
        }
    }

    let timezone = Text::new("Timezone (IANA id, empty to detect):")
        .with_default(config.timezone.as_deref().unwrap_or(""))
        .with_validator(|input: &str| {
            if input.trim().is_empty() || is_known_timezone(input) {
                Ok(Validation::Valid)
            } else {
                Ok(Validation::Invalid(
                    format!("Unknown timezone '{}'", input.trim()).into(),
                ))
            }
        })
        .prompt()?;
    let timezone = timezone.trim();
    config.timezone = (!timezone.is_empty()).then(|| timezone.to_string());

    config.save()?;
    println!("Saved configuration to {}", Config::config_file_path()?.display());

    Ok(ExitCode::SUCCESS)
}

fn prompt_degrees(message: &str, bound: f64, current: Option<f64>) -> Result<f64> {
    let mut prompt = CustomType::<f64>::new(message)
        .with_error_message("Please type a number")
        .with_validator(move |value: &f64| {
            if (-bound..=bound).contains(value) {
                Ok(Validation::Valid)
            } else {
                Ok(Validation::Invalid(
                    format!("Must be between -{bound} and {bound}").into(),
                ))
            }
        });
    if let Some(current) = current {
        prompt = prompt.with_default(current);
    }
    Ok(prompt.prompt()?)
}
