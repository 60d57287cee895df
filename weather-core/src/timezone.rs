//! Local IANA time-zone detection.
//!
//! The forecast endpoint formats hourly timestamps in whatever zone we ask for,
//! so the zone is resolved once per process: explicit config override first,
//! then `TZ`, then the OS lookup, then `UTC`.

use std::env;

use chrono_tz::Tz;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimezoneSource {
    Config,
    TzEnv,
    System,
    UtcFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTimezone {
    pub id: String,
    pub source: TimezoneSource,
}

impl LocalTimezone {
    pub fn utc() -> Self {
        Self {
            id: "UTC".to_string(),
            source: TimezoneSource::UtcFallback,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TimezoneProbes {
    pub config: Option<String>,
    pub tz_env: Option<String>,
    pub system: Option<String>,
}

pub fn detect_local_timezone(config_override: Option<&str>) -> LocalTimezone {
    resolve_timezone(TimezoneProbes {
        config: config_override.map(ToString::to_string),
        tz_env: env::var("TZ").ok(),
        system: iana_time_zone::get_timezone().ok(),
    })
}

pub fn resolve_timezone(probes: TimezoneProbes) -> LocalTimezone {
    let candidates = [
        (TimezoneSource::Config, probes.config),
        (TimezoneSource::TzEnv, probes.tz_env),
        (TimezoneSource::System, probes.system),
    ];

    for (source, candidate) in candidates {
        let Some(raw) = candidate else {
            continue;
        };
        let id = normalize(&raw);
        if is_known_timezone(id) {
            tracing::debug!(timezone = id, ?source, "resolved local time zone");
            return LocalTimezone {
                id: id.to_string(),
                source,
            };
        }
        tracing::debug!(candidate = %raw, ?source, "ignoring invalid time zone");
    }

    LocalTimezone::utc()
}

/// Parse an IANA identifier such as `Europe/Berlin`.
pub fn parse_timezone(id: &str) -> Option<Tz> {
    id.trim().parse::<Tz>().ok()
}

pub fn is_known_timezone(id: &str) -> bool {
    parse_timezone(id).is_some()
}

// `TZ=:/usr/share/zoneinfo/Europe/Berlin` is as valid as `TZ=Europe/Berlin`.
fn normalize(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix(':').unwrap_or(trimmed);
    match trimmed.find("zoneinfo/") {
        Some(index) => &trimmed[index + "zoneinfo/".len()..],
        None => trimmed,
    }
}
