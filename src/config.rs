//! Client configuration from environment variables

use crate::client::wire::{Coordinates, Location};
use crate::location::parse_location;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_LOCATION: &str = "山东省济南市";
pub const DEFAULT_VOICE_LOCALE: &str = "zh-CN";

/// Runtime configuration for the query client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend root, e.g. `http://127.0.0.1:8000`
    pub base_url: String,
    /// Total timeout for the single-shot fallback request
    pub fallback_timeout: Duration,
    pub connect_timeout: Duration,
    /// Stream is treated as failed when no bytes arrive for this long
    pub stream_idle_timeout: Duration,
    /// Delay between typewriter reveal steps
    pub typewriter_interval: Duration,
    pub voice_locale: String,
    /// Used whenever the location capability is absent or fails
    pub default_location: Location,
    /// Position reported by the configured location capability, if any
    pub coordinates: Option<Coordinates>,
    pub location_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            fallback_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            stream_idle_timeout: Duration::from_secs(60),
            typewriter_interval: Duration::from_millis(30),
            voice_locale: DEFAULT_VOICE_LOCALE.to_string(),
            default_location: parse_location(DEFAULT_LOCATION),
            coordinates: None,
            location_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unparseable values keep their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map_or(default, Duration::from_secs)
        };
        let float = |key: &str| lookup(key).and_then(|v| v.trim().parse::<f64>().ok());

        let default_location = lookup("POLICY_LOCATION")
            .map(|text| parse_location(&text))
            .filter(|location| !location.is_empty())
            .unwrap_or(defaults.default_location);

        let coordinates = match (float("POLICY_LATITUDE"), float("POLICY_LONGITUDE")) {
            (Some(latitude), Some(longitude)) => Some(Coordinates {
                latitude,
                longitude,
            }),
            _ => None,
        };

        Self {
            base_url: lookup("POLICY_API_BASE")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.base_url),
            fallback_timeout: secs("POLICY_FALLBACK_TIMEOUT_SECS", defaults.fallback_timeout),
            connect_timeout: secs("POLICY_CONNECT_TIMEOUT_SECS", defaults.connect_timeout),
            stream_idle_timeout: secs(
                "POLICY_STREAM_IDLE_TIMEOUT_SECS",
                defaults.stream_idle_timeout,
            ),
            typewriter_interval: lookup("POLICY_TYPEWRITER_MS")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map_or(defaults.typewriter_interval, Duration::from_millis),
            voice_locale: lookup("POLICY_VOICE_LOCALE").unwrap_or(defaults.voice_locale),
            default_location,
            coordinates,
            location_timeout: secs("POLICY_LOCATION_TIMEOUT_SECS", defaults.location_timeout),
        }
    }
}
