//! Application-level configuration loading: session lifetime, calendar offset, sweeping and
//! collaborator settings.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use time::UtcOffset;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "COUPLE_QUIZ_CONFIG_PATH";
/// Sessions expire a week after the invitation.
const DEFAULT_SESSION_TTL_HOURS: u64 = 7 * 24;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
const DEFAULT_PUSH_ENDPOINT: &str = "https://exp.host/--/api/v2/push/send";

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    session_ttl: Duration,
    calendar_offset: UtcOffset,
    expiry_sweep_interval: Option<Duration>,
    seed_path: Option<PathBuf>,
    push: PushConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Settings of the push notification delivery.
pub struct PushConfig {
    /// Whether notifications are posted to the push endpoint instead of only being logged.
    pub enabled: bool,
    /// Expo push endpoint.
    pub endpoint: String,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        ttl_hours = app_config.session_ttl.as_secs() / 3600,
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON configuration document.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }

    /// Time between invitation and lazy expiry.
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// Offset used to derive local calendar days for streaks.
    pub fn calendar_offset(&self) -> UtcOffset {
        self.calendar_offset
    }

    /// Period of the background expiry sweep, `None` when disabled.
    pub fn expiry_sweep_interval(&self) -> Option<Duration> {
        self.expiry_sweep_interval
    }

    /// Catalog seed location.
    pub fn seed_path(&self) -> Option<&PathBuf> {
        self.seed_path.as_ref()
    }

    /// Push notification settings.
    pub fn push(&self) -> &PushConfig {
        &self.push
    }

    /// Override the session lifetime.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Override the calendar offset.
    pub fn with_calendar_offset(mut self, offset: UtcOffset) -> Self {
        self.calendar_offset = offset;
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    session_ttl_hours: u64,
    calendar_utc_offset_minutes: i32,
    expiry_sweep_interval_secs: u64,
    seed_path: Option<PathBuf>,
    push: RawPush,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            session_ttl_hours: DEFAULT_SESSION_TTL_HOURS,
            calendar_utc_offset_minutes: 0,
            expiry_sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            seed_path: None,
            push: RawPush::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the `push` section.
struct RawPush {
    enabled: bool,
    endpoint: String,
}

impl Default for RawPush {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: DEFAULT_PUSH_ENDPOINT.to_owned(),
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let calendar_offset = UtcOffset::from_whole_seconds(value.calendar_utc_offset_minutes * 60)
            .unwrap_or_else(|_| {
                warn!(
                    minutes = value.calendar_utc_offset_minutes,
                    "calendar offset out of range; using UTC"
                );
                UtcOffset::UTC
            });

        Self {
            session_ttl: Duration::from_secs(value.session_ttl_hours.max(1) * 3600),
            calendar_offset,
            expiry_sweep_interval: (value.expiry_sweep_interval_secs > 0)
                .then(|| Duration::from_secs(value.expiry_sweep_interval_secs)),
            seed_path: value.seed_path,
            push: PushConfig {
                enabled: value.push.enabled,
                endpoint: value.push.endpoint,
            },
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
