//! Static configuration schema.
//!
//! This module defines the process-lifetime configuration: entry points,
//! provider settings, logging and metrics. All types derive Serde traits for
//! deserialization from config files and every field has a default.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root static configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StaticConfiguration {
    /// Listening endpoints, keyed by name.
    pub entry_points: BTreeMap<String, EntryPointConfig>,

    /// Entry points used by routers that do not name any.
    pub default_entry_points: Vec<String>,

    /// Provider settings (throttling, file provider).
    pub providers: ProvidersConfig,

    /// Logging settings.
    pub log: LogConfig,

    /// Metrics endpoint settings.
    pub metrics: MetricsConfig,
}

impl Default for StaticConfiguration {
    fn default() -> Self {
        let mut entry_points = BTreeMap::new();
        entry_points.insert("http".to_string(), EntryPointConfig::default());
        Self {
            entry_points,
            default_entry_points: vec!["http".to_string()],
            providers: ProvidersConfig::default(),
            log: LogConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl StaticConfiguration {
    /// A configuration with the given entry points and nothing else.
    pub fn with_entry_points<I, S>(entry_points: I) -> Self
    where
        I: IntoIterator<Item = (S, EntryPointConfig)>,
        S: Into<String>,
    {
        Self {
            entry_points: entry_points
                .into_iter()
                .map(|(name, config)| (name.into(), config))
                .collect(),
            default_entry_points: Vec::new(),
            ..Self::default()
        }
    }

    /// Names of the entry points that terminate TLS.
    pub fn tls_entry_points(&self) -> impl Iterator<Item = &String> {
        self.entry_points
            .iter()
            .filter(|(_, ep)| ep.tls)
            .map(|(name, _)| name)
    }
}

/// One listening endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EntryPointConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub address: String,

    /// Terminate TLS on this entry point.
    pub tls: bool,
}

impl Default for EntryPointConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:8080".to_string(),
            tls: false,
        }
    }
}

impl EntryPointConfig {
    pub fn plain(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            tls: false,
        }
    }

    pub fn tls(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            tls: true,
        }
    }
}

/// Provider settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Minimum time between two applied reloads, in milliseconds.
    pub throttle_duration_ms: u64,

    /// Optional file provider.
    pub file: Option<FileProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            throttle_duration_ms: 2000,
            file: None,
        }
    }
}

impl ProvidersConfig {
    pub fn throttle_duration(&self) -> Duration {
        Duration::from_millis(self.throttle_duration_ms)
    }
}

/// File provider: dynamic configuration read from a TOML or JSON file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileProviderConfig {
    pub path: PathBuf,

    /// Re-read the file when it changes.
    #[serde(default = "default_watch")]
    pub watch: bool,
}

fn default_watch() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log filter (e.g. "info" or "switchyard=debug,tower_http=info").
    pub level: String,

    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Expose a Prometheus scrape endpoint.
    pub enabled: bool,

    /// Metrics endpoint bind address.
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "127.0.0.1:9090".to_string(),
        }
    }
}
