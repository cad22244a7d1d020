//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::dynamic::DynamicConfiguration;
use crate::config::schema::StaticConfiguration;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load and validate the static configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<StaticConfiguration, ConfigError> {
    let content = read(path)?;
    let config: StaticConfiguration = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Load a dynamic configuration file. `.json` files are parsed as JSON,
/// everything else as TOML.
pub fn load_dynamic(path: &Path) -> Result<DynamicConfiguration, ConfigError> {
    let content = read(path)?;
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if is_json {
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(toml::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_static_config() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
            default_entry_points = ["web"]

            [entry_points.web]
            address = "127.0.0.1:8000"

            [entry_points.websecure]
            address = "127.0.0.1:8443"
            tls = true

            [providers]
            throttle_duration_ms = 500
            "#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.entry_points.len(), 2);
        assert!(config.entry_points["websecure"].tls);
        assert_eq!(config.providers.throttle_duration_ms, 500);
        assert_eq!(config.tls_entry_points().collect::<Vec<_>>(), vec!["websecure"]);
    }

    #[test]
    fn invalid_static_config_reports_validation() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
            [providers]
            throttle_duration_ms = 0
            "#
        )
        .unwrap();

        match load_config(file.path()) {
            Err(ConfigError::Validation(errors)) => {
                assert_eq!(errors, vec![ValidationError::InvalidThrottleDuration]);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn load_dynamic_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"routers": {{"r": {{"rule": "Path(`/`)", "service": "s"}}}}}}"#
        )
        .unwrap();

        let config = load_dynamic(file.path()).unwrap();
        assert_eq!(config.routers["r"].service, "s");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_dynamic(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
