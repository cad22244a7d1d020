//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (default entry points exist)
//! - Validate value ranges (throttle > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: StaticConfiguration → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::schema::StaticConfiguration;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no entry point declared")]
    NoEntryPoints,

    #[error("entry point `{name}` has invalid address `{address}`")]
    InvalidAddress { name: String, address: String },

    #[error("default entry point `{0}` is not declared")]
    UnknownDefaultEntryPoint(String),

    #[error("providers.throttle_duration_ms must be greater than zero")]
    InvalidThrottleDuration,

    #[error("invalid log level `{0}`")]
    InvalidLogLevel(String),

    #[error("invalid metrics address `{0}`")]
    InvalidMetricsAddress(String),
}

/// Check a static configuration, collecting every problem found.
pub fn validate_config(config: &StaticConfiguration) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.entry_points.is_empty() {
        errors.push(ValidationError::NoEntryPoints);
    }

    for (name, entry_point) in &config.entry_points {
        if entry_point.address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidAddress {
                name: name.clone(),
                address: entry_point.address.clone(),
            });
        }
    }

    for name in &config.default_entry_points {
        if !config.entry_points.contains_key(name) {
            errors.push(ValidationError::UnknownDefaultEntryPoint(name.clone()));
        }
    }

    if config.providers.throttle_duration_ms == 0 {
        errors.push(ValidationError::InvalidThrottleDuration);
    }

    if EnvFilter::try_new(&config.log.level).is_err() {
        errors.push(ValidationError::InvalidLogLevel(config.log.level.clone()));
    }

    if config.metrics.enabled && config.metrics.address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.metrics.address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
