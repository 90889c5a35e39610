//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, queue sizes, rates)
//! - Check that every URL the service dials actually parses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: MeshConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;
use url::Url;

use crate::config::schema::{MeshConfig, ServiceRole};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid URL '{value}'")]
    InvalidUrl { field: &'static str, value: String },

    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field}: must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field}: {message}")]
    OutOfRange { field: &'static str, message: String },

    #[error("observability.log_level: unknown level '{0}'")]
    UnknownLevel(String),
}

/// Validate a configuration, collecting every error found.
pub fn validate_config(config: &MeshConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let bind = config.bind_address();
    if bind.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: bind,
        });
    }

    // Only the services that dial out need their downstream URLs.
    let downstream = &config.downstream;
    let dialed: &[(&'static str, &str)] = match config.service.role {
        ServiceRole::Gateway => &[
            ("downstream.user_service_url", downstream.user_service_url.as_str()),
            ("downstream.order_service_url", downstream.order_service_url.as_str()),
            (
                "downstream.notification_service_url",
                downstream.notification_service_url.as_str(),
            ),
        ],
        ServiceRole::Order => &[(
            "downstream.user_service_url",
            downstream.user_service_url.as_str(),
        )],
        ServiceRole::User | ServiceRole::Notification => &[],
    };
    for (field, value) in dialed {
        check_http_url(field, value, &mut errors);
    }

    if config.exporter.enabled {
        check_http_url("exporter.endpoint", &config.exporter.endpoint, &mut errors);
    }

    let non_zero: [(&'static str, u64); 7] = [
        ("timeouts.connect_ms", config.timeouts.connect_ms),
        ("timeouts.hop_ms", config.timeouts.hop_ms),
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("exporter.queue_capacity", config.exporter.queue_capacity as u64),
        ("exporter.batch_size", config.exporter.batch_size as u64),
        ("exporter.flush_interval_ms", config.exporter.flush_interval_ms),
        ("exporter.max_attempts", config.exporter.max_attempts as u64),
    ];
    for (field, value) in non_zero {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    if config.exporter.batch_size > config.exporter.queue_capacity {
        errors.push(ValidationError::OutOfRange {
            field: "exporter.batch_size",
            message: format!(
                "{} exceeds queue_capacity {}",
                config.exporter.batch_size, config.exporter.queue_capacity
            ),
        });
    }

    if config.timeouts.hop_ms / 1000 >= config.timeouts.request_secs {
        errors.push(ValidationError::OutOfRange {
            field: "timeouts.hop_ms",
            message: "must be shorter than timeouts.request_secs".to_string(),
        });
    }

    let rate = config.notification.failure_rate;
    if !(0.0..=1.0).contains(&rate) {
        errors.push(ValidationError::OutOfRange {
            field: "notification.failure_rate",
            message: format!("{} is not within [0, 1]", rate),
        });
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
        errors.push(ValidationError::UnknownLevel(
            config.observability.log_level.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_http_url(field: &'static str, value: &str, errors: &mut Vec<ValidationError>) {
    let valid = Url::parse(value)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host().is_some())
        .unwrap_or(false);
    if !valid {
        errors.push(ValidationError::InvalidUrl {
            field,
            value: value.to_string(),
        });
    }
}
