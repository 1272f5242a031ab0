//! Configuration validation.
//!
//! Semantic checks that serde cannot express: value ranges, URL shape,
//! relationships between fields. All errors are collected, not just the first.

use std::net::SocketAddr;

use crate::config::schema::ClientConfig;

/// Longest accepted rate-limit window: one week.
pub const MAX_RATE_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match url::Url::parse(&config.upstream.base_url) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(url) => errors.push(ValidationError::new(
            "upstream.base_url",
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new("upstream.base_url", e.to_string())),
    }
    if config.upstream.max_connections == 0 {
        errors.push(ValidationError::new("upstream.max_connections", "must be greater than 0"));
    }

    if config.circuit_breaker.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be greater than 0"));
    }
    if config.circuit_breaker.cooldown_secs == 0 {
        errors.push(ValidationError::new("circuit_breaker.cooldown_secs", "must be greater than 0"));
    }

    if config.retry.base_delay_ms > config.retry.max_delay_ms {
        errors.push(ValidationError::new(
            "retry.base_delay_ms",
            format!("{} exceeds max_delay_ms {}", config.retry.base_delay_ms, config.retry.max_delay_ms),
        ));
    }

    if config.cache.max_entries == 0 {
        errors.push(ValidationError::new("cache.max_entries", "must be greater than 0"));
    }

    check_window(&mut errors, "rate_limit.window_secs", config.rate_limit.window_secs);
    if config.rate_limit.max_requests == 0 {
        errors.push(ValidationError::new("rate_limit.max_requests", "must be greater than 0"));
    }

    for (op, over) in &config.operations {
        let prefix = format!("operations.{}", op.name());
        if over.timeout_ms == Some(0) {
            errors.push(ValidationError::new(format!("{}.timeout_ms", prefix), "must be greater than 0"));
        }
        if let Some(window) = over.rate_limit_window_secs {
            check_window(&mut errors, format!("{}.rate_limit_window_secs", prefix), window);
        }
        if over.rate_limit_max == Some(0) {
            errors.push(ValidationError::new(format!("{}.rate_limit_max", prefix), "must be greater than 0"));
        }
    }

    if config.maintenance.interval_secs == 0 {
        errors.push(ValidationError::new("maintenance.interval_secs", "must be greater than 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_window(errors: &mut Vec<ValidationError>, field: impl Into<String>, secs: u64) {
    if secs == 0 {
        errors.push(ValidationError::new(field, "must be greater than 0"));
    } else if secs > MAX_RATE_WINDOW_SECS {
        errors.push(ValidationError::new(
            field,
            format!("{} exceeds the maximum of {} seconds", secs, MAX_RATE_WINDOW_SECS),
        ));
    }
}
