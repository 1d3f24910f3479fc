//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (port, timeouts, compression level)
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Pure functions over the config structs
//! - The engine id is not checked here; the adapter registry owns that list

use crate::config::schema::{GatewayConfig, RouterConfig};

/// One failed check.
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

/// Validate router settings.
pub fn validate_router_config(config: &RouterConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.port == 0 || config.port > 65535 {
        errors.push(ValidationError::new(
            "router.port",
            format!("{} is outside 1-65535", config.port),
        ));
    }

    let timeouts = [
        ("router.read_timeout_secs", config.read_timeout_secs),
        ("router.write_timeout_secs", config.write_timeout_secs),
        ("router.idle_timeout_secs", config.idle_timeout_secs),
        ("router.read_header_timeout_secs", config.read_header_timeout_secs),
    ];
    for (field, value) in timeouts {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }

    if config.max_header_bytes == 0 {
        errors.push(ValidationError::new("router.max_header_bytes", "must be greater than 0"));
    }

    if config.compression_level != -1 && !(1..=9).contains(&config.compression_level) {
        errors.push(ValidationError::new(
            "router.compression_level",
            format!("{} is not -1 or 1-9", config.compression_level),
        ));
    }

    if config.engines.tiny_http.poll_interval_ms == 0 {
        errors.push(ValidationError::new(
            "router.engines.tiny_http.poll_interval_ms",
            "must be greater than 0",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate the whole gateway configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = match validate_router_config(&config.router) {
        Ok(()) => Vec::new(),
        Err(errors) => errors,
    };

    if config.shutdown_grace_secs == 0 {
        errors.push(ValidationError::new("shutdown_grace_secs", "must be greater than 0"));
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !["trace", "debug", "info", "warn", "error"].contains(&level.as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", config.observability.log_level),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = GatewayConfig::default();
        config.router.port = 70000;
        config.router.read_timeout_secs = 0;
        config.router.compression_level = 0;
        config.observability.log_level = "loud".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "router.port",
                "router.read_timeout_secs",
                "router.compression_level",
                "observability.log_level"
            ]
        );
    }

    #[test]
    fn port_bounds() {
        let mut config = RouterConfig::default();
        config.port = 0;
        assert!(validate_router_config(&config).is_err());
        config.port = 65535;
        assert!(validate_router_config(&config).is_ok());
        config.port = 1;
        assert!(validate_router_config(&config).is_ok());
    }
}
