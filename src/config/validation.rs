use std::net::SocketAddr;

use axum::http::HeaderValue;
use tracing_subscriber::EnvFilter;

use crate::config::models::Settings;

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Settings validator
pub struct SettingsValidator;

impl SettingsValidator {
    /// Validate the entire settings tree, collecting every problem found
    pub fn validate(settings: &Settings) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&settings.listen_addr) {
            errors.push(e);
        }

        if settings.max_body_bytes == 0 {
            errors.push(ValidationError::InvalidField {
                field: "max_body_bytes".to_string(),
                message: "Must be greater than zero".to_string(),
            });
        }

        if settings.log.file.max_size_bytes == 0 {
            errors.push(ValidationError::InvalidField {
                field: "log.file.max_size_bytes".to_string(),
                message: "Must be greater than zero".to_string(),
            });
        }

        if settings.tier.logs_to_file() && settings.log.file.path.trim().is_empty() {
            errors.push(ValidationError::InvalidField {
                field: "log.file.path".to_string(),
                message: format!("Required for tier '{}'", settings.tier),
            });
        }

        if let Err(e) = EnvFilter::try_new(&settings.log.level) {
            errors.push(ValidationError::InvalidField {
                field: "log.level".to_string(),
                message: e.to_string(),
            });
        }

        if settings
            .redaction
            .sensitive_fields
            .iter()
            .any(|field| field.trim().is_empty())
        {
            errors.push(ValidationError::InvalidField {
                field: "redaction.sensitive_fields".to_string(),
                message: "Field names must not be blank".to_string(),
            });
        }

        let cors = &settings.cors;
        for (field, value) in [
            ("cors.allow_origins", &cors.allow_origins),
            ("cors.allow_methods", &cors.allow_methods),
            ("cors.allow_headers", &cors.allow_headers),
        ] {
            if HeaderValue::from_str(value).is_err() {
                errors.push(ValidationError::InvalidField {
                    field: field.to_string(),
                    message: "Not a valid header value".to_string(),
                });
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            }),
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        errors
            .iter()
            .enumerate()
            .map(|(i, e)| format!("  {}. {e}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
