use std::{net::IpAddr, path::Path};

use http::StatusCode;

use crate::{config::models::HttpConfig, core::path_matcher::PathPattern};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid network interface '{address}': {reason}")]
    InvalidNetworkInterface { address: String, reason: String },

    #[error("Invalid TLS configuration: {message}")]
    InvalidTls { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// HTTP server configuration validator
pub struct HttpConfigValidator;

impl HttpConfigValidator {
    /// Validate the whole configuration, reporting every problem at once
    pub fn validate(config: &HttpConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_network_interface(&config.network_interface) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_healthcheck_path(&config.healthcheck_path) {
            errors.push(e);
        }

        for (field, code) in [
            ("healthcheck_good_res", config.healthcheck_good_res),
            ("healthcheck_bad_res", config.healthcheck_bad_res),
        ] {
            if let Err(e) = Self::validate_status_code(field, code) {
                errors.push(e);
            }
        }

        if config.enable_https {
            errors.extend(Self::validate_tls(config));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_network_interface(address: &str) -> ValidationResult<()> {
        address
            .parse::<IpAddr>()
            .map(|_| ())
            .map_err(|_| ValidationError::InvalidNetworkInterface {
                address: address.to_string(),
                reason: "Must be an IP address (e.g., '127.0.0.1', '0.0.0.0' or '::1')"
                    .to_string(),
            })
    }

    fn validate_healthcheck_path(path: &str) -> ValidationResult<()> {
        PathPattern::compile(path)
            .map(|_| ())
            .map_err(|e| ValidationError::InvalidField {
                field: "healthcheck_path".to_string(),
                message: e.to_string(),
            })
    }

    fn validate_status_code(field: &str, code: u16) -> ValidationResult<()> {
        StatusCode::from_u16(code)
            .map(|_| ())
            .map_err(|_| ValidationError::InvalidField {
                field: field.to_string(),
                message: format!("{code} is not a valid HTTP status code"),
            })
    }

    fn validate_tls(config: &HttpConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        for (field, value) in [("key_file", &config.key_file), ("cert_file", &config.cert_file)] {
            match value.as_deref() {
                None | Some("") => errors.push(ValidationError::MissingField {
                    field: field.to_string(),
                }),
                Some(path) if !Path::new(path).is_file() => {
                    errors.push(ValidationError::InvalidTls {
                        message: format!("{field} '{path}' does not exist or is not a file"),
                    })
                }
                Some(_) => {}
            }
        }

        errors
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("\n  {}. {}", i + 1, error));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(HttpConfigValidator::validate(&HttpConfig::default()).is_ok());
    }

    #[test]
    fn test_errors_are_aggregated() {
        let config = HttpConfig {
            network_interface: "lo".to_string(),
            healthcheck_path: "health".to_string(),
            healthcheck_bad_res: 1000,
            ..HttpConfig::default()
        };

        let err = HttpConfigValidator::validate(&config).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Found 3 validation errors"), "{message}");
        assert!(message.contains("'lo'"));
        assert!(message.contains("healthcheck_path"));
        assert!(message.contains("healthcheck_bad_res"));
    }

    #[test]
    fn test_https_needs_existing_files() {
        let cert = NamedTempFile::new().unwrap();
        let config = HttpConfig {
            enable_https: true,
            key_file: Some("/no/such/key.pem".to_string()),
            cert_file: Some(cert.path().to_string_lossy().into_owned()),
            ..HttpConfig::default()
        };

        let err = HttpConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("key_file"));
        assert!(!err.to_string().contains("cert_file"));
    }

    #[test]
    fn test_https_without_files() {
        let config = HttpConfig {
            enable_https: true,
            ..HttpConfig::default()
        };
        let message = HttpConfigValidator::validate(&config).unwrap_err().to_string();
        assert!(message.contains("Missing required field: key_file"));
        assert!(message.contains("Missing required field: cert_file"));
    }
}
