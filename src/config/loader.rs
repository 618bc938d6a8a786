//! Key-by-key configuration lookup.
//!
//! A key such as `HTTP_NETWORK_PORT` is looked up, in order, as:
//! 1. a command line argument `--http-network-port=<value>`, or a short flag
//!    `-p=<value>` / bare `-p` (meaning `Y`) when a flag is given,
//! 2. the environment variable `HTTP_NETWORK_PORT`,
//! 3. the caller's default.
//!
//! When `DOTENV_PATH` is set the named file is loaded into the process
//! environment first; variables that are already set win.
use std::{collections::HashMap, fmt::Display, str::FromStr};

use config::{Config, Environment};
use http::StatusCode;

use crate::{
    config::models::{HttpConfig, LogConfig},
    tracing_setup::LogLevel,
};

pub const DOTENV_PATH: &str = "DOTENV_PATH";
pub const APP_ENV: &str = "APP_ENV";

pub const HTTP_NETWORK_INTERFACE: &str = "HTTP_NETWORK_INTERFACE";
pub const HTTP_NETWORK_PORT: &str = "HTTP_NETWORK_PORT";
pub const HTTP_HEALTHCHECK_PATH: &str = "HTTP_HEALTHCHECK_PATH";
pub const HTTP_HEALTHCHECK_GOOD_RES: &str = "HTTP_HEALTHCHECK_GOOD_RES";
pub const HTTP_HEALTHCHECK_BAD_RES: &str = "HTTP_HEALTHCHECK_BAD_RES";
pub const HTTP_ENABLE_HTTPS: &str = "HTTP_ENABLE_HTTPS";
pub const HTTP_KEY_FILE: &str = "HTTP_KEY_FILE";
pub const HTTP_CERT_FILE: &str = "HTTP_CERT_FILE";
pub const HTTP_SHUTDOWN_TIMEOUT: &str = "HTTP_SHUTDOWN_TIMEOUT";

pub const LOG_LEVEL: &str = "LOG_LEVEL";
pub const LOG_TIMESTAMP: &str = "LOG_TIMESTAMP";
pub const LOG_TIMESTAMP_FORMAT: &str = "LOG_TIMESTAMP_FORMAT";
pub const LOG_JSON: &str = "LOG_JSON";

/// Errors raised while resolving configuration
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("Config parameter '{0}' not set on the command line or as an env var")]
    Missing(String),

    #[error("Config parameter '{key}' has invalid value '{value}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read configuration source: {0}")]
    Source(#[from] config::ConfigError),

    #[error("Failed to load dotenv file '{path}': {source}")]
    Dotenv {
        path: String,
        #[source]
        source: dotenvy::Error,
    },
}

/// Per-lookup options.
#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    /// Short command line flag, without the leading `-`
    pub cmd_line_flag: Option<String>,
    /// Do not log the resolved value
    pub silent: bool,
    /// Log `redacted` instead of the value
    pub redact: bool,
}

impl ConfigOptions {
    pub fn flag(flag: impl Into<String>) -> Self {
        Self {
            cmd_line_flag: Some(flag.into()),
            ..Self::default()
        }
    }

    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    pub fn redacted() -> Self {
        Self {
            redact: true,
            ..Self::default()
        }
    }
}

enum Found {
    Cli(String),
    Env(String),
}

pub struct ConfigResolver {
    cli_args: Vec<String>,
    env: Config,
}

impl std::fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigResolver")
            .field("cli_args", &self.cli_args)
            .finish_non_exhaustive()
    }
}

impl ConfigResolver {
    /// Resolver over the process arguments and environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(std::env::args().skip(1).collect())
    }

    /// Resolver over the given arguments and the process environment.
    pub fn new(cli_args: Vec<String>) -> Result<Self, ConfigError> {
        match std::env::var(DOTENV_PATH) {
            Ok(path) if !path.is_empty() => Self::with_dotenv(cli_args, &path),
            _ => Self::snapshot(cli_args),
        }
    }

    /// Loads `path` into the process environment, then resolves against it.
    pub fn with_dotenv(cli_args: Vec<String>, path: &str) -> Result<Self, ConfigError> {
        dotenvy::from_path(path).map_err(|source| ConfigError::Dotenv {
            path: path.to_string(),
            source,
        })?;
        Self::snapshot(cli_args)
    }

    fn snapshot(cli_args: Vec<String>) -> Result<Self, ConfigError> {
        let env = Config::builder()
            .add_source(Environment::default())
            .build()?;
        Ok(Self { cli_args, env })
    }

    /// Resolver over fixed arguments and a fixed set of variables instead of
    /// the process environment.
    pub fn with_env(
        cli_args: Vec<String>,
        vars: HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let env = Config::builder()
            .add_source(Environment::default().source(Some(vars.into_iter().collect())))
            .build()?;
        Ok(Self { cli_args, env })
    }

    pub fn get_string(&self, key: &str, default: Option<&str>) -> Result<String, ConfigError> {
        self.get_string_with(key, default, &ConfigOptions::default())
    }

    pub fn get_string_with(
        &self,
        key: &str,
        default: Option<&str>,
        options: &ConfigOptions,
    ) -> Result<String, ConfigError> {
        match self.lookup(key, options) {
            Some(value) => Ok(value),
            None => self.fallback(key, default.map(str::to_string), options),
        }
    }

    /// `y`, `yes`, `true` and `1` (any case) are true; every other value is false.
    pub fn get_bool(&self, key: &str, default: Option<bool>) -> Result<bool, ConfigError> {
        self.get_bool_with(key, default, &ConfigOptions::default())
    }

    pub fn get_bool_with(
        &self,
        key: &str,
        default: Option<bool>,
        options: &ConfigOptions,
    ) -> Result<bool, ConfigError> {
        match self.lookup(key, options) {
            Some(value) => Ok(matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "y" | "yes" | "true" | "1"
            )),
            None => self.fallback(key, default, options),
        }
    }

    pub fn get_number<T>(&self, key: &str, default: Option<T>) -> Result<T, ConfigError>
    where
        T: FromStr + Display,
        T::Err: Display,
    {
        self.get_number_with(key, default, &ConfigOptions::default())
    }

    pub fn get_number_with<T>(
        &self,
        key: &str,
        default: Option<T>,
        options: &ConfigOptions,
    ) -> Result<T, ConfigError>
    where
        T: FromStr + Display,
        T::Err: Display,
    {
        match self.lookup(key, options) {
            Some(value) => match value.trim().parse() {
                Ok(number) => Ok(number),
                Err(e) => Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: format!("{e}"),
                    value,
                }),
            },
            None => self.fallback(key, default, options),
        }
    }

    fn lookup(&self, key: &str, options: &ConfigOptions) -> Option<String> {
        let found = self.check_cli(key, options).or_else(|| self.check_env(key))?;

        let (source, value) = match found {
            Found::Cli(value) => ("CLI parameter/flag", value),
            Found::Env(value) => ("Env var", value),
        };
        if !options.silent {
            crate::startup!(
                "{} ({}) = ({})",
                source,
                key,
                if options.redact { "redacted" } else { value.as_str() }
            );
        }
        Some(value)
    }

    fn check_cli(&self, key: &str, options: &ConfigOptions) -> Option<Found> {
        let param = format!("--{}=", key.to_lowercase().replace('_', "-"));
        let flag = options
            .cmd_line_flag
            .as_deref()
            .map(|flag| format!("-{flag}"));

        for arg in &self.cli_args {
            if let Some(value) = arg.strip_prefix(&param).filter(|v| !v.is_empty()) {
                return Some(Found::Cli(value.to_string()));
            }
            if let Some(flag) = &flag {
                if arg == flag {
                    return Some(Found::Cli("Y".to_string()));
                }
                if let Some(value) = arg
                    .strip_prefix(flag.as_str())
                    .and_then(|rest| rest.strip_prefix('='))
                    .filter(|v| !v.is_empty())
                {
                    return Some(Found::Cli(value.to_string()));
                }
            }
        }
        None
    }

    fn check_env(&self, key: &str) -> Option<Found> {
        // The environment source stores keys lowercased
        match self.env.get_string(&key.to_lowercase()) {
            Ok(value) => Some(Found::Env(value)),
            Err(config::ConfigError::NotFound(_)) => None,
            Err(e) => {
                tracing::debug!("Ignoring unreadable env var {}: {}", key, e);
                None
            }
        }
    }

    fn fallback<T: Display>(
        &self,
        key: &str,
        default: Option<T>,
        options: &ConfigOptions,
    ) -> Result<T, ConfigError> {
        let value = default.ok_or_else(|| ConfigError::Missing(key.to_string()))?;
        if !options.silent {
            let shown = if options.redact {
                "redacted".to_string()
            } else {
                value.to_string()
            };
            crate::startup!("Default value used for ({}) = ({})", key, shown);
        }
        Ok(value)
    }
}

/// Resolves every `HTTP_*` key, using `base` for the defaults.
pub fn load_http_config(
    resolver: &ConfigResolver,
    base: &HttpConfig,
) -> Result<HttpConfig, ConfigError> {
    let enable_https = resolver.get_bool(HTTP_ENABLE_HTTPS, Some(base.enable_https))?;

    let (key_file, cert_file) = if enable_https {
        (
            Some(resolver.get_string(HTTP_KEY_FILE, base.key_file.as_deref())?),
            Some(resolver.get_string(HTTP_CERT_FILE, base.cert_file.as_deref())?),
        )
    } else {
        (base.key_file.clone(), base.cert_file.clone())
    };

    Ok(HttpConfig {
        network_interface: resolver
            .get_string(HTTP_NETWORK_INTERFACE, Some(&base.network_interface))?,
        network_port: resolver.get_number(HTTP_NETWORK_PORT, Some(base.network_port))?,
        healthcheck_path: resolver
            .get_string(HTTP_HEALTHCHECK_PATH, Some(&base.healthcheck_path))?,
        healthcheck_good_res: resolver
            .get_number(HTTP_HEALTHCHECK_GOOD_RES, Some(base.healthcheck_good_res))?,
        healthcheck_bad_res: resolver
            .get_number(HTTP_HEALTHCHECK_BAD_RES, Some(base.healthcheck_bad_res))?,
        enable_https,
        key_file,
        cert_file,
        shutdown_timeout_secs: resolver
            .get_number(HTTP_SHUTDOWN_TIMEOUT, Some(base.shutdown_timeout_secs))?,
    })
}

/// Resolves the `LOG_*` keys silently, since logging is not set up yet.
pub fn load_log_config(
    resolver: &ConfigResolver,
    base: &LogConfig,
) -> Result<LogConfig, ConfigError> {
    let silent = ConfigOptions::silent();

    let level = match resolver.get_string_with(LOG_LEVEL, Some(""), &silent)? {
        value if value.is_empty() => base.level,
        value => value
            .parse::<LogLevel>()
            .map_err(|e| ConfigError::InvalidValue {
                key: LOG_LEVEL.to_string(),
                value: value.clone(),
                reason: e.to_string(),
            })?,
    };

    Ok(LogConfig {
        level,
        timestamp: resolver.get_bool_with(LOG_TIMESTAMP, Some(base.timestamp), &silent)?,
        timestamp_format: resolver.get_string_with(
            LOG_TIMESTAMP_FORMAT,
            Some(&base.timestamp_format),
            &silent,
        )?,
        json: resolver.get_bool_with(LOG_JSON, Some(base.json), &silent)?,
    })
}

/// Converts a configured status code, rejecting values outside 100..=999.
pub fn status_code(key: &str, code: u16) -> Result<StatusCode, ConfigError> {
    StatusCode::from_u16(code).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        value: code.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn resolver(args: &[&str], vars: &[(&str, &str)]) -> ConfigResolver {
        ConfigResolver::with_env(
            args.iter().map(|a| a.to_string()).collect(),
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_cli_beats_env_beats_default() {
        let r = resolver(&["--app-mode=cli"], &[("APP_MODE", "env"), ("OTHER", "env")]);
        assert_eq!(r.get_string("APP_MODE", Some("default")).unwrap(), "cli");
        assert_eq!(r.get_string("OTHER", Some("default")).unwrap(), "env");
        assert_eq!(r.get_string("UNSET", Some("default")).unwrap(), "default");
    }

    #[test]
    fn test_missing_without_default_is_an_error() {
        let r = resolver(&[], &[]);
        let err = r.get_string("API_TOKEN", None).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(key) if key == "API_TOKEN"));
    }

    #[test]
    fn test_short_flags() {
        let r = resolver(&["-v", "-p=9000"], &[]);
        assert!(
            r.get_bool_with("VERBOSE", Some(false), &ConfigOptions::flag("v"))
                .unwrap()
        );
        assert_eq!(
            r.get_number_with("PORT", Some(80u16), &ConfigOptions::flag("p"))
                .unwrap(),
            9000
        );
        assert!(!r.get_bool("VERBOSE", Some(false)).unwrap());
    }

    #[test]
    fn test_cli_value_must_not_be_empty() {
        let r = resolver(&["--name="], &[("NAME", "env")]);
        assert_eq!(r.get_string("NAME", None).unwrap(), "env");
    }

    #[test]
    fn test_bool_values() {
        let r = resolver(
            &[],
            &[("A", "Y"), ("B", "yes"), ("C", "TRUE"), ("D", "1"), ("E", "n"), ("F", "nope")],
        );
        for key in ["A", "B", "C", "D"] {
            assert!(r.get_bool(key, None).unwrap(), "{key}");
        }
        for key in ["E", "F"] {
            assert!(!r.get_bool(key, None).unwrap(), "{key}");
        }
    }

    #[test]
    fn test_invalid_number() {
        let r = resolver(&[], &[("HTTP_NETWORK_PORT", "eighty")]);
        let err = r.get_number::<u16>(HTTP_NETWORK_PORT, Some(80)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_load_http_config() {
        let r = resolver(
            &["--http-network-port=9090"],
            &[
                ("HTTP_NETWORK_INTERFACE", "0.0.0.0"),
                ("HTTP_HEALTHCHECK_BAD_RES", "500"),
            ],
        );
        let config = load_http_config(&r, &HttpConfig::default()).unwrap();
        assert_eq!(config.network_interface, "0.0.0.0");
        assert_eq!(config.network_port, 9090);
        assert_eq!(config.healthcheck_path, "/healthcheck");
        assert_eq!(config.healthcheck_bad_res, 500);
        assert!(!config.enable_https);
    }

    #[test]
    fn test_https_requires_key_and_cert() {
        let r = resolver(&[], &[("HTTP_ENABLE_HTTPS", "Y"), ("HTTP_KEY_FILE", "key.pem")]);
        let err = load_http_config(&r, &HttpConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(key) if key == HTTP_CERT_FILE));
    }

    #[test]
    fn test_load_log_config() {
        let r = resolver(&["--log-level=debug"], &[("LOG_TIMESTAMP", "y")]);
        let config = load_log_config(&r, &LogConfig::default()).unwrap();
        assert_eq!(config.level, LogLevel::Debug);
        assert!(config.timestamp);
        assert_eq!(config.timestamp_format, "ISO");

        let r = resolver(&[], &[("LOG_LEVEL", "chatty")]);
        assert!(load_log_config(&r, &LogConfig::default()).is_err());
    }

    #[test]
    fn test_status_code_range() {
        assert_eq!(status_code("X", 503).unwrap(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(status_code("X", 42).is_err());
    }

    #[test]
    fn test_dotenv_file_loads_missing_vars() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "APPSH_DOTENV_ONLY=from-file").unwrap();
        writeln!(file, "PATH=overridden").unwrap();

        let r = ConfigResolver::with_dotenv(Vec::new(), file.path().to_str().unwrap()).unwrap();
        assert_eq!(r.get_string("APPSH_DOTENV_ONLY", None).unwrap(), "from-file");
        assert_ne!(r.get_string("PATH", None).unwrap(), "overridden");
    }

    #[test]
    fn test_missing_dotenv_file_is_an_error() {
        let err = ConfigResolver::with_dotenv(Vec::new(), "/definitely/not/here.env").unwrap_err();
        assert!(matches!(err, ConfigError::Dotenv { .. }));
    }
}
