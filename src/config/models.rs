//! Configuration data structures for the shell and its HTTP servers.
//!
//! Each struct is serde-friendly with defaults, so it can be filled from any
//! source. [`ConfigResolver`](crate::config::loader::ConfigResolver) resolves
//! them key by key from the command line and the environment.
use serde::{Deserialize, Serialize};

use crate::tracing_setup::LogLevel;

pub const DEFAULT_HEALTHCHECK_PATH: &str = "/healthcheck";

/// Settings for one embedded HTTP server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct HttpConfig {
    /// IP address to bind, e.g. `127.0.0.1` or `0.0.0.0`
    pub network_interface: String,
    /// TCP port to bind; 0 picks a free port
    pub network_port: u16,
    pub healthcheck_path: String,
    /// Status answered while every probe passes
    pub healthcheck_good_res: u16,
    /// Status answered when a probe fails
    pub healthcheck_bad_res: u16,
    pub enable_https: bool,
    /// PEM file holding a PKCS#8 private key
    pub key_file: Option<String>,
    /// PEM file holding the certificate chain
    pub cert_file: Option<String>,
    /// Upper bound on draining in-flight connections during stop
    pub shutdown_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            network_interface: "127.0.0.1".to_string(),
            network_port: 8080,
            healthcheck_path: DEFAULT_HEALTHCHECK_PATH.to_string(),
            healthcheck_good_res: 200,
            healthcheck_bad_res: 503,
            enable_https: false,
            key_file: None,
            cert_file: None,
            shutdown_timeout_secs: 30,
        }
    }
}

impl HttpConfig {
    pub fn builder() -> HttpConfigBuilder {
        HttpConfigBuilder::default()
    }

    pub fn bind_address(&self) -> String {
        if self.network_interface.contains(':') {
            format!("[{}]:{}", self.network_interface, self.network_port)
        } else {
            format!("{}:{}", self.network_interface, self.network_port)
        }
    }
}

/// Builder for [`HttpConfig`]
#[derive(Debug, Default)]
pub struct HttpConfigBuilder {
    config: HttpConfig,
}

impl HttpConfigBuilder {
    pub fn network_interface(mut self, interface: impl Into<String>) -> Self {
        self.config.network_interface = interface.into();
        self
    }

    pub fn network_port(mut self, port: u16) -> Self {
        self.config.network_port = port;
        self
    }

    pub fn healthcheck_path(mut self, path: impl Into<String>) -> Self {
        self.config.healthcheck_path = path.into();
        self
    }

    pub fn healthcheck_responses(mut self, good: u16, bad: u16) -> Self {
        self.config.healthcheck_good_res = good;
        self.config.healthcheck_bad_res = bad;
        self
    }

    pub fn https(mut self, key_file: impl Into<String>, cert_file: impl Into<String>) -> Self {
        self.config.enable_https = true;
        self.config.key_file = Some(key_file.into());
        self.config.cert_file = Some(cert_file.into());
        self
    }

    pub fn shutdown_timeout_secs(mut self, secs: u64) -> Self {
        self.config.shutdown_timeout_secs = secs;
        self
    }

    pub fn build(self) -> HttpConfig {
        self.config
    }
}

/// Logging settings, see [`init_logging`](crate::tracing_setup::init_logging).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub timestamp: bool,
    /// `ISO` for RFC 3339, otherwise a chrono strftime pattern
    pub timestamp_format: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            timestamp: false,
            timestamp_format: "ISO".to_string(),
            json: false,
        }
    }
}

/// Identity and defaults for a [`Shell`](crate::shell::Shell).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ShellConfig {
    pub app_name: String,
    pub app_version: String,
    /// Used when `LOG_LEVEL` and friends are not set
    pub log: LogConfig,
    /// Log panics through the shell's logger instead of the default hook
    pub catch_panics: bool,
    /// With `catch_panics`, shut down with exit code 1 after any panic
    pub exit_on_panic: bool,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            app_name: env!("CARGO_PKG_NAME").to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            log: LogConfig::default(),
            catch_panics: false,
            exit_on_panic: false,
        }
    }
}

impl ShellConfig {
    pub fn new(app_name: impl Into<String>, app_version: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            app_version: app_version.into(),
            ..Self::default()
        }
    }

    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    pub fn catch_panics(mut self, exit_on_panic: bool) -> Self {
        self.catch_panics = true;
        self.exit_on_panic = exit_on_panic;
        self
    }
}
