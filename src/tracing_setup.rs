use std::{fmt, str::FromStr, sync::OnceLock};

use chrono::{
    Local, SecondsFormat,
    format::{Item, StrftimeItems},
};
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload,
    util::SubscriberInitExt,
};

use crate::config::models::LogConfig;

/// Target carried by startup and shutdown events; see [`startup!`](crate::startup)
/// and [`shutdown!`](crate::shutdown).
pub const LIFECYCLE_TARGET: &str = "appsh::lifecycle";

static LEVEL_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Verbosity presets, quietest first.
///
/// `Startup` sits between `Info` and `Debug`: it is `Info` plus the
/// lifecycle events emitted while the process starts and stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Silent,
    Quiet,
    #[default]
    Info,
    Startup,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn filter_directive(self) -> &'static str {
        match self {
            LogLevel::Silent => "off",
            LogLevel::Quiet => "warn",
            LogLevel::Info => "info,appsh::lifecycle=off",
            LogLevel::Startup => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Silent => "SILENT",
            LogLevel::Quiet => "QUIET",
            LogLevel::Info => "INFO",
            LogLevel::Startup => "STARTUP",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown log level '{0}' (expected SILENT, QUIET, INFO, STARTUP, DEBUG or TRACE)")]
pub struct ParseLogLevelError(String);

impl FromStr for LogLevel {
    type Err = ParseLogLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SILENT" | "0" => Ok(LogLevel::Silent),
            "QUIET" | "100" => Ok(LogLevel::Quiet),
            "INFO" | "200" => Ok(LogLevel::Info),
            "STARTUP" | "START_UP" | "250" => Ok(LogLevel::Startup),
            "DEBUG" | "300" => Ok(LogLevel::Debug),
            "TRACE" | "400" => Ok(LogLevel::Trace),
            _ => Err(ParseLogLevelError(s.to_string())),
        }
    }
}

/// Timestamps rendered with chrono, either RFC 3339 (`ISO`) or a strftime pattern.
#[derive(Debug, Clone)]
pub struct ChronoTimer {
    format: Option<String>,
}

impl ChronoTimer {
    pub fn new(format: &str) -> Result<Self> {
        if format.is_empty() || format.eq_ignore_ascii_case("ISO") {
            return Ok(Self { format: None });
        }
        if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
            eyre::bail!("Invalid timestamp format: {format}");
        }
        Ok(Self {
            format: Some(format.to_string()),
        })
    }
}

impl FormatTime for ChronoTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        let now = Local::now();
        match &self.format {
            None => write!(w, "{}", now.to_rfc3339_opts(SecondsFormat::Millis, false)),
            Some(format) => write!(w, "{}", now.format(format)),
        }
    }
}

/// Install the global subscriber described by `config`.
///
/// Returns `Ok` without changing anything when a subscriber is already set.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let directive = config.level.filter_directive();
    let env_filter = EnvFilter::try_new(directive)
        .wrap_err_with(|| format!("Invalid log filter: {directive}"))?;
    let (env_filter, level_handle) = reload::Layer::new(env_filter);

    let timer = if config.timestamp {
        Some(ChronoTimer::new(&config.timestamp_format)?)
    } else {
        None
    };

    let fmt_layer = match (config.json, timer) {
        (true, Some(timer)) => tracing_subscriber::fmt::layer()
            .json()
            .with_timer(timer)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        (true, None) => tracing_subscriber::fmt::layer()
            .json()
            .without_time()
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        (false, Some(timer)) => tracing_subscriber::fmt::layer()
            .with_timer(timer)
            .with_target(true)
            .boxed(),
        (false, None) => tracing_subscriber::fmt::layer()
            .without_time()
            .with_target(true)
            .boxed(),
    };

    match Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        Ok(()) => {
            let _ = LEVEL_HANDLE.set(level_handle);
            tracing::debug!(level = %config.level, json = config.json, "Logging initialized");
        }
        Err(e) => {
            tracing::debug!("Logging already initialized, keeping existing subscriber: {}", e);
        }
    }
    Ok(())
}

/// Change the verbosity of the subscriber installed by [`init_logging`]
/// while the process runs.
pub fn set_log_level(level: LogLevel) -> Result<()> {
    let handle = LEVEL_HANDLE
        .get()
        .ok_or_else(|| eyre::eyre!("Logging has not been initialized by init_logging"))?;
    let filter = EnvFilter::try_new(level.filter_directive())
        .wrap_err_with(|| format!("Invalid log filter: {}", level.filter_directive()))?;
    handle
        .reload(filter)
        .wrap_err("Failed to change the log level")?;
    tracing::info!(level = %level, "Log level changed");
    Ok(())
}

/// Create a request-scoped tracing span
pub fn create_request_span(method: &str, path: &str, request_id: &str) -> tracing::Span {
    tracing::info_span!(
        "request",
        http.method = method,
        http.path = path,
        request.id = request_id,
        http.status_code = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    )
}

/// Log a startup message; shown from [`LogLevel::Startup`] upward.
#[macro_export]
macro_rules! startup {
    ($($arg:tt)+) => {
        $crate::tracing::info!(
            target: $crate::tracing_setup::LIFECYCLE_TARGET,
            phase = "startup",
            $($arg)+
        )
    };
}

/// Log a shutdown message; shown from [`LogLevel::Startup`] upward.
#[macro_export]
macro_rules! shutdown {
    ($($arg:tt)+) => {
        $crate::tracing::info!(
            target: $crate::tracing_setup::LIFECYCLE_TARGET,
            phase = "shutdown",
            $($arg)+
        )
    };
}
