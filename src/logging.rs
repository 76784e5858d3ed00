/// Structured logging for the threshold monitoring service
///
/// Installs a `tracing` subscriber with a console layer and an optional
/// append-only log file for daemon operation. Events carry a `component`
/// field and, where relevant, the metric they concern. `RUST_LOG` overrides
/// the configured level.

use std::fmt;
use std::fs::OpenOptions;
use std::str::FromStr;
use std::sync::Mutex;

use serde::Deserialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tfmt, EnvFilter, Layer, Registry};

use crate::model::ConfigError;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`.
    fn directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(ConfigError::UnknownLevel(other.to_string())),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, ConfigError> {
        s.parse()
    }
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

/// Part of the service an event comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Evaluator,
    Store,
    Notify,
    Config,
    System,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Evaluator => write!(f, "EVAL"),
            Component::Store => write!(f, "STORE"),
            Component::Notify => write!(f, "NOTIFY"),
            Component::Config => write!(f, "CONFIG"),
            Component::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Initialisation
// ---------------------------------------------------------------------------

/// Installs the global subscriber.
///
/// Returns `Ok(false)` if a subscriber was already installed (tests and
/// embedding applications may set their own), and an error only if the log
/// file cannot be opened.
pub fn init_logger(
    min_level: LogLevel,
    log_file: Option<&str>,
    console_timestamps: bool,
) -> std::io::Result<bool> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(min_level.directive()));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    layers.push(filter.boxed());

    if console_timestamps {
        layers.push(tfmt::layer().with_target(false).boxed());
    } else {
        layers.push(tfmt::layer().with_target(false).without_time().boxed());
    }

    if let Some(path) = log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        layers.push(
            tfmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .boxed(),
        );
    }

    Ok(tracing_subscriber::registry().with(layers).try_init().is_ok())
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

pub fn info(component: Component, metric: Option<&str>, message: &str) {
    tracing::info!(component = %component, metric = metric.unwrap_or("-"), "{}", message);
}

pub fn warn(component: Component, metric: Option<&str>, message: &str) {
    tracing::warn!(component = %component, metric = metric.unwrap_or("-"), "{}", message);
}

pub fn error(component: Component, metric: Option<&str>, message: &str) {
    tracing::error!(component = %component, metric = metric.unwrap_or("-"), "{}", message);
}

pub fn debug(component: Component, metric: Option<&str>, message: &str) {
    tracing::debug!(component = %component, metric = metric.unwrap_or("-"), "{}", message);
}

// ---------------------------------------------------------------------------
// Dispatch Summary Logging
// ---------------------------------------------------------------------------

/// Log the outcome of a notification fan-out
pub fn log_dispatch_summary(metric: &str, notification_type: &str, total: usize, delivered: usize, failed: usize) {
    let message = format!(
        "'{}' dispatched: {}/{} delivered, {} failed",
        notification_type, delivered, total, failed
    );

    if failed == 0 {
        info(Component::Notify, Some(metric), &message);
    } else if delivered == 0 {
        error(Component::Notify, Some(metric), &message);
    } else {
        warn(Component::Notify, Some(metric), &message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert_eq!("Warning".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_log_level_from_owned_string() {
        assert_eq!(LogLevel::try_from("error".to_string()).unwrap(), LogLevel::Error);
        assert!(matches!(
            LogLevel::try_from("loud".to_string()),
            Err(ConfigError::UnknownLevel(ref s)) if s == "loud"
        ));
    }

    #[test]
    fn test_component_tags() {
        assert_eq!(Component::Evaluator.to_string(), "EVAL");
        assert_eq!(Component::Notify.to_string(), "NOTIFY");
    }

    #[test]
    fn test_init_logger_writes_to_file_and_tolerates_second_init() {
        let path = std::env::temp_dir().join(format!("threshold_monitor_{}.log", std::process::id()));
        let path_str = path.to_str().unwrap();
        let first = init_logger(LogLevel::Debug, Some(path_str), true).expect("log file opens");
        let second = init_logger(LogLevel::Info, None, false).expect("no file to open");
        assert!(!second || !first, "only one global subscriber can be installed");
        assert!(path.exists(), "log file should be created");
        let _ = std::fs::remove_file(path);
    }
}
