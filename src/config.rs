/// Configuration file loading.
///
/// A single TOML document describes the site, logging, users, notification
/// type overrides and the monitored metrics with their thresholds. Everything
/// is validated here, at load time, so a bad operator or template never
/// reaches the write path.
///
/// ```toml
/// site_name = "example.com"
///
/// [logging]
/// level = "info"
/// file = "monitor.log"
///
/// [[users]]
/// id = "admin"
/// is_admin = true
///
/// [[metrics]]
/// name = "load"
/// [metrics.threshold]
/// operator = ">"
/// value = 90.0
/// seconds = 0
/// ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::logging::{self, Component, LogLevel};
use crate::model::{ConfigError, Operator, TargetRef, Threshold};
use crate::notify::recipients::{User, UserDirectory};
use crate::notify::types::{NotificationLevel, NotificationType, NotificationTypes};
use crate::notify::webhook::{WebhookSink, DEFAULT_TIMEOUT_SECS};
use crate::notify::{Dispatcher, NotificationSink};
use crate::monitor::Monitor;
use crate::registry::{MetricRegistry, MetricSpec};
use crate::store::MetricStore;

// ---------------------------------------------------------------------------
// File structure
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    #[serde(default = "default_site_name")]
    pub site_name: String,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub webhook: Option<WebhookConfig>,
    #[serde(default)]
    pub notification_types: BTreeMap<String, NotificationTypeConfig>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub metrics: Vec<MetricConfig>,
}

fn default_site_name() -> String {
    "example.com".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    pub file: Option<String>,
    #[serde(default = "default_true")]
    pub console_timestamps: bool,
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            console_timestamps: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Overrides for a notification type. Fields left out keep the built-in
/// value; a brand-new type must set all of them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationTypeConfig {
    pub name: Option<String>,
    pub verb: Option<String>,
    pub level: Option<String>,
    pub message: Option<String>,
    pub email_subject: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricConfig {
    pub name: String,
    pub key: Option<String>,
    pub field_name: Option<String>,
    pub target: Option<TargetRef>,
    pub threshold: Option<ThresholdConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdConfig {
    pub operator: String,
    pub value: f64,
    #[serde(default)]
    pub seconds: u32,
}

impl ThresholdConfig {
    pub fn to_threshold(&self) -> Result<Threshold, ConfigError> {
        let operator: Operator = self.operator.parse()?;
        Threshold::new(operator, self.value, self.seconds)
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl MonitorConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Installs the global logger from the `[logging]` section.
    pub fn init_logging(&self) -> Result<bool, ConfigError> {
        let installed = logging::init_logger(
            self.logging.level,
            self.logging.file.as_deref(),
            self.logging.console_timestamps,
        )?;
        if installed {
            logging::info(
                Component::System,
                None,
                &format!("logging at {} for site {}", self.logging.level, self.site_name),
            );
        }
        Ok(installed)
    }

    /// Registers every configured metric and attaches its threshold.
    pub fn build_registry(&self) -> Result<MetricRegistry, ConfigError> {
        let mut registry = MetricRegistry::new();

        for metric in &self.metrics {
            let mut spec = match &metric.target {
                Some(target) => MetricSpec::object(metric.name.as_str(), target.clone()),
                None => MetricSpec::general(metric.name.as_str()),
            };
            if let Some(key) = &metric.key {
                spec = spec.key(key.as_str());
            }
            if let Some(field) = &metric.field_name {
                spec = spec.field(field.as_str());
            }

            let (id, created) = registry.get_or_create(spec);
            if !created {
                return Err(ConfigError::DuplicateMetric(metric.name.clone()));
            }
            if let Some(threshold) = &metric.threshold {
                registry.set_threshold(id, threshold.to_threshold()?);
            }
        }

        logging::info(
            Component::Config,
            None,
            &format!("registered {} metric(s)", registry.len()),
        );
        Ok(registry)
    }

    /// Built-in notification types merged with the configured overrides.
    pub fn notification_types(&self) -> Result<NotificationTypes, ConfigError> {
        let mut types = NotificationTypes::monitoring_defaults();

        for (key, overrides) in &self.notification_types {
            let merged = match types.get(key).cloned() {
                Some(base) => NotificationType {
                    name: overrides.name.clone().unwrap_or(base.name),
                    verb: overrides.verb.clone().unwrap_or(base.verb),
                    level: match &overrides.level {
                        Some(level) => level.parse::<NotificationLevel>()?,
                        None => base.level,
                    },
                    message: overrides.message.clone().unwrap_or(base.message),
                    email_subject: overrides.email_subject.clone().unwrap_or(base.email_subject),
                },
                None => {
                    let missing = |field| ConfigError::IncompleteType(key.clone(), field);
                    NotificationType {
                        name: overrides.name.clone().unwrap_or_else(|| key.clone()),
                        verb: overrides.verb.clone().ok_or_else(|| missing("verb"))?,
                        level: overrides
                            .level
                            .as_deref()
                            .ok_or_else(|| missing("level"))?
                            .parse()?,
                        message: overrides.message.clone().ok_or_else(|| missing("message"))?,
                        email_subject: overrides
                            .email_subject
                            .clone()
                            .ok_or_else(|| missing("email_subject"))?,
                    }
                }
            };
            types.register(key, merged)?;
        }
        Ok(types)
    }

    pub fn user_directory(&self) -> UserDirectory {
        self.users.iter().cloned().collect()
    }

    /// The configured webhook sink, if a `[webhook]` section is present.
    pub fn webhook_sink(&self) -> Result<Option<WebhookSink>, ConfigError> {
        match &self.webhook {
            Some(hook) => Ok(Some(WebhookSink::new(
                hook.url.clone(),
                Duration::from_secs(hook.timeout_secs),
            )?)),
            None => Ok(None),
        }
    }

    /// Assembles a monitor over `store`, delivering to `sink`.
    pub fn build_monitor<S: MetricStore, N: NotificationSink>(
        &self,
        store: S,
        sink: N,
    ) -> Result<Monitor<S, UserDirectory, N>, ConfigError> {
        let dispatcher = Dispatcher::new(
            self.notification_types()?,
            self.site_name.clone(),
            self.user_directory(),
            sink,
        );
        Ok(Monitor::new(self.build_registry()?, store, dispatcher))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MetricScope, OrgId, UserId};
    use crate::notify::recipients::Identity;
    use crate::notify::NotificationLog;
    use crate::store::InMemoryStore;

    const SAMPLE: &str = r#"
        site_name = "monitor.example.org"

        [logging]
        level = "warn"
        console_timestamps = false

        [[users]]
        id = "admin"
        is_admin = true

        [[users]]
        id = "staff"
        is_staff = true
        organizations = ["acme"]

        [notification_types."threshold crossed"]
        level = "error"

        [notification_types.maintenance]
        verb = "entered maintenance"
        level = "info"
        message = "Metric {metric} {verb}"
        email_subject = "[{site}] maintenance"

        [[metrics]]
        name = "load"
        [metrics.threshold]
        operator = ">"
        value = 90.0
        seconds = 61

        [[metrics]]
        name = "traffic (download)"
        key = "traffic"
        field_name = "download"
        [metrics.target]
        kind = "device"
        id = "d1"
        label = "router"
        organization = "acme"
    "#;

    #[test]
    fn test_parses_sample_config() {
        let cfg = MonitorConfig::from_toml_str(SAMPLE).expect("valid config");
        assert_eq!(cfg.site_name, "monitor.example.org");
        assert_eq!(cfg.logging.level, LogLevel::Warning);
        assert!(!cfg.logging.console_timestamps);
        assert!(cfg.webhook.is_none());
        assert_eq!(cfg.users.len(), 2);
        assert_eq!(cfg.metrics.len(), 2);
    }

    #[test]
    fn test_build_registry_attaches_thresholds_and_targets() {
        let cfg = MonitorConfig::from_toml_str(SAMPLE).unwrap();
        let registry = cfg.build_registry().unwrap();

        let load = registry.find_by_name("load").unwrap();
        let t = load.threshold.expect("threshold attached");
        assert_eq!(t.seconds(), 61);
        assert_eq!(t.operator(), Operator::GreaterThan);

        let traffic = registry.find_by_name("traffic (download)").unwrap();
        assert_eq!(traffic.key, "traffic");
        assert_eq!(traffic.field_name, "download");
        match &traffic.scope {
            MetricScope::Object(target) => assert_eq!(target.organization, Some(OrgId::new("acme"))),
            MetricScope::General => panic!("traffic should be an object metric"),
        }
        assert!(traffic.threshold.is_none());
    }

    #[test]
    fn test_notification_type_overrides_and_additions() {
        let cfg = MonitorConfig::from_toml_str(SAMPLE).unwrap();
        let types = cfg.notification_types().unwrap();
        let crossed = types.get("threshold crossed").unwrap();
        assert_eq!(crossed.level, NotificationLevel::Error);
        assert_eq!(crossed.verb, "crossed threshold limit", "unset fields keep defaults");
        let maintenance = types.get("maintenance").unwrap();
        assert_eq!(maintenance.name, "maintenance");
        assert_eq!(maintenance.verb, "entered maintenance");
    }

    #[test]
    fn test_user_directory_from_config() {
        let cfg = MonitorConfig::from_toml_str(SAMPLE).unwrap();
        let dir = cfg.user_directory();
        assert!(dir.is_admin(&UserId::new("admin")));
        assert!(dir.in_organization(&UserId::new("staff"), &OrgId::new("acme")));
    }

    #[test]
    fn test_invalid_operator_is_reported_at_load() {
        let text = r#"
            [[metrics]]
            name = "load"
            [metrics.threshold]
            operator = "~"
            value = 1.0
        "#;
        let cfg = MonitorConfig::from_toml_str(text).unwrap();
        let err = cfg.build_registry().expect_err("bad operator");
        assert!(matches!(err, ConfigError::UnknownOperator(_)));
    }

    #[test]
    fn test_seconds_out_of_range_is_reported_at_load() {
        let text = r#"
            [[metrics]]
            name = "load"
            [metrics.threshold]
            operator = ">"
            value = 90.0
            seconds = 9999999
        "#;
        let err = MonitorConfig::from_toml_str(text)
            .unwrap()
            .build_registry()
            .expect_err("too long");
        assert_eq!(err.field(), Some("seconds"));
    }

    #[test]
    fn test_duplicate_metric_is_rejected() {
        let text = r#"
            [[metrics]]
            name = "load"
            [[metrics]]
            name = "load"
        "#;
        let err = MonitorConfig::from_toml_str(text).unwrap().build_registry().expect_err("dup");
        assert!(matches!(err, ConfigError::DuplicateMetric(ref n) if n == "load"));
    }

    #[test]
    fn test_incomplete_new_type_is_rejected() {
        let text = r#"
            [notification_types.custom]
            verb = "did something"
        "#;
        let err = MonitorConfig::from_toml_str(text).unwrap().notification_types().expect_err("incomplete");
        assert!(matches!(err, ConfigError::IncompleteType(ref k, "level") if k == "custom"));
    }

    #[test]
    fn test_bad_template_override_is_rejected() {
        let text = r#"
            [notification_types."under threshold"]
            message = "Metric {metrc} recovered"
        "#;
        let err = MonitorConfig::from_toml_str(text).unwrap().notification_types().expect_err("typo");
        assert!(matches!(err, ConfigError::Template { .. }));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(matches!(
            MonitorConfig::from_toml_str("sitename = \"typo\""),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_webhook_section_builds_sink() {
        let cfg = MonitorConfig::from_toml_str("[webhook]\nurl = \"http://127.0.0.1:9/hook\"").unwrap();
        let sink = cfg.webhook_sink().unwrap().expect("webhook configured");
        assert_eq!(sink.url(), "http://127.0.0.1:9/hook");
        assert_eq!(cfg.webhook.unwrap().timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_build_monitor_wires_everything() {
        let cfg = MonitorConfig::from_toml_str(SAMPLE).unwrap();
        let monitor = cfg.build_monitor(InMemoryStore::new(), NotificationLog::new()).unwrap();
        assert_eq!(monitor.registry().len(), 2);
        assert_eq!(monitor.dispatcher().site_name(), "monitor.example.org");
        assert!(monitor.dispatcher().types().contains("maintenance"));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = MonitorConfig::load("/nonexistent/threshold_monitor.toml").expect_err("missing file");
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
