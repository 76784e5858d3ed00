/// Notification type definitions.
///
/// A notification type carries the verb, level and templates used when a
/// notification of that kind is built. Types are held in an explicit
/// [`NotificationTypes`] map handed to the dispatcher, so there is no
/// process-wide registry to mutate at startup.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::alert::{THRESHOLD_CROSSED, UNDER_THRESHOLD};
use crate::model::ConfigError;
use crate::notify::render;

/// Key of the generic type used for ad-hoc notifications.
pub const DEFAULT_TYPE: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Success,
    Info,
    Warning,
    Error,
}

impl NotificationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationLevel::Success => "success",
            NotificationLevel::Info => "info",
            NotificationLevel::Warning => "warning",
            NotificationLevel::Error => "error",
        }
    }
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(NotificationLevel::Success),
            "info" => Ok(NotificationLevel::Info),
            "warning" => Ok(NotificationLevel::Warning),
            "error" => Ok(NotificationLevel::Error),
            other => Err(ConfigError::UnknownLevel(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationType {
    pub name: String,
    pub verb: String,
    pub level: NotificationLevel,
    /// Template for the notification body.
    pub message: String,
    /// Template for the email subject line.
    pub email_subject: String,
}

impl NotificationType {
    /// Rejects templates that reference unknown fields or have unbalanced
    /// braces.
    pub fn validate(&self, key: &str) -> Result<(), ConfigError> {
        for template in [&self.message, &self.email_subject] {
            render::validate(template).map_err(|source| ConfigError::Template {
                key: key.to_string(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Notification types keyed by name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NotificationTypes {
    types: BTreeMap<String, NotificationType>,
}

impl NotificationTypes {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The monitoring types plus the generic `default` type.
    pub fn monitoring_defaults() -> Self {
        let email_subject = "[{site}] {level} - {subject} has {verb}".to_string();
        let message = "Metric {metric} {verb} {info}".to_string();

        let mut types = BTreeMap::new();
        types.insert(
            THRESHOLD_CROSSED.to_string(),
            NotificationType {
                name: "Monitoring Alert".to_string(),
                verb: "crossed threshold limit".to_string(),
                level: NotificationLevel::Warning,
                message: message.clone(),
                email_subject: email_subject.clone(),
            },
        );
        types.insert(
            UNDER_THRESHOLD.to_string(),
            NotificationType {
                name: "Monitoring Alert".to_string(),
                verb: "returned within threshold limit".to_string(),
                level: NotificationLevel::Info,
                message,
                email_subject,
            },
        );
        types.insert(
            DEFAULT_TYPE.to_string(),
            NotificationType {
                name: "Default Type".to_string(),
                verb: "default verb".to_string(),
                level: NotificationLevel::Info,
                message: "Default notification with {verb} and level {level} by {actor}".to_string(),
                email_subject: "[{site}] Default Notification Subject".to_string(),
            },
        );
        Self { types }
    }

    /// Adds or replaces a type after validating its templates.
    pub fn register(&mut self, key: &str, notification_type: NotificationType) -> Result<(), ConfigError> {
        notification_type.validate(key)?;
        self.types.insert(key.to_string(), notification_type);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&NotificationType> {
        self.types.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.types.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_contain_monitoring_types() {
        let types = NotificationTypes::monitoring_defaults();
        let crossed = types.get(THRESHOLD_CROSSED).expect("threshold crossed type");
        assert_eq!(crossed.level, NotificationLevel::Warning);
        assert_eq!(crossed.verb, "crossed threshold limit");

        let under = types.get(UNDER_THRESHOLD).expect("under threshold type");
        assert_eq!(under.level, NotificationLevel::Info);
        assert_eq!(under.verb, "returned within threshold limit");

        assert!(types.contains(DEFAULT_TYPE));
        assert_eq!(types.len(), 3);
    }

    #[test]
    fn test_default_templates_are_valid() {
        let types = NotificationTypes::monitoring_defaults();
        for key in types.keys() {
            let t = types.get(key).unwrap();
            assert!(t.validate(key).is_ok(), "default type '{}' should validate", key);
        }
    }

    #[test]
    fn test_register_rejects_bad_template() {
        let mut types = NotificationTypes::empty();
        let bad = NotificationType {
            name: "Broken".to_string(),
            verb: "broke".to_string(),
            level: NotificationLevel::Error,
            message: "{unknown_field}".to_string(),
            email_subject: "ok".to_string(),
        };
        let err = types.register("broken", bad).expect_err("should reject");
        assert!(matches!(err, ConfigError::Template { ref key, .. } if key == "broken"));
        assert!(types.is_empty());
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("WARNING".parse::<NotificationLevel>().unwrap(), NotificationLevel::Warning);
        assert_eq!("info".parse::<NotificationLevel>().unwrap(), NotificationLevel::Info);
        assert!("critical".parse::<NotificationLevel>().is_err());
        assert!(NotificationLevel::Info < NotificationLevel::Warning);
    }
}
