/// Core data types for the threshold monitoring service.
///
/// This module defines the shared domain model imported by all other modules:
/// samples, operators, thresholds, metric scope and the metric itself, plus
/// the error types every layer reports through. Crossing logic lives in
/// `alert::thresholds`; this module only carries construction-time validation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Longest sustained duration a threshold may require, in seconds (one week).
pub const SECONDS_MAX: u32 = 604_800;

/// Field name used when a metric does not declare one.
pub const DEFAULT_FIELD_NAME: &str = "value";

// ---------------------------------------------------------------------------
// Sample types
// ---------------------------------------------------------------------------

/// A single recorded measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    pub fn new(value: f64, timestamp: DateTime<Utc>) -> Self {
        Self { value, timestamp }
    }
}

/// Per-write options.
///
/// `time: None` stamps the sample with the evaluation clock. `check: false`
/// stores the sample without evaluating the threshold, which is how history
/// is backfilled without raising alerts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteOptions {
    pub time: Option<DateTime<Utc>>,
    pub check: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self { time: None, check: true }
    }
}

impl WriteOptions {
    pub fn at(time: DateTime<Utc>) -> Self {
        Self { time: Some(time), check: true }
    }

    pub fn unchecked(mut self) -> Self {
        self.check = false;
        self
    }
}

// ---------------------------------------------------------------------------
// Threshold types
// ---------------------------------------------------------------------------

/// Comparison applied between a sample value and the threshold value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Operator {
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Equal,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::GreaterThan => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::LessThan => "<",
            Operator::LessOrEqual => "<=",
            Operator::Equal => "==",
        }
    }

    /// Wording used in notification messages, e.g. "greater than".
    pub fn describe(&self) -> &'static str {
        match self {
            Operator::GreaterThan => "greater than",
            Operator::GreaterOrEqual => "greater than or equal to",
            Operator::LessThan => "less than",
            Operator::LessOrEqual => "less than or equal to",
            Operator::Equal => "equal to",
        }
    }
}

impl FromStr for Operator {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" => Ok(Operator::GreaterThan),
            ">=" => Ok(Operator::GreaterOrEqual),
            "<" => Ok(Operator::LessThan),
            "<=" => Ok(Operator::LessOrEqual),
            "==" => Ok(Operator::Equal),
            other => Err(ConfigError::UnknownOperator(other.to_string())),
        }
    }
}

impl TryFrom<String> for Operator {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.symbol().to_string()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// An alerting rule attached to a metric.
///
/// Fields are private so that every `Threshold` in the process has passed
/// validation; build one with [`Threshold::new`] or [`Threshold::parse`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Threshold {
    operator: Operator,
    value: f64,
    seconds: u32,
}

impl Threshold {
    /// Validates and builds a threshold.
    ///
    /// Fails if `value` is NaN or infinite, or if `seconds` exceeds
    /// [`SECONDS_MAX`].
    pub fn new(operator: Operator, value: f64, seconds: u32) -> Result<Self, ConfigError> {
        if !value.is_finite() {
            return Err(ConfigError::NonFiniteValue(value));
        }
        if seconds > SECONDS_MAX {
            return Err(ConfigError::SecondsOutOfRange { seconds, max: SECONDS_MAX });
        }
        Ok(Self { operator, value, seconds })
    }

    /// Like [`Threshold::new`] but takes the operator symbol as text.
    pub fn parse(operator: &str, value: f64, seconds: u32) -> Result<Self, ConfigError> {
        Self::new(operator.parse()?, value, seconds)
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn seconds(&self) -> u32 {
        self.seconds
    }

    /// Human-readable rule, e.g. "greater than 90.0".
    pub fn describe(&self) -> String {
        format!("{} {:?}", self.operator.describe(), self.value)
    }
}

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricId(pub u64);

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgId(pub String);

impl OrgId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Metric types
// ---------------------------------------------------------------------------

/// The tracked object an object-scoped metric belongs to (a device, a user, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    /// Object type, e.g. "device" or "user".
    pub kind: String,
    pub id: String,
    /// Display name of the object.
    pub label: String,
    /// Tenant owning the object. Objects such as users have none.
    #[serde(default)]
    pub organization: Option<OrgId>,
}

impl TargetRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            label: label.into(),
            organization: None,
        }
    }

    pub fn in_organization(mut self, org: OrgId) -> Self {
        self.organization = Some(org);
        self
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Whether a metric describes the whole system or one tracked object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricScope {
    General,
    Object(TargetRef),
}

impl MetricScope {
    pub fn target(&self) -> Option<&TargetRef> {
        match self {
            MetricScope::General => None,
            MetricScope::Object(target) => Some(target),
        }
    }
}

/// Identifies the stored series a metric writes to.
///
/// Metrics sharing a key but declaring different fields (e.g. traffic
/// download/upload) get separate series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    pub key: String,
    pub field: String,
    /// `(kind, id)` of the target for object metrics.
    pub object: Option<(String, String)>,
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.key, self.field)?;
        if let Some((kind, id)) = &self.object {
            write!(f, "[{}:{}]", kind, id)?;
        }
        Ok(())
    }
}

/// A named time series with an optional threshold and its health projection.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub id: MetricId,
    pub name: String,
    pub key: String,
    pub field_name: String,
    pub scope: MetricScope,
    pub threshold: Option<Threshold>,
    /// Health as of the last evaluation. Starts healthy.
    pub is_healthy: bool,
}

impl Metric {
    /// Builds a metric, deriving `key` from the name when none is given.
    pub fn new(
        id: MetricId,
        name: &str,
        key: Option<&str>,
        field_name: Option<&str>,
        scope: MetricScope,
    ) -> Self {
        let key = match key {
            Some(k) if !k.is_empty() => normalize_key(k),
            _ => codename(name),
        };
        Self {
            id,
            name: name.to_string(),
            key,
            field_name: field_name
                .filter(|f| !f.is_empty())
                .unwrap_or(DEFAULT_FIELD_NAME)
                .to_string(),
            scope,
            threshold: None,
            is_healthy: true,
        }
    }

    pub fn codename(&self) -> String {
        codename(&self.name)
    }

    pub fn target(&self) -> Option<&TargetRef> {
        self.scope.target()
    }

    pub fn series_key(&self) -> SeriesKey {
        SeriesKey {
            key: self.key.clone(),
            field: self.field_name.clone(),
            object: self.target().map(|t| (t.kind.clone(), t.id.clone())),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            MetricScope::General => f.write_str(&self.name),
            MetricScope::Object(target) => {
                write!(f, "{} ({}: {})", self.name, target.kind, target.label)
            }
        }
    }
}

/// Slug of a metric name: lowercase, runs of spaces/dashes become a single
/// `_`, other punctuation is dropped.
pub fn codename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c.is_alphanumeric() || c == '_' {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(c.to_lowercase());
        } else if c.is_whitespace() || c == '-' {
            pending_sep = true;
        }
    }
    out
}

/// Series keys may not contain `-` or `.`.
pub fn normalize_key(key: &str) -> String {
    key.replace(['-', '.'], "_")
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Problems detected while defining thresholds, notification types or loading
/// configuration. Always raised at definition time, never at write time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown operator '{0}' (expected one of >, >=, <, <=, ==)")]
    UnknownOperator(String),
    #[error("seconds: {seconds} exceeds the maximum of {max}")]
    SecondsOutOfRange { seconds: u32, max: u32 },
    #[error("value: threshold value must be finite, got {0}")]
    NonFiniteValue(f64),
    #[error("unknown notification level '{0}'")]
    UnknownLevel(String),
    #[error("notification type '{key}' has an invalid template: {source}")]
    Template {
        key: String,
        #[source]
        source: crate::notify::render::RenderError,
    },
    #[error("notification type '{0}' is missing {1}")]
    IncompleteType(String, &'static str),
    #[error("metric '{0}' is defined more than once")]
    DuplicateMetric(String),
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("webhook sink: {0}")]
    Webhook(#[from] DeliveryError),
}

impl ConfigError {
    /// Name of the offending threshold field, when there is one.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ConfigError::UnknownOperator(_) => Some("operator"),
            ConfigError::SecondsOutOfRange { .. } => Some("seconds"),
            ConfigError::NonFiniteValue(_) => Some("value"),
            _ => None,
        }
    }
}

/// Failures reported by a sample store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Postgres(#[from] postgres::Error),
    #[error("DATABASE_URL is not set")]
    MissingDatabaseUrl,
    #[error("metric id {0} does not fit the storage column")]
    IdOutOfRange(MetricId),
}

/// Failures reported by a notification sink.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("HTTP error: {0}")]
    Http(u16),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Failures building a notification before any delivery is attempted.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown notification type '{0}'")]
    UnknownType(String),
    #[error("failed to render notification '{key}': {source}")]
    Render {
        key: String,
        #[source]
        source: crate::notify::render::RenderError,
    },
}

/// Errors surfaced by the `Monitor` write path.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("unknown metric id {0}")]
    UnknownMetric(MetricId),
    #[error("metric {0} has no threshold")]
    NoThreshold(MetricId),
    #[error("sample value must be a finite number, got {0}")]
    InvalidValue(f64),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
