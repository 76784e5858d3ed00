/// Threshold crossing rules and sustained-window evaluation.
///
/// A threshold is crossed when a sample's value violates the operator and,
/// for thresholds with a minimum duration, the violation has held without
/// interruption for longer than that duration. Notification dispatch and
/// health bookkeeping live in `monitor`; everything here is pure.
///
/// # Clock injection
/// Every time-dependent function takes `now: DateTime<Utc>` rather than
/// calling `Utc::now()`, so tests stay deterministic.

use chrono::{DateTime, Duration, Utc};

use crate::model::{MetricSample, MonitorError, Operator, SECONDS_MAX, Threshold};

/// How far back the write path looks for earlier samples, in seconds.
/// Slightly beyond `SECONDS_MAX` so the longest allowed window always has a
/// sample on its far side when one exists.
pub const LOOKBACK_SECONDS: i64 = SECONDS_MAX as i64 * 105 / 100;

/// Notification type key for a healthy -> unhealthy transition.
pub const THRESHOLD_CROSSED: &str = "threshold crossed";

/// Notification type key for an unhealthy -> healthy transition.
pub const UNDER_THRESHOLD: &str = "under threshold";

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// A change of health state, the only trigger for notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// healthy -> unhealthy
    Crossed,
    /// unhealthy -> healthy
    Recovered,
}

impl Transition {
    /// Derives the transition between two health states, if any.
    pub fn between(was_healthy: bool, is_healthy: bool) -> Option<Transition> {
        match (was_healthy, is_healthy) {
            (true, false) => Some(Transition::Crossed),
            (false, true) => Some(Transition::Recovered),
            _ => None,
        }
    }

    pub fn notification_type(&self) -> &'static str {
        match self {
            Transition::Crossed => THRESHOLD_CROSSED,
            Transition::Recovered => UNDER_THRESHOLD,
        }
    }

    /// Health state after the transition.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Transition::Recovered)
    }
}

// ---------------------------------------------------------------------------
// Single-point rules
// ---------------------------------------------------------------------------

impl Threshold {
    /// Returns `true` if `value` violates the operator.
    pub fn value_crossed(&self, value: f64) -> bool {
        let limit = self.value();
        match self.operator() {
            Operator::GreaterThan => value > limit,
            Operator::GreaterOrEqual => value >= limit,
            Operator::LessThan => value < limit,
            Operator::LessOrEqual => value <= limit,
            Operator::Equal => value == limit,
        }
    }

    /// Returns `true` if `time` is strictly older than the threshold's
    /// minimum duration relative to `now`.
    pub fn time_crossed(&self, time: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        time < now - Duration::seconds(i64::from(self.seconds()))
    }

    /// Single-point check: the value must violate the operator and, when
    /// `time` is given and the threshold has a duration, the point must also
    /// be older than that duration.
    ///
    /// Returns an error for NaN or infinite values.
    pub fn is_crossed_by(
        &self,
        value: f64,
        time: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, MonitorError> {
        if !value.is_finite() {
            return Err(MonitorError::InvalidValue(value));
        }
        let value_crossed = self.value_crossed(value);
        if self.seconds() == 0 {
            return Ok(value_crossed);
        }
        match time {
            None => Ok(value_crossed),
            Some(t) => Ok(value_crossed && self.time_crossed(t, now)),
        }
    }
}

// ---------------------------------------------------------------------------
// Sustained-window evaluation
// ---------------------------------------------------------------------------

/// Decides whether `sample` leaves the metric crossed.
///
/// `earlier` must hold the samples recorded before `sample`, newest first,
/// and must not contain `sample` itself. The walk stops at the first
/// non-violating sample (not crossed) or the first violating sample older
/// than `now - seconds` (crossed). Running out of history means the window
/// is not yet full, so the metric stays healthy.
pub fn evaluate(
    threshold: &Threshold,
    sample: &MetricSample,
    earlier: &[MetricSample],
    now: DateTime<Utc>,
) -> bool {
    if !threshold.value_crossed(sample.value) {
        return false;
    }
    if threshold.seconds() == 0 {
        return true;
    }
    // a retroactive write can cover the whole window on its own
    if threshold.time_crossed(sample.timestamp, now) {
        return true;
    }
    for point in earlier {
        if !threshold.value_crossed(point.value) {
            return false;
        }
        if threshold.time_crossed(point.timestamp, now) {
            return true;
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
