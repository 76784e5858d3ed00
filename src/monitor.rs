/// The metric write path: store the sample, evaluate the threshold, and
/// notify on a health transition.
///
/// Every write runs inline and synchronously. `&mut self` keeps evaluation of
/// one monitor exclusive; across processes the store's compare-and-set on the
/// health state makes sure only one writer dispatches a given transition.
///
/// Functions ending in `_at` take the evaluation clock as `now`; the others
/// use `Utc::now()`.

use chrono::{DateTime, Duration, Utc};

use crate::alert::thresholds::{evaluate, Transition, LOOKBACK_SECONDS, THRESHOLD_CROSSED};
use crate::logging::{self, Component};
use crate::model::{Metric, MetricId, MetricSample, MonitorError, WriteOptions};
use crate::notify::recipients::Identity;
use crate::notify::{DispatchSummary, Dispatcher, NotificationSink};
use crate::registry::MetricRegistry;
use crate::store::{MetricStore, ReadQuery};

pub struct Monitor<S, I, N> {
    registry: MetricRegistry,
    store: S,
    dispatcher: Dispatcher<I, N>,
}

impl<S: MetricStore, I: Identity, N: NotificationSink> Monitor<S, I, N> {
    pub fn new(registry: MetricRegistry, store: S, dispatcher: Dispatcher<I, N>) -> Self {
        Self { registry, store, dispatcher }
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut MetricRegistry {
        &mut self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn dispatcher(&self) -> &Dispatcher<I, N> {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher<I, N> {
        &mut self.dispatcher
    }

    pub fn metric(&self, id: MetricId) -> Option<&Metric> {
        self.registry.get(id)
    }

    /// Re-reads each metric's health from the store, e.g. after a restart.
    /// Metrics the store has never evaluated stay healthy. Returns how many
    /// metrics had a stored state.
    pub fn load_health(&mut self) -> Result<usize, MonitorError> {
        let ids: Vec<MetricId> = self.registry.iter().map(|m| m.id).collect();
        let mut restored = 0;
        let mut unhealthy = 0;
        for id in ids {
            if let Some(healthy) = self.store.load_health(id)? {
                restored += 1;
                if let Some(metric) = self.registry.get_mut(id) {
                    metric.is_healthy = healthy;
                }
                if !healthy {
                    unhealthy += 1;
                }
            }
        }
        logging::info(
            Component::Evaluator,
            None,
            &format!("restored health of {} metric(s), {} unhealthy", restored, unhealthy),
        );
        Ok(restored)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Records `value` now and evaluates the threshold.
    pub fn write(&mut self, id: MetricId, value: f64) -> Result<Option<Transition>, MonitorError> {
        self.write_at(id, value, WriteOptions::default(), Utc::now())
    }

    pub fn write_with(
        &mut self,
        id: MetricId,
        value: f64,
        opts: WriteOptions,
    ) -> Result<Option<Transition>, MonitorError> {
        self.write_at(id, value, opts, Utc::now())
    }

    /// Stores a sample and, unless `opts.check` is false, evaluates the
    /// metric's threshold against it.
    ///
    /// The sample is stamped `opts.time`, or `now` when no time is given.
    /// Returns the transition that was notified, if any.
    pub fn write_at(
        &mut self,
        id: MetricId,
        value: f64,
        opts: WriteOptions,
        now: DateTime<Utc>,
    ) -> Result<Option<Transition>, MonitorError> {
        if !value.is_finite() {
            return Err(MonitorError::InvalidValue(value));
        }
        let metric = self.registry.get(id).ok_or(MonitorError::UnknownMetric(id))?;
        let sample = MetricSample::new(value, opts.time.unwrap_or(now));
        self.store.write_sample(&metric.series_key(), &sample)?;

        tracing::debug!(
            component = %Component::Store,
            metric = %metric,
            value,
            timestamp = %sample.timestamp,
            check = opts.check,
            "sample written"
        );

        if !opts.check {
            return Ok(None);
        }
        self.check_threshold_at(id, value, opts.time, now)
    }

    // -----------------------------------------------------------------------
    // Evaluation
    // -----------------------------------------------------------------------

    /// Evaluates the metric's threshold for a sample of `value` at `time`
    /// (or `now`), updates its health and dispatches on a transition.
    ///
    /// The stored health state is authoritative: every evaluation goes
    /// through `MetricStore::record_transition`, and only the writer whose
    /// compare-and-set flips it dispatches. `Metric::is_healthy` is a local
    /// cache refreshed from the result.
    ///
    /// A metric without a threshold is always healthy: this returns
    /// `Ok(None)` without touching the store.
    pub fn check_threshold_at(
        &mut self,
        id: MetricId,
        value: f64,
        time: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<Transition>, MonitorError> {
        if !value.is_finite() {
            return Err(MonitorError::InvalidValue(value));
        }
        let metric = self.registry.get(id).ok_or(MonitorError::UnknownMetric(id))?;
        let Some(threshold) = metric.threshold else {
            return Ok(None);
        };

        let sample = MetricSample::new(value, time.unwrap_or(now));
        let earlier = if threshold.seconds() > 0 && threshold.value_crossed(value) {
            lookback(&mut self.store, metric, &sample, now)?
        } else {
            Vec::new()
        };
        let crossed = evaluate(&threshold, &sample, &earlier, now);

        let healthy = !crossed;
        let owned = self.store.record_transition(id, healthy)?;

        let metric = self.registry.get_mut(id).ok_or(MonitorError::UnknownMetric(id))?;
        let cached = metric.is_healthy;
        metric.is_healthy = healthy;
        let transition = match Transition::between(!healthy, healthy) {
            Some(transition) if owned => transition,
            _ => {
                if cached != healthy {
                    tracing::debug!(
                        component = %Component::Evaluator,
                        metric = %metric,
                        healthy,
                        "transition already recorded by another writer"
                    );
                }
                return Ok(None);
            }
        };

        tracing::info!(
            component = %Component::Evaluator,
            metric = %metric,
            value,
            threshold = %threshold.describe(),
            ?transition,
            "health state changed"
        );

        let info = match transition {
            Transition::Crossed => format!("({})", threshold.describe()),
            Transition::Recovered => String::new(),
        };
        self.dispatcher
            .dispatch(metric, &threshold, transition.notification_type(), &info, now)?;
        Ok(Some(transition))
    }

    // -----------------------------------------------------------------------
    // Reads and manual notifications
    // -----------------------------------------------------------------------

    pub fn read(&mut self, id: MetricId, query: &ReadQuery) -> Result<Vec<MetricSample>, MonitorError> {
        let metric = self.registry.get(id).ok_or(MonitorError::UnknownMetric(id))?;
        Ok(self.store.read_samples(&metric.series_key(), query)?)
    }

    pub fn notify_users(&mut self, id: MetricId, type_key: &str) -> Result<DispatchSummary, MonitorError> {
        self.notify_users_at(id, type_key, Utc::now())
    }

    /// Sends a notification of an arbitrary type about a metric, bypassing
    /// evaluation. The metric must have a threshold, which becomes the
    /// notification's action object.
    pub fn notify_users_at(
        &mut self,
        id: MetricId,
        type_key: &str,
        now: DateTime<Utc>,
    ) -> Result<DispatchSummary, MonitorError> {
        let metric = self.registry.get(id).ok_or(MonitorError::UnknownMetric(id))?;
        let threshold = metric.threshold.ok_or(MonitorError::NoThreshold(id))?;
        let info = if type_key == THRESHOLD_CROSSED {
            format!("({})", threshold.describe())
        } else {
            String::new()
        };
        Ok(self.dispatcher.dispatch(metric, &threshold, type_key, &info, now)?)
    }
}

/// Earlier samples of the metric's series, newest first, from
/// `now - LOOKBACK_SECONDS` up to the sample's own timestamp. The sample
/// itself is excluded.
fn lookback<S: MetricStore>(
    store: &mut S,
    metric: &Metric,
    sample: &MetricSample,
    now: DateTime<Utc>,
) -> Result<Vec<MetricSample>, MonitorError> {
    let since = now - Duration::seconds(LOOKBACK_SECONDS);
    let query = ReadQuery::between(since, sample.timestamp).newest_first();
    let mut points = store.read_samples(&metric.series_key(), &query)?;
    points.retain(|p| p.timestamp != sample.timestamp);
    Ok(points)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
