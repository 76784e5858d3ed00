/// Sample and health-state persistence.
///
/// `MetricStore` is the seam between the monitor and whatever keeps the time
/// series. Two backends ship with the crate: `InMemoryStore` below, and
/// `db::PgStore` for PostgreSQL.
///
/// Series semantics follow a time-series database: writing at a timestamp
/// that already exists in the series replaces the earlier value.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::model::{MetricId, MetricSample, SeriesKey, StoreError};

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Ascending,
    Descending,
}

/// Time-bounded read over one series. Both bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadQuery {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub order: Order,
    pub limit: Option<usize>,
}

impl ReadQuery {
    pub fn between(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            since: Some(since),
            until: Some(until),
            ..Self::default()
        }
    }

    pub fn newest_first(mut self) -> Self {
        self.order = Order::Descending;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

pub trait MetricStore {
    /// Appends a sample, replacing any sample at the same timestamp.
    fn write_sample(&mut self, series: &SeriesKey, sample: &MetricSample) -> Result<(), StoreError>;

    /// Returns the samples matching `query`, ordered by time.
    fn read_samples(
        &mut self,
        series: &SeriesKey,
        query: &ReadQuery,
    ) -> Result<Vec<MetricSample>, StoreError>;

    /// Last recorded health state; `None` if the metric was never evaluated.
    fn load_health(&mut self, metric: MetricId) -> Result<Option<bool>, StoreError>;

    /// Compare-and-set on the stored health state.
    ///
    /// Stores `healthy` and returns `true` only if it differs from the
    /// recorded state (a missing record counts as healthy). Returns `false`
    /// if the state already matches, meaning another writer has handled the
    /// transition.
    fn record_transition(&mut self, metric: MetricId, healthy: bool) -> Result<bool, StoreError>;
}

// ---------------------------------------------------------------------------
// Shared backends
// ---------------------------------------------------------------------------

/// Several monitors (e.g. one per worker thread) writing through one store.
/// The health compare-and-set runs under the lock, so exactly one of them
/// owns each transition.
impl<S: MetricStore> MetricStore for Arc<Mutex<S>> {
    fn write_sample(&mut self, series: &SeriesKey, sample: &MetricSample) -> Result<(), StoreError> {
        lock(self).write_sample(series, sample)
    }

    fn read_samples(
        &mut self,
        series: &SeriesKey,
        query: &ReadQuery,
    ) -> Result<Vec<MetricSample>, StoreError> {
        lock(self).read_samples(series, query)
    }

    fn load_health(&mut self, metric: MetricId) -> Result<Option<bool>, StoreError> {
        lock(self).load_health(metric)
    }

    fn record_transition(&mut self, metric: MetricId, healthy: bool) -> Result<bool, StoreError> {
        lock(self).record_transition(metric, healthy)
    }
}

// updates are single inserts, so a poisoned lock still guards consistent data
fn lock<S>(store: &Mutex<S>) -> MutexGuard<'_, S> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryStore {
    series: HashMap<SeriesKey, BTreeMap<DateTime<Utc>, f64>>,
    health: HashMap<MetricId, bool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of samples stored for `series`.
    pub fn len(&self, series: &SeriesKey) -> usize {
        self.series.get(series).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(BTreeMap::is_empty)
    }
}

impl MetricStore for InMemoryStore {
    fn write_sample(&mut self, series: &SeriesKey, sample: &MetricSample) -> Result<(), StoreError> {
        self.series
            .entry(series.clone())
            .or_default()
            .insert(sample.timestamp, sample.value);
        Ok(())
    }

    fn read_samples(
        &mut self,
        series: &SeriesKey,
        query: &ReadQuery,
    ) -> Result<Vec<MetricSample>, StoreError> {
        let Some(points) = self.series.get(series) else {
            return Ok(Vec::new());
        };
        let in_range = points.iter().filter(|(ts, _)| {
            query.since.is_none_or(|since| **ts >= since) && query.until.is_none_or(|until| **ts <= until)
        });
        let limit = query.limit.unwrap_or(usize::MAX);
        let samples: Vec<MetricSample> = match query.order {
            Order::Ascending => in_range
                .take(limit)
                .map(|(ts, v)| MetricSample::new(*v, *ts))
                .collect(),
            Order::Descending => in_range
                .rev()
                .take(limit)
                .map(|(ts, v)| MetricSample::new(*v, *ts))
                .collect(),
        };
        Ok(samples)
    }

    fn load_health(&mut self, metric: MetricId) -> Result<Option<bool>, StoreError> {
        Ok(self.health.get(&metric).copied())
    }

    fn record_transition(&mut self, metric: MetricId, healthy: bool) -> Result<bool, StoreError> {
        let current = self.health.get(&metric).copied().unwrap_or(true);
        if current == healthy {
            return Ok(false);
        }
        self.health.insert(metric, healthy);
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap()
    }

    fn series(key: &str) -> SeriesKey {
        SeriesKey {
            key: key.to_string(),
            field: "value".to_string(),
            object: None,
        }
    }

    fn seeded() -> InMemoryStore {
        let mut store = InMemoryStore::new();
        let s = series("load");
        for (i, v) in [50.0, 1.0, 7.0].iter().enumerate() {
            let ts = fixed_now() + Duration::seconds(i as i64 * 10);
            store.write_sample(&s, &MetricSample::new(*v, ts)).unwrap();
        }
        store
    }

    #[test]
    fn test_read_defaults_to_ascending() {
        let mut store = seeded();
        let samples = store.read_samples(&series("load"), &ReadQuery::default()).unwrap();
        let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![50.0, 1.0, 7.0]);
    }

    #[test]
    fn test_read_descending_with_limit() {
        let mut store = seeded();
        let query = ReadQuery::default().newest_first().limit(1);
        let samples = store.read_samples(&series("load"), &query).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, 7.0);
    }

    #[test]
    fn test_read_bounds_are_inclusive() {
        let mut store = seeded();
        let query = ReadQuery::between(fixed_now(), fixed_now() + Duration::seconds(10));
        let samples = store.read_samples(&series("load"), &query).unwrap();
        assert_eq!(samples.len(), 2);
    }

    #[test]
    fn test_write_at_same_timestamp_replaces_value() {
        let mut store = InMemoryStore::new();
        let s = series("load");
        store.write_sample(&s, &MetricSample::new(89.0, fixed_now())).unwrap();
        store.write_sample(&s, &MetricSample::new(91.0, fixed_now())).unwrap();
        assert_eq!(store.len(&s), 1);
        let samples = store.read_samples(&s, &ReadQuery::default()).unwrap();
        assert_eq!(samples[0].value, 91.0);
    }

    #[test]
    fn test_unknown_series_reads_empty() {
        let mut store = InMemoryStore::new();
        assert!(store.is_empty());
        let samples = store.read_samples(&series("missing"), &ReadQuery::default()).unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn test_record_transition_is_compare_and_set() {
        let mut store = InMemoryStore::new();
        let id = MetricId(1);
        assert_eq!(store.load_health(id).unwrap(), None);
        assert!(!store.record_transition(id, true).unwrap(), "missing record counts as healthy");
        assert!(store.record_transition(id, false).unwrap());
        assert!(!store.record_transition(id, false).unwrap(), "second writer loses the transition");
        assert_eq!(store.load_health(id).unwrap(), Some(false));
        assert!(store.record_transition(id, true).unwrap());
    }

    #[test]
    fn test_shared_store_clones_see_one_health_state() {
        let mut a = Arc::new(Mutex::new(InMemoryStore::new()));
        let mut b = Arc::clone(&a);
        let id = MetricId(7);
        let s = series("load");

        a.write_sample(&s, &MetricSample::new(99.0, fixed_now())).unwrap();
        assert_eq!(b.read_samples(&s, &ReadQuery::default()).unwrap().len(), 1);

        assert!(a.record_transition(id, false).unwrap());
        assert!(!b.record_transition(id, false).unwrap(), "the other handle sees the recorded state");
        assert_eq!(b.load_health(id).unwrap(), Some(false));
        assert!(b.record_transition(id, true).unwrap());
        assert_eq!(a.load_health(id).unwrap(), Some(true));
    }
}
