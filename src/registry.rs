/// Metric registry for the threshold monitoring service.
///
/// The single source of truth for metric definitions: names, series keys,
/// scope and attached thresholds. Other modules look metrics up by
/// `MetricId` rather than holding their own copies.

use crate::model::{ConfigError, Metric, MetricId, MetricScope, Threshold};

// ---------------------------------------------------------------------------
// Metric definitions
// ---------------------------------------------------------------------------

/// What a caller supplies to define a metric.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSpec {
    pub name: String,
    pub key: Option<String>,
    pub field_name: Option<String>,
    pub scope: MetricScope,
}

impl MetricSpec {
    pub fn general(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: None,
            field_name: None,
            scope: MetricScope::General,
        }
    }

    pub fn object(name: impl Into<String>, target: crate::model::TargetRef) -> Self {
        Self {
            scope: MetricScope::Object(target),
            ..Self::general(name)
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn field(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = Some(field_name.into());
        self
    }

    fn build(&self, id: MetricId) -> Metric {
        Metric::new(
            id,
            &self.name,
            self.key.as_deref(),
            self.field_name.as_deref(),
            self.scope.clone(),
        )
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MetricRegistry {
    metrics: Vec<Metric>,
    next_id: u64,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self { metrics: Vec::new(), next_id: 1 }
    }

    /// Registers a new metric and returns its id.
    pub fn create(&mut self, spec: MetricSpec) -> MetricId {
        let id = MetricId(self.next_id.max(1));
        self.next_id = id.0 + 1;
        self.metrics.push(spec.build(id));
        id
    }

    /// Returns the metric with the same name, series key and scope as
    /// `spec`, creating it if needed. The flag is `true` when created.
    pub fn get_or_create(&mut self, spec: MetricSpec) -> (MetricId, bool) {
        let candidate = spec.build(MetricId(0));
        let existing = self.metrics.iter().find(|m| {
            m.name == candidate.name && m.series_key() == candidate.series_key() && m.scope == candidate.scope
        });
        match existing {
            Some(m) => (m.id, false),
            None => (self.create(spec), true),
        }
    }

    /// Attaches (or replaces) the threshold of a metric.
    ///
    /// Returns `false` if no metric has that id. Validation already happened
    /// when the `Threshold` was built.
    pub fn set_threshold(&mut self, id: MetricId, threshold: Threshold) -> bool {
        match self.get_mut(id) {
            Some(metric) => {
                metric.threshold = Some(threshold);
                true
            }
            None => false,
        }
    }

    /// Parses and attaches a threshold in one step.
    pub fn define_threshold(
        &mut self,
        id: MetricId,
        operator: &str,
        value: f64,
        seconds: u32,
    ) -> Result<Option<Threshold>, ConfigError> {
        let threshold = Threshold::parse(operator, value, seconds)?;
        Ok(self.set_threshold(id, threshold).then_some(threshold))
    }

    pub fn clear_threshold(&mut self, id: MetricId) -> Option<Threshold> {
        self.get_mut(id).and_then(|m| m.threshold.take())
    }

    pub fn get(&self, id: MetricId) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.id == id)
    }

    pub fn get_mut(&mut self, id: MetricId) -> Option<&mut Metric> {
        self.metrics.iter_mut().find(|m| m.id == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Metric> {
        self.metrics.iter()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TargetRef;

    #[test]
    fn test_get_or_create_returns_existing_metric() {
        let mut registry = MetricRegistry::new();
        let (m, created) = registry.get_or_create(MetricSpec::general("lan").key("br-lan"));
        assert!(created);
        let (m2, created) = registry.get_or_create(MetricSpec::general("lan").key("br-lan"));
        assert_eq!(m, m2);
        assert!(!created);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(m).unwrap().key, "br_lan");
    }

    #[test]
    fn test_same_name_different_target_is_a_different_metric() {
        let mut registry = MetricRegistry::new();
        let a = TargetRef::new("device", "a", "router-a");
        let b = TargetRef::new("device", "b", "router-b");
        let (ma, _) = registry.get_or_create(MetricSpec::object("load", a));
        let (mb, created) = registry.get_or_create(MetricSpec::object("load", b));
        assert!(created);
        assert_ne!(ma, mb);
    }

    #[test]
    fn test_ids_are_unique_and_nonzero() {
        let mut registry = MetricRegistry::new();
        let first = registry.create(MetricSpec::general("a"));
        let second = registry.create(MetricSpec::general("b"));
        assert_ne!(first, second);
        assert!(first.0 > 0);

        let mut defaulted = MetricRegistry::default();
        assert!(defaulted.create(MetricSpec::general("c")).0 > 0);
    }

    #[test]
    fn test_define_threshold_validates_and_attaches() {
        let mut registry = MetricRegistry::new();
        let id = registry.create(MetricSpec::general("load"));

        let err = registry.define_threshold(id, ">", 90.0, 9_999_999).expect_err("too long");
        assert_eq!(err.field(), Some("seconds"));
        assert!(registry.get(id).unwrap().threshold.is_none());

        let t = registry.define_threshold(id, ">", 90.0, 0).unwrap();
        assert!(t.is_some());
        assert_eq!(registry.get(id).unwrap().threshold, t);

        assert_eq!(registry.clear_threshold(id), t);
        assert!(registry.get(id).unwrap().threshold.is_none());
    }

    #[test]
    fn test_threshold_on_unknown_metric() {
        let mut registry = MetricRegistry::new();
        assert_eq!(registry.define_threshold(MetricId(42), ">", 1.0, 0).unwrap(), None);
    }

    #[test]
    fn test_find_by_name() {
        let mut registry = MetricRegistry::new();
        registry.create(MetricSpec::general("traffic (download)").key("traffic").field("download"));
        let m = registry.find_by_name("traffic (download)").expect("registered");
        assert_eq!(m.field_name, "download");
        assert!(registry.find_by_name("missing").is_none());
    }
}
