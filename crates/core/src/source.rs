use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::handle::{project_of, Handle};
use crate::level::Level;
use crate::metric::{scoped_key, Avg, Max, Metric};

/// Persistent metric record of one code element.
///
/// This is the part of a tree node that lives in the cache. Children are
/// referenced by handle only; the in-memory tree is rebuilt from the cache on
/// demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSource {
    handle: Handle,
    level: Level,
    values: BTreeMap<String, Metric>,
    averages: BTreeMap<String, Avg>,
    maxima: BTreeMap<String, Max>,
    child_handles: Vec<Handle>,
    /// Efferent dependencies (package handles), recorded at package level.
    #[serde(default)]
    dependencies: BTreeSet<Handle>,
}

impl MetricSource {
    pub fn new(handle: impl Into<Handle>, level: Level) -> Self {
        Self {
            handle: handle.into(),
            level,
            values: BTreeMap::new(),
            averages: BTreeMap::new(),
            maxima: BTreeMap::new(),
            child_handles: Vec::new(),
            dependencies: BTreeSet::new(),
        }
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /// Name of the top-level project this element belongs to.
    pub fn project(&self) -> &str {
        project_of(&self.handle)
    }

    // ── Values ────────────────────────────────────────────────────

    pub fn value(&self, name: &str) -> Option<&Metric> {
        self.values.get(name)
    }

    pub fn values(&self) -> impl Iterator<Item = &Metric> {
        self.values.values()
    }

    /// Store a value. A propagated value never replaces a raw one.
    ///
    /// Returns `false` when the value was rejected for that reason.
    pub fn set_value(&mut self, metric: Metric) -> bool {
        if metric.is_propagated() {
            if let Some(existing) = self.values.get(metric.name()) {
                if !existing.is_propagated() {
                    return false;
                }
            }
        }
        self.values.insert(metric.name().to_string(), metric);
        true
    }

    // ── Averages / maxima ─────────────────────────────────────────

    pub fn average(&self, name: &str, per: &str) -> Option<&Avg> {
        self.averages.get(&scoped_key(name, per))
    }

    pub fn averages(&self) -> impl Iterator<Item = &Avg> {
        self.averages.values()
    }

    pub fn set_average(&mut self, avg: Avg) {
        self.averages.insert(avg.key(), avg);
    }

    pub fn maximum(&self, name: &str, per: &str) -> Option<&Max> {
        self.maxima.get(&scoped_key(name, per))
    }

    pub fn maxima(&self) -> impl Iterator<Item = &Max> {
        self.maxima.values()
    }

    pub fn set_maximum(&mut self, max: Max) {
        self.maxima.insert(max.key(), max);
    }

    /// Whether this node carries `name` as a value, or as an average or
    /// maximum over `per`.
    pub fn has_metric(&self, name: &str, per: Option<&str>) -> bool {
        match per {
            None => self.values.contains_key(name),
            Some(per) => {
                let key = scoped_key(name, per);
                self.values.contains_key(name)
                    || self.averages.contains_key(&key)
                    || self.maxima.contains_key(&key)
            }
        }
    }

    // ── Children ──────────────────────────────────────────────────

    pub fn child_handles(&self) -> &[Handle] {
        &self.child_handles
    }

    /// Append a child handle, keeping the list free of duplicates.
    pub fn add_child(&mut self, handle: impl Into<Handle>) -> bool {
        let handle = handle.into();
        if self.child_handles.contains(&handle) {
            return false;
        }
        self.child_handles.push(handle);
        true
    }

    // ── Dependencies ──────────────────────────────────────────────

    pub fn dependencies(&self) -> &BTreeSet<Handle> {
        &self.dependencies
    }

    pub fn set_dependencies(&mut self, dependencies: BTreeSet<Handle>) {
        self.dependencies = dependencies;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn propagated_value_never_overwrites_raw() {
        let mut source = MetricSource::new("p/src/a", Level::Package);
        assert!(source.set_value(Metric::new("NumTypes", 4.0)));
        assert!(!source.set_value(Metric::propagated("NumTypes", 9.0)));
        assert_eq!(source.value("NumTypes").unwrap().value(), 4.0);

        // Raw replaces propagated, propagated replaces propagated.
        assert!(source.set_value(Metric::propagated("TotalLinesOfCode", 10.0)));
        assert!(source.set_value(Metric::propagated("TotalLinesOfCode", 12.0)));
        assert!(source.set_value(Metric::new("TotalLinesOfCode", 3.0)));
        assert!(!source.value("TotalLinesOfCode").unwrap().is_propagated());
    }

    #[test]
    fn children_are_ordered_and_unique() {
        let mut source = MetricSource::new("p", Level::Project);
        assert!(source.add_child("p/src"));
        assert!(source.add_child("p/test"));
        assert!(!source.add_child("p/src"));
        assert_eq!(source.child_handles(), ["p/src", "p/test"]);
    }

    #[test]
    fn scoped_lookup() {
        let mut source = MetricSource::new("p/src/a/A.java", Level::CompilationUnit);
        source.set_average(Avg::point("NumMethods", "type", 3.0));
        source.set_maximum(Max::new("NumMethods", "type", 3.0, Some("p/src/a/A.java#A".into())));

        assert!(source.average("NumMethods", "type").is_some());
        assert!(source.average("NumMethods", "method").is_none());
        assert!(source.has_metric("NumMethods", Some("type")));
        assert!(!source.has_metric("NumMethods", None));
        assert_eq!(source.project(), "p");
    }

    #[test]
    fn msgpack_reconstitutes_record() {
        let mut source = MetricSource::new("p/src/a", Level::Package);
        source.set_value(Metric::new("EfferentCoupling", 2.0));
        source.add_child("p/src/a/A.java");
        source.set_dependencies(["p/src/b".to_string()].into_iter().collect());

        let bytes = rmp_serde::to_vec(&source).unwrap();
        let back: MetricSource = rmp_serde::from_slice(&bytes).unwrap();

        assert_eq!(back.handle(), "p/src/a");
        assert_eq!(back.level(), Level::Package);
        assert_eq!(back.value("EfferentCoupling").unwrap().value(), 2.0);
        assert_eq!(back.child_handles(), ["p/src/a/A.java"]);
        assert!(back.dependencies().contains("p/src/b"));
    }
}
