use strata_core::{Avg, Level, Max, Metric, MetricSource, PropagationKind};
use tracing::debug;

/// Aggregates one metric, measured at an origin level, into every larger
/// ancestor.
///
/// Children that lack the metric are skipped; they never count as zero. When
/// no child carries it nothing is written.
#[derive(Debug, Clone)]
pub struct Propagator {
    metric: String,
    origin: Level,
    kind: PropagationKind,
}

impl Propagator {
    pub fn new(metric: impl Into<String>, origin: Level, kind: PropagationKind) -> Self {
        Self {
            metric: metric.into(),
            origin,
            kind,
        }
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn origin(&self) -> Level {
        self.origin
    }

    pub fn kind(&self) -> PropagationKind {
        self.kind
    }

    /// Runs on parents strictly larger than the origin level.
    pub fn applies_to(&self, level: Level) -> bool {
        level > self.origin
    }

    /// Scope tag of averages and maxima this propagator writes.
    fn scope(&self) -> &'static str {
        self.origin.name()
    }

    pub fn propagate(&self, parent: &mut MetricSource, children: &[MetricSource]) {
        if !self.applies_to(parent.level()) {
            return;
        }
        match self.kind {
            PropagationKind::Sum => self.sum(parent, children),
            PropagationKind::Avg => self.average(parent, children),
            PropagationKind::Max => self.maximum(parent, children),
        }
    }

    fn sum(&self, parent: &mut MetricSource, children: &[MetricSource]) {
        let mut values = children
            .iter()
            .filter_map(|c| c.value(&self.metric))
            .map(|m| m.value())
            .peekable();
        if values.peek().is_none() {
            return;
        }
        let total: f64 = values.sum();
        if !parent.set_value(Metric::propagated(self.metric.as_str(), total)) {
            debug!(handle = %parent.handle(), metric = %self.metric, "Kept raw value over propagated sum");
        }
    }

    fn average(&self, parent: &mut MetricSource, children: &[MetricSource]) {
        let scope = self.scope();
        let parts: Vec<Avg> = children
            .iter()
            .filter_map(|c| match c.value(&self.metric) {
                Some(m) if !m.is_propagated() => Some(Avg::point(self.metric.as_str(), scope, m.value())),
                _ => c.average(&self.metric, scope).cloned(),
            })
            .collect();
        if let Some(avg) = Avg::merge(&self.metric, scope, &parts) {
            parent.set_average(avg);
        }
    }

    fn maximum(&self, parent: &mut MetricSource, children: &[MetricSource]) {
        let scope = self.scope();
        let candidates = children.iter().filter_map(|c| {
            if let Some(max) = c.maximum(&self.metric, scope) {
                return Some((max.value(), max.causing_handle().map(str::to_string)));
            }
            match c.value(&self.metric) {
                Some(m) if !m.is_propagated() => Some((m.value(), Some(c.handle().to_string()))),
                _ => None,
            }
        });
        if let Some(max) = Max::reduce(&self.metric, scope, candidates) {
            parent.set_maximum(max);
        }
    }
}
