//! Metric value records.
//!
//! Values are immutable after construction. Two values are equal when they
//! carry the same `(name, scope)`, regardless of the number they hold, so a
//! set or map of values deduplicates by identity rather than by measurement.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A single named measurement.
///
/// `propagated == false` means the value was measured by a calculator;
/// `true` means it is a sum derived from children.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    name: String,
    value: f64,
    propagated: bool,
}

impl Metric {
    /// A raw, calculator-measured value.
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            propagated: false,
        }
    }

    /// A sum derived from children.
    pub fn propagated(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            propagated: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn is_propagated(&self) -> bool {
        self.propagated
    }
}

impl PartialEq for Metric {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Metric {}

impl Hash for Metric {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// Key under which scoped values (averages, maxima) are stored on a node.
pub fn scoped_key(name: &str, per: &str) -> String {
    format!("{}:{}", per, name)
}

/// Point-weighted average of a metric over a sub-population.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Avg {
    name: String,
    per: String,
    value: f64,
    points: u64,
    variance: f64,
}

impl Avg {
    /// Average of a single point.
    pub fn point(name: impl Into<String>, per: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            per: per.into(),
            value,
            points: 1,
            variance: 0.0,
        }
    }

    /// Average of raw values. `None` when `values` is empty.
    pub fn from_values(name: &str, per: &str, values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let sum: f64 = values.iter().sum();
        let sum_sq: f64 = values.iter().map(|v| v * v).sum();
        let mean = sum / n;
        Some(Self {
            name: name.to_string(),
            per: per.to_string(),
            value: mean,
            points: values.len() as u64,
            variance: clamp_variance(sum_sq / n - mean * mean),
        })
    }

    /// Merge averages, weighting each by its point count.
    ///
    /// `None` when the parts hold no points at all.
    pub fn merge<'a>(name: &str, per: &str, parts: impl IntoIterator<Item = &'a Avg>) -> Option<Self> {
        let mut points = 0u64;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for part in parts {
            if part.points == 0 {
                continue;
            }
            let n = part.points as f64;
            points += part.points;
            sum += n * part.value;
            sum_sq += n * (part.variance + part.value * part.value);
        }
        if points == 0 {
            return None;
        }
        let n = points as f64;
        let mean = sum / n;
        Some(Self {
            name: name.to_string(),
            per: per.to_string(),
            value: mean,
            points,
            variance: clamp_variance(sum_sq / n - mean * mean),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scope ("per") this average was taken over.
    pub fn per(&self) -> &str {
        &self.per
    }

    /// The mean.
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn points(&self) -> u64 {
        self.points
    }

    pub fn variance(&self) -> f64 {
        self.variance
    }

    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }

    pub fn key(&self) -> String {
        scoped_key(&self.name, &self.per)
    }
}

fn clamp_variance(v: f64) -> f64 {
    if v < 0.0 { 0.0 } else { v }
}

impl PartialEq for Avg {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.per == other.per
    }
}

impl Eq for Avg {}

impl Hash for Avg {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.per.hash(state);
    }
}

/// Maximum of a metric over a sub-population, remembering which element
/// produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Max {
    name: String,
    per: String,
    value: f64,
    causing_handle: Option<String>,
}

impl Max {
    pub fn new(
        name: impl Into<String>,
        per: impl Into<String>,
        value: f64,
        causing_handle: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            per: per.into(),
            value,
            causing_handle,
        }
    }

    /// Reduce `(value, causing handle)` candidates to their maximum.
    ///
    /// The first candidate wins ties. NaN candidates are ignored. `None` when
    /// no usable candidate remains.
    pub fn reduce(
        name: &str,
        per: &str,
        candidates: impl IntoIterator<Item = (f64, Option<String>)>,
    ) -> Option<Self> {
        let mut best: Option<(f64, Option<String>)> = None;
        for (value, handle) in candidates {
            if value.is_nan() {
                continue;
            }
            match &best {
                Some((current, _)) if value <= *current => {}
                _ => best = Some((value, handle)),
            }
        }
        best.map(|(value, causing_handle)| Self::new(name, per, value, causing_handle))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn per(&self) -> &str {
        &self.per
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn causing_handle(&self) -> Option<&str> {
        self.causing_handle.as_deref()
    }

    pub fn key(&self) -> String {
        scoped_key(&self.name, &self.per)
    }
}

impl PartialEq for Max {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.per == other.per
    }
}

impl Eq for Max {}

impl Hash for Max {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.per.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn avg_from_values_matches_population_variance() {
        let avg = Avg::from_values("M", "method", &[2.0, 4.0, 6.0]).unwrap();
        assert_eq!(avg.points(), 3);
        assert!((avg.value() - 4.0).abs() < 1e-12);
        assert!((avg.variance() - 8.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn avg_from_empty_is_none() {
        assert!(Avg::from_values("M", "method", &[]).is_none());
    }

    #[test]
    fn merge_is_weighted_by_points() {
        // Parts over {1, 3} and {5}: merged population {1, 3, 5}.
        let a = Avg::from_values("M", "type", &[1.0, 3.0]).unwrap();
        let b = Avg::point("M", "type", 5.0);
        let merged = Avg::merge("M", "type", [&a, &b]).unwrap();
        let direct = Avg::from_values("M", "type", &[1.0, 3.0, 5.0]).unwrap();

        assert_eq!(merged.points(), 3);
        assert!((merged.value() - direct.value()).abs() < 1e-12);
        assert!((merged.variance() - direct.variance()).abs() < 1e-9);
    }

    #[test]
    fn variance_never_negative() {
        let avg = Avg::from_values("M", "method", &[0.1, 0.1, 0.1]).unwrap();
        assert!(avg.variance() >= 0.0);
        let merged = Avg::merge("M", "method", [&avg, &avg]).unwrap();
        assert!(merged.variance() >= 0.0);
    }

    #[test]
    fn max_first_seen_wins_ties() {
        let max = Max::reduce(
            "M",
            "method",
            vec![
                (3.0, Some("a".to_string())),
                (7.0, Some("b".to_string())),
                (7.0, Some("c".to_string())),
                (f64::NAN, Some("d".to_string())),
            ],
        )
        .unwrap();
        assert_eq!(max.value(), 7.0);
        assert_eq!(max.causing_handle(), Some("b"));
    }

    #[test]
    fn max_of_nothing_is_none() {
        assert!(Max::reduce("M", "method", Vec::new()).is_none());
    }

    #[test]
    fn identity_is_name_and_scope() {
        let mut set = HashSet::new();
        set.insert(Avg::point("M", "method", 1.0));
        set.insert(Avg::point("M", "method", 9.0));
        set.insert(Avg::point("M", "type", 1.0));
        assert_eq!(set.len(), 2);

        assert_eq!(Metric::new("M", 1.0), Metric::propagated("M", 2.0));
    }
}
