//! Text and JSON rendering of cached metrics.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use serde_json::{json, Map, Value};
use strata_core::{Handle, MetricSource};
use strata_storage::MetricCache;

/// Human-readable listing of one element's metrics.
pub fn format_source(source: &MetricSource) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", source.handle(), source.level());

    let values: Vec<_> = source.values().collect();
    if !values.is_empty() {
        let _ = writeln!(out, "  values:");
        for metric in values {
            let origin = if metric.is_propagated() { " (sum)" } else { "" };
            let _ = writeln!(out, "    {:<24} {}{}", metric.name(), metric.value(), origin);
        }
    }

    let averages: Vec<_> = source.averages().collect();
    if !averages.is_empty() {
        let _ = writeln!(out, "  averages:");
        for avg in averages {
            let _ = writeln!(
                out,
                "    {:<24} {:.2} per {} (n={}, sd={:.2})",
                avg.name(),
                avg.value(),
                avg.per(),
                avg.points(),
                avg.std_dev()
            );
        }
    }

    let maxima: Vec<_> = source.maxima().collect();
    if !maxima.is_empty() {
        let _ = writeln!(out, "  maxima:");
        for max in maxima {
            let _ = writeln!(
                out,
                "    {:<24} {} per {} at {}",
                max.name(),
                max.value(),
                max.per(),
                max.causing_handle().unwrap_or("-")
            );
        }
    }

    if !source.dependencies().is_empty() {
        let deps: Vec<&str> = source.dependencies().iter().map(String::as_str).collect();
        let _ = writeln!(out, "  depends on: {}", deps.join(", "));
    }
    out
}

/// Cached subtree below `handle` as nested JSON. `None` when `handle`
/// itself is not cached; uncached descendants are left out.
pub fn export_tree(cache: &MetricCache, handle: &str) -> Option<Value> {
    let source = cache.get(handle)?;
    let children: Vec<Value> = source
        .child_handles()
        .iter()
        .filter_map(|child| export_tree(cache, child))
        .collect();

    let values: Map<String, Value> = source
        .values()
        .map(|m| {
            (
                m.name().to_string(),
                json!({ "value": m.value(), "propagated": m.is_propagated() }),
            )
        })
        .collect();
    let averages: Vec<Value> = source
        .averages()
        .map(|a| {
            json!({
                "name": a.name(),
                "per": a.per(),
                "value": a.value(),
                "points": a.points(),
                "variance": a.variance(),
            })
        })
        .collect();
    let maxima: Vec<Value> = source
        .maxima()
        .map(|m| {
            json!({
                "name": m.name(),
                "per": m.per(),
                "value": m.value(),
                "causingHandle": m.causing_handle(),
            })
        })
        .collect();

    Some(json!({
        "handle": source.handle(),
        "level": source.level(),
        "values": values,
        "averages": averages,
        "maxima": maxima,
        "dependencies": source.dependencies(),
        "children": children,
    }))
}

/// One line per package: `package -> dep, dep`.
pub fn format_dependencies(map: &BTreeMap<Handle, BTreeSet<Handle>>) -> String {
    let mut out = String::new();
    for (package, deps) in map {
        let deps: Vec<&str> = deps.iter().map(String::as_str).collect();
        let _ = writeln!(out, "{} -> {}", package, deps.join(", "));
    }
    out
}
