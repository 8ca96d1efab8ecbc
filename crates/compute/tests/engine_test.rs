//! End-to-end tests: model changes flow through the scheduler into the
//! cache and out through progress events.

mod helpers;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use strata_compute::calculator::builtin::{NUM_TYPES, TOTAL_LINES_OF_CODE};
use strata_compute::{Change, Engine, ProgressEvent};
use strata_core::{Level, StrataConfig};
use strata_storage::MetricCache;
use uuid::Uuid;

use helpers::{collector, completed_handles, project_done, two_packages, wait_for};

fn num_types(engine: &Engine, handle: &str) -> Option<f64> {
    engine
        .metrics(handle)
        .and_then(|source| source.value(NUM_TYPES).map(|m| m.value()))
}

#[test]
fn headless_removal_updates_project_sum() {
    let model = Arc::new(two_packages("p"));
    let (listener, rx) = collector();
    let engine = Engine::builder(model.clone()).headless(true).listener(listener).build();

    engine.schedule(vec![Change::added("p")]);
    assert_eq!(engine.execute(), 1);
    assert_eq!(num_types(&engine, "p"), Some(3.0));
    assert!(engine.is_available("p/src/a/A2.java"));

    model.remove("p/src/a/A2.java");
    engine.schedule(vec![Change::removed("p/src/a/A2.java")]);
    assert_eq!(engine.execute(), 1);

    assert_eq!(num_types(&engine, "p"), Some(2.0));
    assert_eq!(num_types(&engine, "p/src/a"), Some(1.0));
    assert!(engine.metrics("p/src/a/A2.java").is_none());
    assert!(engine.metrics("p/src/a/A2.java/A2").is_none());

    engine.shutdown();
    let events: Vec<_> = rx.try_iter().collect();
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::Completed { handle, source: None } if handle == "p/src/a/A2.java"
    )));
    let done = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::ProjectComplete { aborted: false, .. }))
        .count();
    assert_eq!(done, 2);
}

#[test]
fn threaded_removal_updates_project_sum() {
    let model = Arc::new(two_packages("p"));
    let (listener, rx) = collector();
    let engine = Engine::builder(model.clone()).listener(listener).build();

    engine.schedule(vec![Change::added("p/src/a/A1.java"), Change::added("p/src/b/B1.java")]);
    let events = wait_for(&rx, project_done("p"));
    assert_eq!(completed_handles(&events).len(), 2);
    assert_eq!(num_types(&engine, "p"), Some(3.0));

    model.remove("p/src/a/A2.java");
    engine.schedule(vec![Change::removed("p/src/a/A2.java")]);
    wait_for(&rx, project_done("p"));

    assert_eq!(num_types(&engine, "p"), Some(2.0));
    assert!(!engine.is_available("p/src/a/A2.java"));
    assert_eq!(engine.scheduler_metrics().total_executed(), 3);
    assert!(engine.scheduler_metrics().rollups >= 2);
}

#[test]
fn headless_runs_descendants_first_and_isolates_failures() {
    let model = Arc::new(two_packages("p"));
    let (listener, rx) = collector();
    let engine = Engine::builder(model).headless(true).listener(listener).build();

    engine.schedule(vec![
        Change::changed("p/src"),
        Change::changed("p/src/missing"),
        Change::changed("p/src/a/A1.java"),
    ]);
    assert_eq!(engine.execute(), 3);

    let metrics = engine.scheduler_metrics();
    assert_eq!(metrics.failures, 1);
    assert_eq!(metrics.total_executed(), 3);
    assert!(engine.is_available("p/src"));

    engine.shutdown();
    let events: Vec<_> = rx.try_iter().collect();
    assert!(matches!(events[0], ProgressEvent::Queued { count: 3 }));
    let completed = completed_handles(&events);
    assert_eq!(completed, vec!["p/src/missing", "p/src/a/A1.java", "p/src"]);
}

#[test]
fn moved_elements_report_their_origin() {
    let model = Arc::new(two_packages("p"));
    let (listener, rx) = collector();
    let engine = Engine::builder(model.clone()).headless(true).listener(listener).build();
    engine.compute_now("p").unwrap();

    model.remove("p/src/b/B1.java");
    model.insert(Some("p/src/a"), "p/src/a/B1.java", Level::CompilationUnit);
    engine.schedule(vec![Change::moved("p/src/a/B1.java", "p/src/b/B1.java")]);
    engine.execute();

    assert!(!engine.is_available("p/src/b/B1.java"));
    assert!(engine.is_available("p/src/a/B1.java"));
    assert_eq!(num_types(&engine, "p/src/b"), None);

    engine.shutdown();
    let events: Vec<_> = rx.try_iter().collect();
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::Moved { handle, from } if handle == "p/src/a/B1.java" && from == "p/src/b/B1.java"
    )));
}

#[test]
fn efferent_dependencies_map_packages() {
    let engine = Engine::builder(Arc::new(two_packages("p"))).headless(true).build();
    assert!(engine.efferent_dependencies("p").is_empty());

    engine.compute_now("p").unwrap();
    let expected: BTreeMap<String, BTreeSet<String>> = [
        ("p/src/a".to_string(), BTreeSet::from(["p/src/b".to_string()])),
        ("p/src/b".to_string(), BTreeSet::from(["p/src/a".to_string()])),
    ]
    .into_iter()
    .collect();
    assert_eq!(engine.efferent_dependencies("p"), expected);
}

#[test]
fn children_having_filters_by_metric() {
    let engine = Engine::builder(Arc::new(two_packages("p"))).headless(true).build();
    let package = engine.compute_now("p/src/a").unwrap();

    let units = engine.children_having(&package, TOTAL_LINES_OF_CODE, None);
    assert_eq!(units.len(), 2);
    assert!(units.iter().all(|u| u.level() == Level::CompilationUnit));
    assert!(engine.children_having(&package, "Unknown", None).is_empty());
}

#[test]
fn results_survive_restart() {
    let dir = std::env::temp_dir().join(format!("strata-engine-{}", Uuid::new_v4()));
    let mut config = StrataConfig::default();
    config.storage.state_dir = dir.clone();
    config.scheduler.headless = true;

    {
        let engine = Engine::open(&config, Arc::new(two_packages("p"))).unwrap();
        let project = engine.compute_now("p").unwrap();
        assert_eq!(project.value(NUM_TYPES).map(|m| m.value()), Some(3.0));
        engine.shutdown();
    }

    // An empty model proves the values come from disk.
    let engine = Engine::builder(Arc::new(strata_compute::InMemoryModel::new()))
        .cache(MetricCache::open(&dir).unwrap())
        .headless(true)
        .build();
    assert_eq!(num_types(&engine, "p"), Some(3.0));
    assert_eq!(num_types(&engine, "p/src/a/A1.java"), Some(1.0));

    engine.clear();
    assert!(engine.metrics("p").is_none());
    drop(engine);
    let _ = std::fs::remove_dir_all(&dir);
}
