//! Threaded scheduler behavior: pause, abort and shutdown while work runs.

mod helpers;

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use strata_compute::{
    CalcContext, Calculator, CalculatorError, Change, Engine, Pipeline, ProgressEvent, SchedulerState,
};
use strata_core::{Level, Metric, MetricSource};

use helpers::{collector, completed_handles, project_done, two_packages, two_projects, wait_for, TIMEOUT};

/// Blocks on one compilation unit until released.
struct Blocking {
    target: &'static str,
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

impl Calculator for Blocking {
    fn name(&self) -> &str {
        "Blocking"
    }

    fn level(&self) -> Level {
        Level::CompilationUnit
    }

    fn calculate(&self, source: &mut MetricSource, _ctx: &CalcContext<'_>) -> Result<(), CalculatorError> {
        if source.handle() == self.target {
            let _ = self.entered.lock().unwrap().send(());
            let _ = self.release.lock().unwrap().recv_timeout(TIMEOUT);
        }
        source.set_value(Metric::new("Blocking", 1.0));
        Ok(())
    }
}

fn blocking_engine(target: &'static str) -> (Engine, Receiver<ProgressEvent>, Receiver<()>, Sender<()>) {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let calculator = Blocking {
        target,
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    };
    let (listener, events) = collector();
    let engine = Engine::builder(Arc::new(two_projects()))
        .pipeline(Pipeline::new(vec![Arc::new(calculator) as Arc<dyn Calculator>], Vec::new()))
        .listener(listener)
        .build();
    (engine, events, entered_rx, release_tx)
}

#[test]
fn abort_suppresses_completion_of_running_command() {
    let (engine, events, entered, release) = blocking_engine("p/src/a/A1.java");

    engine.schedule(vec![Change::changed("p/src/a/A1.java"), Change::changed("p/src/b/B1.java")]);
    entered.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(engine.state(), SchedulerState::Running);

    engine.abort("p");
    assert_eq!(engine.scheduler().queue_len(), 0);
    assert!(engine.scheduler().projects_in_flight().is_empty());

    // Other projects keep running on a fresh worker.
    engine.schedule(vec![Change::changed("q/src/a/A1.java")]);
    let seen = wait_for(&events, project_done("q"));
    release.send(()).unwrap();

    assert!(seen.iter().any(|e| matches!(
        e,
        ProgressEvent::ProjectComplete { project, aborted: true } if project == "p"
    )));
    engine.shutdown();
    let rest: Vec<_> = events.try_iter().collect();
    let completed = completed_handles(&seen.iter().chain(rest.iter()).cloned().collect::<Vec<_>>());
    assert_eq!(completed, vec!["q/src/a/A1.java"]);
    assert_eq!(engine.scheduler_metrics().aborts, 1);
}

#[test]
fn paused_scheduler_holds_work_until_resumed() {
    let (listener, events) = collector();
    let engine = Engine::builder(Arc::new(two_packages("p"))).listener(listener).build();

    engine.pause();
    engine.schedule(vec![Change::added("p/src/a/A1.java")]);
    wait_for(&events, |e| matches!(e, ProgressEvent::Paused));
    assert_eq!(engine.state(), SchedulerState::Paused);
    std::thread::sleep(Duration::from_millis(50));
    assert!(!engine.is_available("p/src/a/A1.java"));

    engine.resume();
    let seen = wait_for(&events, project_done("p"));
    assert_eq!(completed_handles(&seen), vec!["p/src/a/A1.java"]);
    assert!(engine.is_available("p"));
}

#[test]
fn pause_applies_to_worker_waiting_for_work() {
    let (listener, events) = collector();
    let engine = Engine::builder(Arc::new(two_projects())).listener(listener).build();

    engine.schedule(vec![Change::added("q/src/a/A1.java")]);
    wait_for(&events, project_done("q"));
    // The worker stays up, blocked on the empty queue.
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(engine.state(), SchedulerState::Running);

    engine.pause();
    engine.schedule(vec![Change::added("p/src/a/A1.java")]);
    let seen = wait_for(&events, |e| matches!(e, ProgressEvent::Paused));
    assert!(completed_handles(&seen).is_empty());
    assert_eq!(engine.state(), SchedulerState::Paused);
    std::thread::sleep(Duration::from_millis(50));
    assert!(!engine.is_available("p/src/a/A1.java"));

    engine.resume();
    let seen = wait_for(&events, project_done("p"));
    assert_eq!(completed_handles(&seen), vec!["p/src/a/A1.java"]);
    assert!(engine.is_available("p/src/a/A1.java"));
}

#[test]
fn abort_all_drops_queue_and_reports_completion() {
    let (engine, events, entered, release) = blocking_engine("p/src/a/A1.java");

    engine.schedule(vec![
        Change::changed("p/src/a/A1.java"),
        Change::changed("p/src/b/B1.java"),
        Change::changed("q/src/a/A1.java"),
    ]);
    entered.recv_timeout(TIMEOUT).unwrap();

    engine.abort_all();
    release.send(()).unwrap();
    let seen = wait_for(&events, |e| matches!(e, ProgressEvent::Complete { aborted: true }));
    assert!(completed_handles(&seen).is_empty());
    assert_eq!(engine.scheduler().queue_len(), 0);
    assert!(engine.scheduler().projects_in_flight().is_empty());
}

#[test]
fn shutdown_ignores_later_changes() {
    let engine = Engine::builder(Arc::new(two_packages("p"))).build();
    engine.shutdown();
    assert_eq!(engine.schedule(vec![Change::added("p")]), 0);
    assert_eq!(engine.state(), SchedulerState::Idle);
}
