//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use strata_compute::{InMemoryModel, ProgressEvent, ProgressListener};
use strata_core::Level;

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Forwards every event into a channel.
pub struct Collector(Mutex<Sender<ProgressEvent>>);

impl ProgressListener for Collector {
    fn on_event(&self, event: &ProgressEvent) {
        let _ = self.0.lock().unwrap().send(event.clone());
    }
}

pub fn collector() -> (Arc<Collector>, Receiver<ProgressEvent>) {
    let (tx, rx) = mpsc::channel();
    (Arc::new(Collector(Mutex::new(tx))), rx)
}

/// Receive events until `done` matches one. Returns everything seen,
/// including the matching event.
pub fn wait_for(rx: &Receiver<ProgressEvent>, done: impl Fn(&ProgressEvent) -> bool) -> Vec<ProgressEvent> {
    let deadline = Instant::now() + TIMEOUT;
    let mut seen = Vec::new();
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(left) {
            Ok(event) => {
                let finished = done(&event);
                seen.push(event);
                if finished {
                    return seen;
                }
            }
            Err(RecvTimeoutError::Timeout) => panic!("timed out, events so far: {:?}", seen),
            Err(RecvTimeoutError::Disconnected) => panic!("notifier closed, events so far: {:?}", seen),
        }
    }
}

pub fn project_done(project: &'static str) -> impl Fn(&ProgressEvent) -> bool {
    move |event| matches!(event, ProgressEvent::ProjectComplete { project: p, aborted: false } if p == project)
}

pub fn completed_handles(events: &[ProgressEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Completed { handle, .. } => Some(handle.clone()),
            _ => None,
        })
        .collect()
}

/// Project `p` with packages `a` (units A1, A2) and `b` (unit B1), one type
/// per unit. Package `a` depends on `b` and `b` on `a`.
pub fn two_packages(project: &str) -> InMemoryModel {
    let src = format!("{}/src", project);
    let a = format!("{}/a", src);
    let b = format!("{}/b", src);
    let mut builder = InMemoryModel::builder()
        .project(project)
        .child(project, &src, Level::SourceRoot)
        .child(&src, &a, Level::Package)
        .child(&src, &b, Level::Package);
    for (package, unit) in [(&a, "A1"), (&a, "A2"), (&b, "B1")] {
        let file = format!("{}/{}.java", package, unit);
        let ty = format!("{}/{}", file, unit);
        builder = builder
            .child(package, &file, Level::CompilationUnit)
            .source(&file, &format!("class {} {{\n  void run() {{}}\n}}\n", unit))
            .child(&file, &ty, Level::Type);
    }
    builder
        .depends_on(&format!("{}/A1.java", a), &b)
        .depends_on(&format!("{}/B1.java", b), &a)
        .build()
}

/// Projects `p` and `q`, each shaped like [`two_packages`].
pub fn two_projects() -> InMemoryModel {
    let mut manifest = two_packages("p").to_manifest();
    manifest.elements.extend(two_packages("q").to_manifest().elements);
    InMemoryModel::from_manifest(manifest).unwrap()
}
