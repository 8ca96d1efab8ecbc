use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use strata_core::config::SchedulerSettings;
use strata_core::handle::{is_project, project_of};
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::dispatcher::Dispatcher;
use crate::error::ComputeError;

use super::command::{Change, Command};
use super::gate::PauseGate;
use super::metrics::SchedulerMetrics;
use super::notifier::{Notifier, ProgressEvent, ProgressListener};
use super::queue::CommandQueue;
use super::types::SchedulerState;

/// Whether the worker keeps going after a command.
enum Flow {
    Continue,
    Stop,
}

/// The single background worker, if any.
struct WorkerSlot {
    running: bool,
    generation: u64,
    thread: Option<JoinHandle<()>>,
}

struct Shared {
    dispatcher: Arc<Dispatcher>,
    settings: SchedulerSettings,
    queue: CommandQueue,
    gate: PauseGate,
    notifier: Notifier,
    metrics: RwLock<SchedulerMetrics>,
    /// Projects with outstanding work.
    in_flight: Mutex<BTreeSet<String>>,
    worker: Mutex<WorkerSlot>,
    shutdown: AtomicBool,
}

/// Serializes recomputation work onto one background worker.
///
/// Changes are wrapped in commands and queued (deduplicated, descendants
/// first). The worker executes one command at a time and reports progress
/// through the notifier. Lock order is worker slot, then pause gate, then queue.
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    pub fn new(dispatcher: Arc<Dispatcher>, settings: SchedulerSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                dispatcher,
                settings,
                queue: CommandQueue::new(),
                gate: PauseGate::new(),
                notifier: Notifier::start(),
                metrics: RwLock::new(SchedulerMetrics::default()),
                in_flight: Mutex::new(BTreeSet::new()),
                worker: Mutex::new(WorkerSlot {
                    running: false,
                    generation: 0,
                    thread: None,
                }),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn ProgressListener>) {
        self.shared.notifier.add_listener(listener);
    }

    pub fn is_headless(&self) -> bool {
        self.shared.settings.headless
    }

    /// Queue a batch of changes and, unless headless, make sure the worker
    /// runs. Returns the number of commands accepted.
    pub fn schedule(&self, changes: Vec<Change>) -> usize {
        let shared = &self.shared;
        if shared.shutdown.load(Ordering::Acquire) {
            warn!(count = changes.len(), "Scheduler shut down, dropping changes");
            return 0;
        }

        {
            let mut in_flight = shared.lock_in_flight();
            for change in &changes {
                in_flight.insert(project_of(&change.handle).to_string());
            }
        }
        let accepted = shared.queue.enqueue_all(changes.into_iter().map(Command::from), |count| {
            shared.notifier.emit(ProgressEvent::Queued { count });
        });
        debug!(accepted, queued = shared.queue.len(), "Scheduled changes");

        if !shared.settings.headless {
            Shared::ensure_worker(shared);
        }
        accepted
    }

    /// Headless: drain every queued command on this thread, in queue order.
    /// Otherwise: make sure the worker is running.
    ///
    /// Returns the number of commands executed inline.
    pub fn execute(&self) -> usize {
        let shared = &self.shared;
        if !shared.settings.headless {
            Shared::ensure_worker(shared);
            return 0;
        }
        let mut executed = 0;
        while let Some((command, token)) = shared.queue.try_dequeue() {
            executed += 1;
            shared.process(&command, &token);
            shared.queue.finish_current(&token);
        }
        executed
    }

    pub fn pause(&self) {
        info!("Scheduler paused");
        self.shared.gate.pause();
    }

    pub fn resume(&self) {
        info!("Scheduler resumed");
        self.shared.gate.resume();
    }

    /// Abort all work for `project`: drop its queued commands and cancel its
    /// running command. Other projects continue.
    pub fn abort(&self, project: &str) {
        let shared = &self.shared;
        let outcome = shared.queue.abort_project(project);
        info!(project, removed = outcome.removed, cancelled = outcome.cancelled_current, "Aborting project");

        if outcome.cancelled_current {
            shared.gate.interrupt();
            shared.retire_worker(outcome.generation);
        }
        shared.lock_in_flight().remove(project);
        shared.write_metrics(|m| m.aborts += 1);
        shared.notifier.emit(ProgressEvent::ProjectComplete {
            project: project.to_string(),
            aborted: true,
        });
        if outcome.cancelled_current && !shared.settings.headless {
            Shared::ensure_worker(shared);
        }
    }

    /// Abort everything: cancel the running command and drop the queue.
    pub fn abort_all(&self) {
        let shared = &self.shared;
        let outcome = shared.queue.abort_all();
        info!(removed = outcome.removed, cancelled = outcome.cancelled_current, "Aborting all work");
        shared.gate.interrupt();
        shared.retire_worker(outcome.generation);
        shared.lock_in_flight().clear();
        shared.write_metrics(|m| m.aborts += 1);
        shared.notifier.emit(ProgressEvent::Complete { aborted: true });
    }

    pub fn state(&self) -> SchedulerState {
        self.shared.state()
    }

    /// Snapshot of the scheduler metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        let mut metrics = self
            .shared
            .metrics
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        metrics.queue_depth = self.shared.queue.len();
        metrics.state = self.shared.state();
        metrics
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    /// Projects with queued or running work.
    pub fn projects_in_flight(&self) -> BTreeSet<String> {
        self.shared.lock_in_flight().clone()
    }

    /// Stop the worker (cancelling its command), then deliver outstanding
    /// events and stop the notifier. Queued commands are dropped.
    pub fn shutdown(&self) {
        let shared = &self.shared;
        if shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(dropped = shared.queue.len(), "Scheduler shutting down");
        shared.queue.abort_all();
        shared.gate.interrupt();
        let thread = {
            let mut slot = shared.lock_slot();
            slot.running = false;
            slot.thread.take()
        };
        if let Some(thread) = thread {
            if thread.join().is_err() {
                error!("Scheduler worker panicked");
            }
        }
        shared.notifier.close();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, WorkerSlot> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write_metrics(&self, f: impl FnOnce(&mut SchedulerMetrics)) {
        f(&mut self.metrics.write().unwrap_or_else(|e| e.into_inner()));
    }

    fn state(&self) -> SchedulerState {
        if !self.lock_slot().running {
            SchedulerState::Idle
        } else if self.gate.is_paused() {
            SchedulerState::Paused
        } else {
            SchedulerState::Running
        }
    }

    /// Start a worker for the current generation if none runs and work is
    /// queued.
    fn ensure_worker(shared: &Arc<Shared>) {
        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }
        let mut slot = shared.lock_slot();
        if slot.running || shared.queue.is_empty() {
            return;
        }
        let generation = shared.queue.generation();
        let worker = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name(format!("strata-worker-{}", generation))
            .spawn(move || worker.run(generation));
        match spawned {
            Ok(thread) => {
                slot.running = true;
                slot.generation = generation;
                // A retired worker's handle is detached; it exits on its own.
                slot.thread = Some(thread);
                debug!(generation, "Started worker");
            }
            Err(e) => error!(error = %e, "Failed to start worker thread"),
        }
    }

    /// Forget the current worker if it predates generation `current`. A
    /// worker already started for `current` (or later) is left alone.
    fn retire_worker(&self, current: u64) {
        let mut slot = self.lock_slot();
        if slot.generation < current {
            slot.running = false;
            slot.thread.take();
        }
    }

    /// Worker loop for one generation.
    fn run(&self, generation: u64) {
        debug!(generation, "Worker running");
        let is_current = || self.queue.generation() == generation;
        let on_pause = || self.notifier.emit(ProgressEvent::Paused);

        loop {
            if !self.gate.wait_while_paused(is_current, on_pause) {
                break;
            }
            let Some((command, token)) = self.queue.dequeue(generation) else {
                break;
            };
            if !self.gate.wait_while_paused(is_current, on_pause) || token.is_cancelled() {
                self.queue.finish_current(&token);
                break;
            }
            let flow = self.process(&command, &token);
            self.queue.finish_current(&token);
            if let Flow::Stop = flow {
                break;
            }
        }

        let mut slot = self.lock_slot();
        if slot.generation == generation {
            slot.running = false;
        }
        debug!(generation, "Worker stopped");
    }

    /// Execute one command and emit its progress events.
    fn process(&self, command: &Command, token: &CancellationToken) -> Flow {
        let handle = command.handle();
        self.notifier.emit(ProgressEvent::Pending {
            handle: handle.to_string(),
        });

        let started = Instant::now();
        let refresh = self.settings.refresh_ancestors;
        let source = match command.execute(&self.dispatcher, refresh, token) {
            Ok(source) => source,
            Err(ComputeError::Cancelled) => {
                debug!(handle, "Command cancelled");
                return Flow::Stop;
            }
            Err(e) => {
                warn!(handle, kind = %command.kind(), error = %e, "Command failed");
                self.write_metrics(|m| m.failures += 1);
                None
            }
        };
        self.write_metrics(|m| m.record_execution(command.kind(), started.elapsed()));

        let emitted = self.queue.unless_cancelled(token, || {
            if let Some(from) = command.moved_from() {
                self.notifier.emit(ProgressEvent::Moved {
                    handle: handle.to_string(),
                    from: from.to_string(),
                });
            }
            self.notifier.emit(ProgressEvent::Completed {
                handle: handle.to_string(),
                source,
            });
        });
        if emitted.is_none() {
            return Flow::Stop;
        }

        let project = command.project();
        let mut project_done = is_project(handle);
        if refresh && !project_done && !self.queue.has_pending_for(project) {
            match self.dispatcher.get_or_compute(project, token) {
                Ok(_) => {
                    debug!(project, "Rolled up project");
                    self.write_metrics(|m| m.rollups += 1);
                    project_done = true;
                }
                Err(ComputeError::Cancelled) => return Flow::Stop,
                Err(e) => warn!(project, error = %e, "Project roll-up failed"),
            }
        }

        if project_done {
            let emitted = self.queue.unless_cancelled(token, || {
                self.lock_in_flight().remove(project);
                self.notifier.emit(ProgressEvent::ProjectComplete {
                    project: project.to_string(),
                    aborted: false,
                });
            });
            if emitted.is_none() {
                return Flow::Stop;
            }
        }
        Flow::Continue
    }
}
