//! Asynchronous progress notification.
//!
//! The worker never calls listeners directly: events go through a channel to
//! a dedicated dispatch thread, so a slow or failing listener cannot stall
//! computation. A panicking listener is logged and the others still run.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use strata_core::{Handle, MetricSource};
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A batch of changes was accepted.
    Queued { count: usize },
    /// Computation of an element is about to start.
    Pending { handle: Handle },
    /// An element finished. `source` is `None` for removals and failures.
    Completed {
        handle: Handle,
        source: Option<MetricSource>,
    },
    Moved { handle: Handle, from: Handle },
    ProjectComplete { project: String, aborted: bool },
    /// The worker found the scheduler paused.
    Paused,
    /// Aggregate end of all work (emitted by abort-all).
    Complete { aborted: bool },
}

/// Receives progress events on the notifier thread.
pub trait ProgressListener: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

type Listeners = Arc<RwLock<Vec<Arc<dyn ProgressListener>>>>;

/// Channel-fed dispatcher of [`ProgressEvent`]s.
pub struct Notifier {
    listeners: Listeners,
    sender: Mutex<Option<Sender<ProgressEvent>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Notifier {
    /// Start the dispatch thread.
    pub fn start() -> Self {
        let listeners: Listeners = Arc::new(RwLock::new(Vec::new()));
        let (sender, receiver) = mpsc::channel::<ProgressEvent>();

        let thread = {
            let listeners = Arc::clone(&listeners);
            thread::Builder::new()
                .name("strata-notifier".to_string())
                .spawn(move || {
                    for event in receiver {
                        let listeners: Vec<_> = listeners
                            .read()
                            .unwrap_or_else(|e| e.into_inner())
                            .clone();
                        for listener in listeners {
                            let delivered = panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(&event)));
                            if delivered.is_err() {
                                error!(?event, "Progress listener panicked");
                            }
                        }
                    }
                    debug!("Notifier stopped");
                })
        };
        let thread = match thread {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!(error = %e, "Failed to start notifier thread, progress events disabled");
                None
            }
        };

        Self {
            listeners,
            sender: Mutex::new(thread.as_ref().map(|_| sender)),
            thread: Mutex::new(thread),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn ProgressListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    /// Queue an event for delivery. Dropped silently after [`Notifier::close`].
    pub fn emit(&self, event: ProgressEvent) {
        if let Some(sender) = self.sender.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            // Only fails once the dispatch thread is gone.
            let _ = sender.send(event);
        }
    }

    /// Deliver every queued event, then stop the dispatch thread.
    pub fn close(&self) {
        self.sender.lock().unwrap_or_else(|e| e.into_inner()).take();
        let thread = self.thread.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                error!("Notifier thread panicked");
            }
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.close();
    }
}

/// Listener that writes every event to the log.
pub struct LogListener;

impl ProgressListener for LogListener {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Queued { count } => info!(count, "Queued changes"),
            ProgressEvent::Pending { handle } => debug!(%handle, "Computing"),
            ProgressEvent::Completed { handle, source } => {
                info!(%handle, computed = source.is_some(), "Completed")
            }
            ProgressEvent::Moved { handle, from } => info!(%handle, %from, "Moved"),
            ProgressEvent::ProjectComplete { project, aborted } => {
                info!(%project, aborted, "Project complete")
            }
            ProgressEvent::Paused => debug!("Paused"),
            ProgressEvent::Complete { aborted } => info!(aborted, "All work complete"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Forward(Mutex<Sender<ProgressEvent>>);

    impl ProgressListener for Forward {
        fn on_event(&self, event: &ProgressEvent) {
            let _ = self.0.lock().unwrap().send(event.clone());
        }
    }

    struct Explodes;

    impl ProgressListener for Explodes {
        fn on_event(&self, _event: &ProgressEvent) {
            panic!("listener bug");
        }
    }

    #[test]
    fn events_arrive_in_order_despite_bad_listener() {
        let notifier = Notifier::start();
        let (tx, rx) = mpsc::channel();
        notifier.add_listener(Arc::new(Explodes));
        notifier.add_listener(Arc::new(Forward(Mutex::new(tx))));

        notifier.emit(ProgressEvent::Queued { count: 2 });
        notifier.emit(ProgressEvent::Pending { handle: "p/a".into() });

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(first, ProgressEvent::Queued { count: 2 }));
        assert!(matches!(second, ProgressEvent::Pending { ref handle } if handle == "p/a"));
    }

    #[test]
    fn close_flushes_pending_events() {
        let notifier = Notifier::start();
        let (tx, rx) = mpsc::channel();
        notifier.add_listener(Arc::new(Forward(Mutex::new(tx))));
        notifier.emit(ProgressEvent::Complete { aborted: false });
        notifier.close();
        notifier.emit(ProgressEvent::Paused);

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
    }
}
