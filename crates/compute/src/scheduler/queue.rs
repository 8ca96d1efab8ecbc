use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

use strata_core::handle::{is_under, project_of};
use strata_core::Handle;

use crate::cancel::CancellationToken;

use super::command::Command;

/// The command the worker is executing right now.
struct Current {
    handle: Handle,
    token: CancellationToken,
}

struct QueueState {
    items: VecDeque<Command>,
    /// Bumped on abort; workers of older generations stop.
    generation: u64,
    current: Option<Current>,
}

/// What an abort did to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbortOutcome {
    /// Queued commands dropped.
    pub removed: usize,
    /// Whether the executing command was cancelled (and the worker retired).
    pub cancelled_current: bool,
    /// Queue generation after the abort. Workers started before it are
    /// retired.
    pub generation: u64,
}

/// Ordered, deduplicating command queue shared by callers and the worker.
///
/// Descendants are kept ahead of their ancestors so that by the time an
/// ancestor is recomputed its changed children are already fresh.
pub struct CommandQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                generation: 0,
                current: None,
            }),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(state: &mut QueueState, command: Command) -> bool {
        if state.items.contains(&command) {
            return false;
        }
        let position = state
            .items
            .iter()
            .position(|queued| is_under(command.handle(), queued.handle()));
        match position {
            Some(index) => state.items.insert(index, command),
            None => state.items.push_back(command),
        }
        true
    }

    /// Queue a command. Returns `false` when a command for the same handle
    /// is already queued.
    pub fn enqueue(&self, command: Command) -> bool {
        let accepted = Self::insert(&mut self.lock(), command);
        if accepted {
            self.available.notify_one();
        }
        accepted
    }

    /// Queue a batch and report the accepted count through `on_accepted`
    /// before any waiting worker can observe the new commands.
    pub fn enqueue_all(&self, commands: impl IntoIterator<Item = Command>, on_accepted: impl FnOnce(usize)) -> usize {
        let mut state = self.lock();
        let accepted = commands
            .into_iter()
            .filter(|command| Self::insert(&mut state, command.clone()))
            .count();
        on_accepted(accepted);
        drop(state);
        if accepted > 0 {
            self.available.notify_all();
        }
        accepted
    }

    /// Block until a command is available for a worker of `generation`.
    ///
    /// The returned command becomes the current one, with a fresh token.
    /// `None` once `generation` has been retired.
    pub fn dequeue(&self, generation: u64) -> Option<(Command, CancellationToken)> {
        let mut state = self.lock();
        loop {
            if state.generation != generation {
                return None;
            }
            if let Some(command) = state.items.pop_front() {
                return Some(Self::start(&mut state, command));
            }
            state = self.available.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Non-blocking dequeue, used by headless execution.
    pub fn try_dequeue(&self) -> Option<(Command, CancellationToken)> {
        let mut state = self.lock();
        let command = state.items.pop_front()?;
        Some(Self::start(&mut state, command))
    }

    fn start(state: &mut QueueState, command: Command) -> (Command, CancellationToken) {
        let token = CancellationToken::new();
        state.current = Some(Current {
            handle: command.handle().to_string(),
            token: token.clone(),
        });
        (command, token)
    }

    /// Mark the command started with `token` as done. A no-op when a newer
    /// command has become current in the meantime.
    pub fn finish_current(&self, token: &CancellationToken) {
        let mut state = self.lock();
        if state.current.as_ref().is_some_and(|c| c.token.same_as(token)) {
            state.current = None;
        }
    }

    /// Run `f` unless `token` has been cancelled, atomically with respect to
    /// aborts.
    pub fn unless_cancelled<R>(&self, token: &CancellationToken, f: impl FnOnce() -> R) -> Option<R> {
        let _state = self.lock();
        if token.is_cancelled() {
            None
        } else {
            Some(f())
        }
    }

    /// Drop queued commands matching `pred`. Returns how many went.
    fn drop_where(state: &mut QueueState, pred: impl Fn(&Command) -> bool) -> usize {
        let before = state.items.len();
        state.items.retain(|c| !pred(c));
        before - state.items.len()
    }

    /// Remove every queued command whose handle starts with `prefix`.
    pub fn remove_all(&self, prefix: &str) -> usize {
        Self::drop_where(&mut self.lock(), |c| is_under(c.handle(), prefix))
    }

    pub fn clear(&self) {
        Self::drop_where(&mut self.lock(), |_| true);
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Handles currently queued, in execution order.
    pub fn handles(&self) -> Vec<Handle> {
        self.lock().items.iter().map(|c| c.handle().to_string()).collect()
    }

    /// Whether any queued command belongs to `project`.
    pub fn has_pending_for(&self, project: &str) -> bool {
        self.lock().items.iter().any(|c| c.project() == project)
    }

    /// Handle of the command being executed, if any.
    pub fn current(&self) -> Option<Handle> {
        self.lock().current.as_ref().map(|c| c.handle.clone())
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Drop `project`'s queued commands. If the current command belongs to
    /// it, cancel it and retire the generation.
    pub fn abort_project(&self, project: &str) -> AbortOutcome {
        let mut guard = self.lock();
        let state = &mut *guard;
        let removed = Self::drop_where(state, |c| c.project() == project);

        let cancelled_current = match &state.current {
            Some(current) if project_of(&current.handle) == project => {
                current.token.cancel();
                state.generation += 1;
                true
            }
            _ => false,
        };
        let generation = state.generation;
        drop(guard);
        if cancelled_current {
            self.available.notify_all();
        }
        AbortOutcome {
            removed,
            cancelled_current,
            generation,
        }
    }

    /// Cancel the current command, drop everything queued and retire the
    /// generation.
    pub fn abort_all(&self) -> AbortOutcome {
        let mut guard = self.lock();
        let state = &mut *guard;
        let removed = Self::drop_where(state, |_| true);
        let cancelled_current = match &state.current {
            Some(current) => {
                current.token.cancel();
                true
            }
            None => false,
        };
        state.generation += 1;
        let generation = state.generation;
        drop(guard);
        self.available.notify_all();
        AbortOutcome {
            removed,
            cancelled_current,
            generation,
        }
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}
