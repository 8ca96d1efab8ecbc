use std::sync::{Condvar, Mutex};

/// Pause switch the worker checks before and after taking a command.
pub struct PauseGate {
    paused: Mutex<bool>,
    changed: Condvar,
}

impl PauseGate {
    pub fn new() -> Self {
        Self {
            paused: Mutex::new(false),
            changed: Condvar::new(),
        }
    }

    pub fn pause(&self) {
        *self.paused.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }

    pub fn resume(&self) {
        *self.paused.lock().unwrap_or_else(|e| e.into_inner()) = false;
        self.changed.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wake waiters so they re-check whether they are still current.
    pub fn interrupt(&self) {
        let _paused = self.paused.lock().unwrap_or_else(|e| e.into_inner());
        self.changed.notify_all();
    }

    /// Block while paused. `on_pause` runs on every pause check.
    ///
    /// Returns `false` as soon as `is_current` reports that the caller has
    /// been retired.
    pub fn wait_while_paused(&self, is_current: impl Fn() -> bool, mut on_pause: impl FnMut()) -> bool {
        let mut paused = self.paused.lock().unwrap_or_else(|e| e.into_inner());
        while *paused {
            if !is_current() {
                return false;
            }
            on_pause();
            paused = self.changed.wait(paused).unwrap_or_else(|e| e.into_inner());
        }
        is_current()
    }
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}
