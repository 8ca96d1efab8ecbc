use std::fmt;

use serde::{Deserialize, Serialize};
use strata_core::handle::{is_strict_ancestor, project_of};
use strata_core::{Handle, MetricSource};
use strata_storage::MetricCache;
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::dispatcher::Dispatcher;
use crate::error::ComputeError;

/// What happened to an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
}

impl ChangeKind {
    pub fn name(self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Changed => "changed",
            ChangeKind::Removed => "removed",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One element change reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub handle: Handle,
    pub kind: ChangeKind,
    /// Previous handle when the element was moved or renamed.
    #[serde(default)]
    pub moved_from: Option<Handle>,
}

impl Change {
    pub fn added(handle: impl Into<Handle>) -> Self {
        Self::new(handle, ChangeKind::Added)
    }

    pub fn changed(handle: impl Into<Handle>) -> Self {
        Self::new(handle, ChangeKind::Changed)
    }

    pub fn removed(handle: impl Into<Handle>) -> Self {
        Self::new(handle, ChangeKind::Removed)
    }

    /// The element now at `handle` used to live at `from`.
    pub fn moved(handle: impl Into<Handle>, from: impl Into<Handle>) -> Self {
        Self {
            handle: handle.into(),
            kind: ChangeKind::Added,
            moved_from: Some(from.into()),
        }
    }

    fn new(handle: impl Into<Handle>, kind: ChangeKind) -> Self {
        Self {
            handle: handle.into(),
            kind,
            moved_from: None,
        }
    }
}

/// A queued unit of recomputation work. Commands are equal when their
/// handles are.
#[derive(Debug, Clone)]
pub struct Command {
    change: Change,
}

impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        self.change.handle == other.change.handle
    }
}

impl Eq for Command {}

impl From<Change> for Command {
    fn from(change: Change) -> Self {
        Self { change }
    }
}

impl Command {
    pub fn handle(&self) -> &str {
        &self.change.handle
    }

    pub fn kind(&self) -> ChangeKind {
        self.change.kind
    }

    pub fn moved_from(&self) -> Option<&str> {
        self.change.moved_from.as_deref()
    }

    pub fn project(&self) -> &str {
        project_of(&self.change.handle)
    }

    /// Apply the change to the cache and, unless the element was removed,
    /// recompute it.
    ///
    /// Returns the recomputed record, or `None` for removals.
    pub fn execute(
        &self,
        dispatcher: &Dispatcher,
        refresh_ancestors: bool,
        token: &CancellationToken,
    ) -> Result<Option<MetricSource>, ComputeError> {
        let cache = dispatcher.cache();
        purge(cache, self.handle());
        if let Some(from) = self.moved_from() {
            let removed = cache.remove_subtree(from);
            debug!(handle = %self.handle(), from, removed, "Purged moved subtree");
            if refresh_ancestors {
                invalidate_ancestors(cache, from);
            }
        }
        if refresh_ancestors {
            invalidate_ancestors(cache, self.handle());
        }

        match self.kind() {
            ChangeKind::Removed => Ok(None),
            ChangeKind::Added | ChangeKind::Changed => {
                token.check()?;
                dispatcher.get_or_compute(self.handle(), token).map(Some)
            }
        }
    }
}

/// Drop cached metrics of `handle`: the whole subtree for compilation units
/// and larger, the single entry otherwise. Unknown levels purge the subtree.
fn purge(cache: &MetricCache, handle: &str) {
    let subtree = cache
        .get(handle)
        .map(|source| source.level().purges_subtree())
        .unwrap_or(true);
    if subtree {
        cache.remove_subtree(handle);
    } else {
        cache.remove(handle);
    }
}

/// Drop the cached records (own entry only) of every ancestor of `handle`,
/// so aggregated values are recomputed on the next request.
fn invalidate_ancestors(cache: &MetricCache, handle: &str) -> usize {
    let ancestors: Vec<Handle> = cache
        .keys_for_handle(handle)
        .into_iter()
        .filter(|key| is_strict_ancestor(key, handle))
        .collect();
    for key in &ancestors {
        cache.remove(key);
    }
    if !ancestors.is_empty() {
        debug!(handle, invalidated = ancestors.len(), "Invalidated ancestors");
    }
    ancestors.len()
}
