use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use strata_core::{Handle, MetricSource};
use strata_storage::MetricCache;
use tracing::{debug, trace};

use crate::cancel::CancellationToken;
use crate::error::ComputeError;
use crate::model::{ChildContext, ElementModel};
use crate::pipeline::Pipeline;
use crate::tree::SourceNode;

thread_local! {
    /// Handles being built on this thread, keyed by dispatcher address.
    static BUILDING: RefCell<Vec<(usize, Handle)>> = const { RefCell::new(Vec::new()) };
}

/// Marks `handle` as being built on this thread until dropped.
struct BuildingGuard {
    owner: usize,
}

impl BuildingGuard {
    fn enter(owner: usize, handle: &str) -> Result<Self, ComputeError> {
        BUILDING.with(|building| {
            let mut building = building.borrow_mut();
            if building.iter().any(|(o, h)| *o == owner && h == handle) {
                return Err(ComputeError::Cycle(handle.to_string()));
            }
            building.push((owner, handle.to_string()));
            Ok(Self { owner })
        })
    }
}

impl Drop for BuildingGuard {
    fn drop(&mut self) {
        BUILDING.with(|building| {
            let mut building = building.borrow_mut();
            if let Some(pos) = building.iter().rposition(|(o, _)| *o == self.owner) {
                building.remove(pos);
            }
        });
    }
}

/// Creates or reuses metric tree nodes.
///
/// A cached record is returned as is. On a miss the node is built from the
/// element model and computed. A per-handle in-flight lock ensures concurrent
/// requests for the same handle compute it only once: late arrivals wait and
/// then reuse the cached result.
pub struct Dispatcher {
    cache: Arc<MetricCache>,
    model: Arc<dyn ElementModel>,
    pipeline: Arc<Pipeline>,
    in_flight: Mutex<HashMap<Handle, Arc<Mutex<()>>>>,
}

impl Dispatcher {
    pub fn new(cache: Arc<MetricCache>, model: Arc<dyn ElementModel>, pipeline: Arc<Pipeline>) -> Self {
        Self {
            cache,
            model,
            pipeline,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &MetricCache {
        &self.cache
    }

    pub fn model(&self) -> &dyn ElementModel {
        self.model.as_ref()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Cached record for `handle`, computing it on a miss.
    pub fn get_or_compute(&self, handle: &str, token: &CancellationToken) -> Result<MetricSource, ComputeError> {
        self.compute(handle, None, token)
    }

    /// Like [`Dispatcher::get_or_compute`], handing `context` from the parent
    /// to the new node before it is computed. Context is ignored on a hit.
    pub fn get_or_compute_as_child(
        &self,
        handle: &str,
        parent: &MetricSource,
        context: Option<ChildContext>,
        token: &CancellationToken,
    ) -> Result<MetricSource, ComputeError> {
        trace!(handle, parent = %parent.handle(), "Resolving child");
        self.compute(handle, context, token)
    }

    fn compute(
        &self,
        handle: &str,
        context: Option<ChildContext>,
        token: &CancellationToken,
    ) -> Result<MetricSource, ComputeError> {
        if let Some(source) = self.cache.get(handle) {
            return Ok(source);
        }

        // The in-flight lock is not re-entrant; a cycle would wait on itself.
        let _building = BuildingGuard::enter(self as *const Self as usize, handle)?;
        let lock = self.lock_for(handle);
        let result = {
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            match self.cache.get(handle) {
                Some(source) => {
                    debug!(handle, "reuse");
                    Ok(source)
                }
                None => self.build(handle, context, token),
            }
        };
        self.release(handle, &lock);
        result
    }

    fn build(
        &self,
        handle: &str,
        context: Option<ChildContext>,
        token: &CancellationToken,
    ) -> Result<MetricSource, ComputeError> {
        let level = self.model.level(handle)?;
        let mut node = SourceNode::new(handle, level).with_context(context);
        node.recurse(self, token)?;
        // The cache may have refused the record; the computed one is still valid.
        Ok(self.cache.get(handle).unwrap_or_else(|| node.into_record()))
    }

    fn lock_for(&self, handle: &str) -> Arc<Mutex<()>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            in_flight
                .entry(handle.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    fn release(&self, handle: &str, lock: &Arc<Mutex<()>>) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        // Only the last interested caller drops the entry.
        if Arc::strong_count(lock) == 2 {
            in_flight.remove(handle);
        }
    }

    /// Number of handles with a computation in progress.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Children of `source`, read from the cache, that carry `name`
    /// (as a value, or scoped by `per`).
    pub fn children_having(&self, source: &MetricSource, name: &str, per: Option<&str>) -> Vec<MetricSource> {
        source
            .child_handles()
            .iter()
            .filter_map(|h| self.cache.get(h))
            .filter(|c| c.has_metric(name, per))
            .collect()
    }
}
