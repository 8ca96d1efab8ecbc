use strata_core::{Handle, Level, MetricSource};
use tracing::{debug, warn};

use crate::calculator::CalcContext;
use crate::cancel::CancellationToken;
use crate::dispatcher::Dispatcher;
use crate::error::ComputeError;
use crate::model::ChildContext;

/// Transient, in-memory node of the metric tree.
///
/// Wraps the persistent [`MetricSource`] record together with the children
/// attached while it is being computed. Children are detached again once the
/// node has been saved, so the cache stays the only long-lived copy.
pub struct SourceNode {
    record: MetricSource,
    children: Vec<MetricSource>,
    context: Option<ChildContext>,
    recursed: bool,
}

impl SourceNode {
    pub fn new(handle: impl Into<Handle>, level: Level) -> Self {
        Self {
            record: MetricSource::new(handle, level),
            children: Vec::new(),
            context: None,
            recursed: false,
        }
    }

    /// Attach context supplied by the parent.
    pub fn with_context(mut self, context: Option<ChildContext>) -> Self {
        self.context = context;
        self
    }

    pub fn handle(&self) -> &str {
        self.record.handle()
    }

    pub fn record(&self) -> &MetricSource {
        &self.record
    }

    pub fn into_record(self) -> MetricSource {
        self.record
    }

    pub fn is_recursed(&self) -> bool {
        self.recursed
    }

    /// Children currently attached (empty outside of `recurse`).
    pub fn children(&self) -> &[MetricSource] {
        &self.children
    }

    /// Compute this node bottom-up: children first, then calculators, then
    /// propagators. Saves the result to the cache. Runs at most once per
    /// instance.
    pub fn recurse(&mut self, dispatcher: &Dispatcher, token: &CancellationToken) -> Result<(), ComputeError> {
        if self.recursed {
            return Ok(());
        }
        token.check()?;

        let outcome = self.compute(dispatcher, token);
        self.children.clear();
        outcome?;

        self.recursed = true;
        Ok(())
    }

    fn compute(&mut self, dispatcher: &Dispatcher, token: &CancellationToken) -> Result<(), ComputeError> {
        self.init_children(dispatcher, token)?;
        token.check()?;

        let ctx = CalcContext {
            model: dispatcher.model(),
            children: &self.children,
            context: self.context.as_ref(),
        };
        dispatcher.pipeline().run_calculators(&mut self.record, &ctx);
        dispatcher.pipeline().run_propagators(&mut self.record, &self.children);

        dispatcher.cache().put(&self.record);
        debug!(handle = %self.record.handle(), level = %self.record.level(), "Computed metric source");
        Ok(())
    }

    fn init_children(&mut self, dispatcher: &Dispatcher, token: &CancellationToken) -> Result<(), ComputeError> {
        let model = dispatcher.model();
        let entries = model.children_with_context(self.record.handle())?;

        for (child, context) in entries {
            token.check()?;
            if model.is_archive_or_binary(&child) {
                continue;
            }
            match dispatcher.get_or_compute_as_child(&child, &self.record, context, token) {
                Ok(source) => {
                    if !self.record.add_child(source.handle()) {
                        debug!(handle = %child, parent = %self.record.handle(), "Skipping duplicate child");
                        continue;
                    }
                    self.children.push(source);
                }
                Err(ComputeError::Cancelled) => return Err(ComputeError::Cancelled),
                Err(e) => {
                    warn!(handle = %child, parent = %self.record.handle(), error = %e, "Skipping unresolved child");
                }
            }
        }
        Ok(())
    }
}
