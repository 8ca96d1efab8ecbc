use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use strata_core::config::SchedulerSettings;
use strata_core::{Handle, Level, MetricSource, StrataConfig};
use strata_storage::MetricCache;
use tracing::info;

use crate::calculator::CalculatorRegistry;
use crate::cancel::CancellationToken;
use crate::dispatcher::Dispatcher;
use crate::error::ComputeError;
use crate::model::ElementModel;
use crate::pipeline::Pipeline;
use crate::scheduler::{Change, ProgressListener, Scheduler, SchedulerMetrics, SchedulerState};

/// Owns the cache, element model, pipeline, dispatcher and scheduler of one
/// metric engine instance.
pub struct Engine {
    cache: Arc<MetricCache>,
    dispatcher: Arc<Dispatcher>,
    scheduler: Scheduler,
}

impl Engine {
    /// Engine backed by the configured state directory, with the built-in
    /// calculators selected by `config.pipeline`.
    pub fn open(config: &StrataConfig, model: Arc<dyn ElementModel>) -> Result<Self, ComputeError> {
        let cache = MetricCache::open(&config.storage.state_dir)?;
        let pipeline = Pipeline::from_config(&config.pipeline, &CalculatorRegistry::with_builtins());
        Ok(Self::builder(model)
            .cache(cache)
            .pipeline(pipeline)
            .settings(config.scheduler.clone())
            .build())
    }

    pub fn builder(model: Arc<dyn ElementModel>) -> EngineBuilder {
        EngineBuilder {
            model,
            cache: None,
            pipeline: None,
            settings: SchedulerSettings::default(),
            listeners: Vec::new(),
        }
    }

    pub fn cache(&self) -> &MetricCache {
        &self.cache
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn add_listener(&self, listener: Arc<dyn ProgressListener>) {
        self.scheduler.add_listener(listener);
    }

    // ── Scheduling ────────────────────────────────────────────────

    pub fn schedule(&self, changes: Vec<Change>) -> usize {
        self.scheduler.schedule(changes)
    }

    pub fn execute(&self) -> usize {
        self.scheduler.execute()
    }

    pub fn pause(&self) {
        self.scheduler.pause();
    }

    pub fn resume(&self) {
        self.scheduler.resume();
    }

    pub fn abort(&self, project: &str) {
        self.scheduler.abort(project);
    }

    pub fn abort_all(&self) {
        self.scheduler.abort_all();
    }

    pub fn state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn scheduler_metrics(&self) -> SchedulerMetrics {
        self.scheduler.metrics()
    }

    // ── Queries ───────────────────────────────────────────────────

    /// Cached metrics of `handle`, without computing.
    pub fn metrics(&self, handle: &str) -> Option<MetricSource> {
        self.cache.get(handle)
    }

    /// Whether metrics for `handle` are cached.
    pub fn is_available(&self, handle: &str) -> bool {
        self.cache.contains(handle)
    }

    /// Metrics of `handle`, computing them on the calling thread if needed.
    pub fn compute_now(&self, handle: &str) -> Result<MetricSource, ComputeError> {
        self.dispatcher.get_or_compute(handle, &CancellationToken::new())
    }

    pub fn children_having(&self, source: &MetricSource, name: &str, per: Option<&str>) -> Vec<MetricSource> {
        self.dispatcher.children_having(source, name, per)
    }

    /// Package-to-packages dependency map of `project`, read from cached
    /// package nodes.
    pub fn efferent_dependencies(&self, project: &str) -> BTreeMap<Handle, BTreeSet<Handle>> {
        self.cache
            .keys_for_handle(project)
            .into_iter()
            .filter_map(|key| self.cache.get(&key))
            .filter(|source| source.level() == Level::Package)
            .map(|source| (source.handle().to_string(), source.dependencies().clone()))
            .collect()
    }

    // ── Maintenance ───────────────────────────────────────────────

    pub fn clear_project(&self, project: &str) {
        self.cache.clear_project(project);
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Stop the worker, flush the cache and close the notifier.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        self.cache.flush();
        info!("Engine shut down");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Assembles an [`Engine`]. Defaults: in-memory cache, all built-in
/// calculators, default scheduler settings.
pub struct EngineBuilder {
    model: Arc<dyn ElementModel>,
    cache: Option<MetricCache>,
    pipeline: Option<Pipeline>,
    settings: SchedulerSettings,
    listeners: Vec<Arc<dyn ProgressListener>>,
}

impl EngineBuilder {
    pub fn cache(mut self, cache: MetricCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn settings(mut self, settings: SchedulerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.settings.headless = headless;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ProgressListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn build(self) -> Engine {
        let cache = Arc::new(self.cache.unwrap_or_else(MetricCache::in_memory));
        let pipeline = self
            .pipeline
            .unwrap_or_else(|| Pipeline::from_config(&Default::default(), &CalculatorRegistry::with_builtins()));
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&cache), self.model, Arc::new(pipeline)));
        let scheduler = Scheduler::new(Arc::clone(&dispatcher), self.settings);
        for listener in self.listeners {
            scheduler.add_listener(listener);
        }
        info!(
            headless = scheduler.is_headless(),
            calculators = dispatcher.pipeline().calculators().len(),
            "Engine ready"
        );
        Engine {
            cache,
            dispatcher,
            scheduler,
        }
    }
}
