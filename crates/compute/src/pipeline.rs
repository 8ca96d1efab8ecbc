use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use strata_core::{Level, MetricSource, PipelineConfig};
use tracing::{error, trace, warn};

use crate::calculator::{CalcContext, Calculator, CalculatorError, CalculatorRegistry};
use crate::propagator::Propagator;

/// Ordered calculators and propagators applied to every computed node.
pub struct Pipeline {
    calculators: Vec<Arc<dyn Calculator>>,
    propagators: Vec<Propagator>,
}

impl Pipeline {
    pub fn new(calculators: Vec<Arc<dyn Calculator>>, propagators: Vec<Propagator>) -> Self {
        Self {
            calculators,
            propagators,
        }
    }

    /// A pipeline that measures nothing. Nodes still get their structure.
    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// Build from configuration, resolving calculator ids through `registry`.
    ///
    /// Unknown ids are logged and skipped. Without an explicit selection every
    /// registered calculator and the registry's default propagations apply.
    pub fn from_config(config: &PipelineConfig, registry: &CalculatorRegistry) -> Self {
        let ids: Vec<String> = match &config.calculators {
            Some(ids) => ids.clone(),
            None => registry.ids().map(str::to_string).collect(),
        };
        let calculators = ids
            .iter()
            .filter_map(|id| match registry.create(id) {
                Some(calculator) => Some(Arc::from(calculator)),
                None => {
                    warn!(calculator = %id, "Unknown calculator id, skipping");
                    None
                }
            })
            .collect();

        let specs = config
            .propagators
            .as_deref()
            .unwrap_or_else(|| registry.default_propagations());
        let propagators = specs
            .iter()
            .flat_map(|spec| {
                spec.kinds
                    .iter()
                    .map(move |kind| Propagator::new(spec.metric.as_str(), spec.level, *kind))
            })
            .collect();

        Self::new(calculators, propagators)
    }

    pub fn calculators(&self) -> &[Arc<dyn Calculator>] {
        &self.calculators
    }

    pub fn propagators(&self) -> &[Propagator] {
        &self.propagators
    }

    /// Calculators bound to `level`, in registration order.
    pub fn calculators_for(&self, level: Level) -> impl Iterator<Item = &Arc<dyn Calculator>> {
        self.calculators.iter().filter(move |c| c.level() == level)
    }

    /// Run the level's calculators on `source`.
    ///
    /// Each invocation is isolated: a failure or panic in one calculator is
    /// logged and leaves its metric absent, the rest still run.
    pub fn run_calculators(&self, source: &mut MetricSource, ctx: &CalcContext<'_>) {
        for calculator in self.calculators_for(source.level()) {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| calculator.calculate(source, ctx)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(CalculatorError::InvalidLevel { .. })) | Ok(Err(CalculatorError::Inapplicable(_))) => {
                    trace!(handle = %source.handle(), calculator = calculator.name(), "Calculator skipped");
                }
                Ok(Err(e)) => {
                    warn!(handle = %source.handle(), calculator = calculator.name(), error = %e, "Calculator failed");
                }
                Err(payload) => {
                    error!(
                        handle = %source.handle(),
                        calculator = calculator.name(),
                        panic = %panic_message(payload.as_ref()),
                        "Invariant violation: calculator panicked"
                    );
                }
            }
        }
    }

    /// Aggregate completed children into `source`.
    pub fn run_propagators(&self, source: &mut MetricSource, children: &[MetricSource]) {
        for propagator in &self.propagators {
            propagator.propagate(source, children);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
