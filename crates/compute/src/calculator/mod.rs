//! Calculators measure raw metric values on a single node.
//!
//! A calculator is bound to one [`Level`]. It reads the element model and the
//! already-computed children, then writes zero or more raw metrics through
//! [`MetricSource::set_value`].

pub mod builtin;
pub mod registry;

use strata_core::{Level, MetricSource};

use crate::model::{ChildContext, ElementModel};

pub use registry::{CalculatorFactory, CalculatorRegistry};

#[derive(Debug, thiserror::Error)]
pub enum CalculatorError {
    #[error("{calculator} does not measure {level} elements")]
    InvalidLevel { calculator: String, level: Level },
    /// The element lacks what the calculator needs. Silent.
    #[error("not applicable: {0}")]
    Inapplicable(String),
    #[error("calculation failed: {0}")]
    Failed(String),
}

/// Everything a calculator may read besides the node itself.
pub struct CalcContext<'a> {
    pub model: &'a dyn ElementModel,
    /// Completed children of the node, in child order.
    pub children: &'a [MetricSource],
    /// Context the parent supplied for this node, if any.
    pub context: Option<&'a ChildContext>,
}

/// A pluggable metric formula.
pub trait Calculator: Send + Sync {
    /// Metric id, also the name of the value it writes.
    fn name(&self) -> &str;

    fn level(&self) -> Level;

    /// Measure `source`, writing raw values onto it.
    fn calculate(&self, source: &mut MetricSource, ctx: &CalcContext<'_>) -> Result<(), CalculatorError>;
}

/// Reject nodes at a level other than the calculator's own.
pub fn ensure_level(calculator: &dyn Calculator, source: &MetricSource) -> Result<(), CalculatorError> {
    if source.level() == calculator.level() {
        Ok(())
    } else {
        Err(CalculatorError::InvalidLevel {
            calculator: calculator.name().to_string(),
            level: source.level(),
        })
    }
}
