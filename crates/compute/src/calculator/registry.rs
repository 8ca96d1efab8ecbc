use strata_core::PropagationSpec;
use tracing::info;

use super::builtin;
use super::Calculator;

/// Creates a fresh calculator instance.
pub type CalculatorFactory = fn() -> Box<dyn Calculator>;

/// Static table of known calculators, keyed by metric id, plus the
/// propagations that apply when configuration declares none.
pub struct CalculatorRegistry {
    entries: Vec<(&'static str, CalculatorFactory)>,
    propagations: Vec<PropagationSpec>,
}

impl CalculatorRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            propagations: Vec::new(),
        }
    }

    /// Registry holding the built-in calculators and their default
    /// propagations.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for (id, factory) in builtin::BUILTINS {
            registry.register(*id, *factory);
        }
        for spec in builtin::default_propagations() {
            registry.declare(spec);
        }
        registry
    }

    /// Register a calculator. A later registration under the same id replaces
    /// the earlier one but keeps its position.
    pub fn register(&mut self, id: &'static str, factory: CalculatorFactory) {
        match self.entries.iter_mut().find(|(existing, _)| *existing == id) {
            Some(entry) => entry.1 = factory,
            None => self.entries.push((id, factory)),
        }
        info!(calculator = id, "Registered calculator");
    }

    /// Declare a default propagation.
    pub fn declare(&mut self, spec: PropagationSpec) {
        self.propagations.push(spec);
    }

    pub fn create(&self, id: &str) -> Option<Box<dyn Calculator>> {
        self.entries
            .iter()
            .find(|(existing, _)| *existing == id)
            .map(|(_, factory)| factory())
    }

    /// Registered ids, in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    pub fn default_propagations(&self) -> &[PropagationSpec] {
        &self.propagations
    }
}

impl Default for CalculatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
