//! Parser-free calculators shipped with the engine.

use std::collections::BTreeSet;

use strata_core::{Handle, Level, Metric, MetricSource, PropagationKind, PropagationSpec};

use super::{ensure_level, CalcContext, Calculator, CalculatorError, CalculatorFactory};

pub const NUM_METHODS: &str = "NumMethods";
pub const NUM_TYPES: &str = "NumTypes";
pub const NUM_PACKAGES: &str = "NumPackages";
pub const METHOD_LINES_OF_CODE: &str = "MethodLinesOfCode";
pub const TOTAL_LINES_OF_CODE: &str = "TotalLinesOfCode";
pub const EFFERENT_COUPLING: &str = "EfferentCoupling";

/// Registration table, in invocation order.
pub static BUILTINS: &[(&str, CalculatorFactory)] = &[
    (NUM_METHODS, num_methods),
    (NUM_TYPES, num_types),
    (NUM_PACKAGES, num_packages),
    (METHOD_LINES_OF_CODE, method_lines_of_code),
    (TOTAL_LINES_OF_CODE, total_lines_of_code),
    (EFFERENT_COUPLING, efferent_coupling),
];

fn num_methods() -> Box<dyn Calculator> {
    Box::new(ChildCount::new(NUM_METHODS, Level::Type, Level::Method))
}

fn num_types() -> Box<dyn Calculator> {
    Box::new(ChildCount::new(NUM_TYPES, Level::CompilationUnit, Level::Type))
}

fn num_packages() -> Box<dyn Calculator> {
    Box::new(ChildCount::new(NUM_PACKAGES, Level::SourceRoot, Level::Package))
}

fn method_lines_of_code() -> Box<dyn Calculator> {
    Box::new(LinesOfCode::new(METHOD_LINES_OF_CODE, Level::Method))
}

fn total_lines_of_code() -> Box<dyn Calculator> {
    Box::new(LinesOfCode::new(TOTAL_LINES_OF_CODE, Level::CompilationUnit))
}

fn efferent_coupling() -> Box<dyn Calculator> {
    Box::new(EfferentCoupling)
}

/// Propagations applied when configuration declares none.
pub fn default_propagations() -> Vec<PropagationSpec> {
    use PropagationKind::{Avg, Max, Sum};

    let spec = |metric: &str, level: Level, kinds: &[PropagationKind]| PropagationSpec {
        metric: metric.to_string(),
        level,
        kinds: kinds.to_vec(),
    };
    vec![
        spec(NUM_TYPES, Level::CompilationUnit, &[Sum]),
        spec(NUM_METHODS, Level::Type, &[Sum, Avg, Max]),
        spec(NUM_PACKAGES, Level::SourceRoot, &[Sum]),
        spec(METHOD_LINES_OF_CODE, Level::Method, &[Sum, Avg, Max]),
        spec(TOTAL_LINES_OF_CODE, Level::CompilationUnit, &[Sum]),
        spec(EFFERENT_COUPLING, Level::Package, &[Avg, Max]),
    ]
}

// ── Structure counts ──────────────────────────────────────────

/// Number of children at a given level.
pub struct ChildCount {
    name: &'static str,
    level: Level,
    counted: Level,
}

impl ChildCount {
    pub fn new(name: &'static str, level: Level, counted: Level) -> Self {
        Self { name, level, counted }
    }
}

impl Calculator for ChildCount {
    fn name(&self) -> &str {
        self.name
    }

    fn level(&self) -> Level {
        self.level
    }

    fn calculate(&self, source: &mut MetricSource, ctx: &CalcContext<'_>) -> Result<(), CalculatorError> {
        ensure_level(self, source)?;
        let count = ctx.children.iter().filter(|c| c.level() == self.counted).count();
        source.set_value(Metric::new(self.name, count as f64));
        Ok(())
    }
}

// ── Line counts ───────────────────────────────────────────────

/// Non-blank, non-comment lines of the element's source text.
pub struct LinesOfCode {
    name: &'static str,
    level: Level,
}

impl LinesOfCode {
    pub fn new(name: &'static str, level: Level) -> Self {
        Self { name, level }
    }
}

impl Calculator for LinesOfCode {
    fn name(&self) -> &str {
        self.name
    }

    fn level(&self) -> Level {
        self.level
    }

    fn calculate(&self, source: &mut MetricSource, ctx: &CalcContext<'_>) -> Result<(), CalculatorError> {
        ensure_level(self, source)?;
        let text = ctx
            .model
            .source(source.handle())
            .ok_or_else(|| CalculatorError::Inapplicable(format!("no source for {}", source.handle())))?;
        source.set_value(Metric::new(self.name, lines_of_code(&text) as f64));
        Ok(())
    }
}

/// Count lines that hold code, skipping blank lines, `//` lines and
/// `/* ... */` blocks.
pub fn lines_of_code(text: &str) -> usize {
    let mut count = 0;
    let mut in_block = false;
    for line in text.lines() {
        let mut rest = line.trim();
        loop {
            if in_block {
                match rest.find("*/") {
                    Some(end) => {
                        in_block = false;
                        rest = rest[end + 2..].trim_start();
                    }
                    None => {
                        rest = "";
                        break;
                    }
                }
            } else if let Some(after) = rest.strip_prefix("/*") {
                in_block = true;
                rest = after;
            } else {
                break;
            }
        }
        if !rest.is_empty() && !rest.starts_with("//") {
            count += 1;
        }
    }
    count
}

// ── Coupling ──────────────────────────────────────────────────

/// Distinct packages a package depends on, from its own and its units'
/// declared dependencies. Records the set on the node.
pub struct EfferentCoupling;

impl Calculator for EfferentCoupling {
    fn name(&self) -> &str {
        EFFERENT_COUPLING
    }

    fn level(&self) -> Level {
        Level::Package
    }

    fn calculate(&self, source: &mut MetricSource, ctx: &CalcContext<'_>) -> Result<(), CalculatorError> {
        ensure_level(self, source)?;
        let own = source.handle().to_string();
        let dependencies: BTreeSet<Handle> = std::iter::once(own.as_str())
            .chain(ctx.children.iter().map(|c| c.handle()))
            .flat_map(|h| ctx.model.dependencies(h))
            .filter(|d| *d != own)
            .collect();
        source.set_value(Metric::new(EFFERENT_COUPLING, dependencies.len() as f64));
        source.set_dependencies(dependencies);
        Ok(())
    }
}
