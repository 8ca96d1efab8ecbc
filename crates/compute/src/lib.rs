//! Incremental metric computation.
//!
//! The [`Dispatcher`] builds and reuses [`SourceNode`]s over an
//! [`ElementModel`], running the calculator/propagator [`Pipeline`] bottom-up
//! and storing every completed node in the cache. The [`Scheduler`] turns
//! change notifications into serialized, cancellable recomputation work.
//! [`Engine`] wires the pieces together.

pub mod calculator;
pub mod cancel;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod propagator;
pub mod scheduler;
pub mod tree;

pub use calculator::{CalcContext, Calculator, CalculatorError, CalculatorRegistry};
pub use cancel::CancellationToken;
pub use dispatcher::Dispatcher;
pub use engine::{Engine, EngineBuilder};
pub use error::ComputeError;
pub use model::{ChildContext, ElementModel, InMemoryModel, Manifest, ModelError};
pub use pipeline::Pipeline;
pub use propagator::Propagator;
pub use scheduler::{
    Change, ChangeKind, LogListener, ProgressEvent, ProgressListener, Scheduler, SchedulerMetrics,
    SchedulerState,
};
pub use tree::SourceNode;
