//! Background build scheduler.
//!
//! Changes reported by the host become [`Command`]s in a deduplicating
//! [`CommandQueue`]. A single worker thread executes them one at a time,
//! honouring pause/resume and per-project or global aborts, and reports
//! progress to [`ProgressListener`]s through the [`Notifier`].

pub mod command;
pub mod gate;
pub mod metrics;
pub mod notifier;
pub mod queue;
pub mod runner;
pub mod types;

pub use command::{Change, ChangeKind, Command};
pub use gate::PauseGate;
pub use metrics::SchedulerMetrics;
pub use notifier::{LogListener, Notifier, ProgressEvent, ProgressListener};
pub use queue::{AbortOutcome, CommandQueue};
pub use runner::Scheduler;
pub use types::SchedulerState;
