pub mod config;
pub mod error;
pub mod handle;
pub mod level;
pub mod metric;
pub mod source;

pub use config::{PipelineConfig, PropagationKind, PropagationSpec, StrataConfig};
pub use error::*;
pub use handle::Handle;
pub use level::Level;
pub use metric::{Avg, Max, Metric};
pub use source::MetricSource;
