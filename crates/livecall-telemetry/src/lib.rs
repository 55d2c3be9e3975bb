pub mod call_metrics;

pub use call_metrics::{CallMetrics, FpsTracker};
