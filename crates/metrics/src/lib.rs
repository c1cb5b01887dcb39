pub mod collector;
pub mod histogram;
pub mod slo;

pub use collector::{MetricsCollector, MetricsSnapshot, TimedHistogram};
pub use histogram::Histogram;
pub use slo::{SloEvaluator, SloReport, SloResult, SloTarget};
