//! Aggregation pipeline: pending samples in, persisted work sessions out.
//!
//! The [`aggregator::Aggregator`] owns the per-employee run (claim, window,
//! synthesize, enrich, write). The [`scheduler`] drives periodic sweeps and
//! [`analyzer`] talks to the external enrichment service.

pub mod aggregator;
pub mod analyzer;
pub mod error;
pub mod scheduler;

pub use aggregator::{
    Aggregator, AggregatorOptions, EmployeeRun, RetryReport, RunStatus, SweepReport,
};
pub use analyzer::{AnalyzerConfig, HttpAnalyzer, LocalAnalyzer, SessionAnalyzer};
pub use error::PipelineError;
