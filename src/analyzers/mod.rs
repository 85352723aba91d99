//! Exposure aggregation and guideline evaluation.
//!
//! Stages run strictly in order, each producing a new value from the previous:
//! the observation store is rolled per variable ([`rolling`]), bucketed by
//! local calendar day ([`daily`]) and compared against guideline thresholds
//! ([`threshold`]). [`analyzer`] wires the stages into a [`Pipeline`].

pub mod analyzer;
pub mod daily;
pub mod rolling;
pub mod threshold;
pub mod types;

pub use analyzer::{Pipeline, PipelineReport, ReportSummary, analyze};
