//! Usage and health reporting for the chatbot service.
//!
//! Raw application log lines are decoded, filtered to a date window,
//! classified, mined for language and intent signals, and folded in a
//! single pass into a [`models::Report`].

pub mod aggregator;
pub mod classifier;
pub mod config;
pub mod decoder;
pub mod error;
pub mod models;
pub mod perf;
pub mod report;
pub mod signals;
pub mod window;

pub use aggregator::{AggregationOptions, Aggregator, CostPolicy};
pub use models::Report;
pub use report::{build_report, build_report_from_lines};
pub use window::{ReportPeriod, ReportWindow};
