//! Client side of the run collector: a typed HTTP client for benchmark agents
//! and the report builder they fill in.

mod client;
mod error;
mod report;

pub use client::*;
pub use error::*;
pub use report::*;

pub use tbench_storage::{BeginRun, Environment, MetricField, Protocol, RunId, TimeSlot};
