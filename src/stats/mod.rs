//! Statistics for transform tasks

pub mod metrics;

pub use metrics::{ServiceStats, TaskStats};
