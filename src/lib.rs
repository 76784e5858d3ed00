/// Threshold monitoring service library.
///
/// Stores metric samples, evaluates each metric's threshold on write and
/// notifies users when a metric's health changes.

pub mod alert;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod monitor;
pub mod notify;
pub mod registry;
pub mod store;

pub use config::MonitorConfig;
pub use model::{Metric, MetricId, MetricSample, Operator, Threshold, WriteOptions};
pub use monitor::Monitor;
