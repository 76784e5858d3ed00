/// Alerting rules for the threshold monitoring service.
///
/// Submodules:
/// - `thresholds`: crossing rules, sustained-window evaluation, transitions.

pub mod thresholds;

pub use thresholds::{evaluate, Transition, THRESHOLD_CROSSED, UNDER_THRESHOLD};
