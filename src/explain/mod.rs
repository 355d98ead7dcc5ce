//! Causal explanations over recorded traces.
//!
//! [`TraceExplainer`] scans an [`EventLog`](crate::log::EventLog) and
//! answers why an action happened (one [`ActionReason`] per causal chain)
//! or why it did not (one [`Reason`] classifying the failure).

/// The trace scanner.
pub mod explainer;
/// Explanation types.
pub mod reason;

pub use explainer::TraceExplainer;
pub use reason::{ActionReason, InspectionEvidence, Reason};
