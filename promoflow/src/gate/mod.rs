//! Approval gating.
//!
//! A gate moves `Pending -> Approved | Rejected`, or `Pending -> Expired`
//! when its timeout elapses. Decisions are routed by execution id and gate
//! name through an [`ApprovalService`] shared between the pipeline and
//! whatever surface collects reviewer input.

mod action;
mod notifier;
mod service;

pub use action::ApprovalGateAction;
pub use notifier::{LoggingNotifier, Notifier};
pub use service::{ApprovalRequest, ApprovalService, Decision, GateState, DEFAULT_HISTORY_LIMIT};
