//! The approval service: pending gates keyed by execution and gate name.

use super::notifier::{LoggingNotifier, Notifier};
use crate::errors::{ApprovalDecisionError, ApprovalError};
use crate::events::{names, EventSink};
use crate::observability::SpanTimer;
use crate::utils::iso_timestamp;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tracing::{info, warn};
use uuid::Uuid;

/// A request for a human decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// The execution waiting on the decision.
    pub execution_id: Uuid,
    /// The pipeline name.
    pub pipeline: String,
    /// The stage holding the gate.
    pub stage: String,
    /// The gate (action) name.
    pub gate: String,
    /// The revision being promoted.
    pub revision: String,
    /// Reviewer addresses.
    pub reviewers: Vec<String>,
    /// When the gate entered `Pending`.
    pub requested_at: String,
    /// How long the gate waits before expiring.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "duration_ms")]
    pub timeout: Option<Duration>,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

/// A reviewer's decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// Let the pipeline continue.
    Approve {
        /// Who approved.
        reviewer: String,
        /// Optional comment.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
    /// Halt the pipeline.
    Reject {
        /// Who rejected.
        reviewer: String,
        /// Optional comment.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
}

impl Decision {
    /// An approval by `reviewer`.
    #[must_use]
    pub fn approve(reviewer: impl Into<String>) -> Self {
        Self::Approve {
            reviewer: reviewer.into(),
            comment: None,
        }
    }

    /// A rejection by `reviewer`.
    #[must_use]
    pub fn reject(reviewer: impl Into<String>) -> Self {
        Self::Reject {
            reviewer: reviewer.into(),
            comment: None,
        }
    }

    /// Attaches a comment.
    #[must_use]
    pub fn with_comment(mut self, text: impl Into<String>) -> Self {
        match &mut self {
            Self::Approve { comment, .. } | Self::Reject { comment, .. } => *comment = Some(text.into()),
        }
        self
    }

    /// Returns the deciding reviewer.
    #[must_use]
    pub fn reviewer(&self) -> &str {
        match self {
            Self::Approve { reviewer, .. } | Self::Reject { reviewer, .. } => reviewer,
        }
    }

    /// Returns true for an approval.
    #[must_use]
    pub fn is_approval(&self) -> bool {
        matches!(self, Self::Approve { .. })
    }
}

/// Where a gate is in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    /// Waiting for a decision.
    Pending,
    /// A reviewer approved.
    Approved,
    /// A reviewer rejected.
    Rejected,
    /// The timeout elapsed first.
    Expired,
    /// The request was withdrawn.
    Cancelled,
}

impl GateState {
    /// Returns true once the gate can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::Expired => write!(f, "expired"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

type GateKey = (Uuid, String);

/// How many decided gates an [`ApprovalService`] remembers by default.
pub const DEFAULT_HISTORY_LIMIT: usize = 1024;

/// Gate states. Open gates are always kept; terminal ones are evicted
/// oldest first once more than `limit` are held.
struct GateHistory {
    states: HashMap<GateKey, GateState>,
    settled: VecDeque<GateKey>,
    limit: usize,
}

impl GateHistory {
    fn new(limit: usize) -> Self {
        Self {
            states: HashMap::new(),
            settled: VecDeque::new(),
            limit,
        }
    }

    fn open(&mut self, key: GateKey) {
        self.settled.retain(|k| k != &key);
        self.states.insert(key, GateState::Pending);
    }

    fn settle(&mut self, key: GateKey, state: GateState) {
        let already_settled = self.states.get(&key).is_some_and(GateState::is_terminal);
        self.states.insert(key.clone(), state);
        if !already_settled {
            self.settled.push_back(key);
        }
        while self.settled.len() > self.limit {
            if let Some(oldest) = self.settled.pop_front() {
                self.states.remove(&oldest);
            }
        }
    }

    fn get(&self, key: &GateKey) -> Option<GateState> {
        self.states.get(key).copied()
    }

    fn len(&self) -> usize {
        self.states.len()
    }
}

struct PendingGate {
    request: ApprovalRequest,
    sender: oneshot::Sender<Decision>,
}

/// Holds pending approval gates and routes decisions to them.
///
/// Decisions are keyed by execution id and gate name, so a re-triggered
/// run never receives a decision meant for an earlier one.
pub struct ApprovalService {
    pending: RwLock<Vec<PendingGate>>,
    history: RwLock<GateHistory>,
    arrivals: Notify,
    notifier: Arc<dyn Notifier>,
}

impl fmt::Debug for ApprovalService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApprovalService")
            .field("pending", &self.pending.read().len())
            .field("states", &self.history.read().len())
            .finish_non_exhaustive()
    }
}

impl Default for ApprovalService {
    fn default() -> Self {
        Self::new(Arc::new(LoggingNotifier))
    }
}

impl ApprovalService {
    /// Creates a service that notifies reviewers through `notifier`.
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            pending: RwLock::new(Vec::new()),
            history: RwLock::new(GateHistory::new(DEFAULT_HISTORY_LIMIT)),
            arrivals: Notify::new(),
            notifier,
        }
    }

    /// Sets how many decided gates stay queryable through [`Self::state`].
    #[must_use]
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history.get_mut().limit = limit;
        self
    }

    /// Opens a gate and waits for its outcome.
    ///
    /// Reviewers are notified on entry; a notification failure is logged
    /// and emitted as `approval.notify_failed` but does not close the gate.
    ///
    /// # Errors
    ///
    /// Returns `Rejected`, `Expired` (timeout elapsed) or `Cancelled`
    /// (request withdrawn or superseded). `Ok` carries the approval.
    pub async fn request(
        &self,
        request: ApprovalRequest,
        events: &Arc<dyn EventSink>,
    ) -> Result<Decision, ApprovalError> {
        let key: GateKey = (request.execution_id, request.gate.clone());
        let gate = request.gate.clone();
        let timeout = request.timeout;
        let (sender, receiver) = oneshot::channel();

        {
            let mut pending = self.pending.write();
            pending.retain(|p| (p.request.execution_id, p.request.gate.as_str()) != (key.0, gate.as_str()));
            pending.push(PendingGate {
                request: request.clone(),
                sender,
            });
        }
        self.history.write().open(key.clone());
        self.arrivals.notify_waiters();

        info!(
            execution_id = %request.execution_id,
            gate = %gate,
            reviewers = request.reviewers.len(),
            "Approval gate pending"
        );
        events
            .emit(
                names::APPROVAL_REQUESTED,
                Some(json!({
                    "execution_id": request.execution_id.to_string(),
                    "pipeline": request.pipeline,
                    "stage": request.stage,
                    "gate": gate,
                    "reviewers": request.reviewers,
                })),
            )
            .await;

        if let Err(e) = self.notifier.notify(&request).await {
            warn!(gate = %gate, error = %e, "Reviewer notification failed");
            events
                .emit(
                    names::APPROVAL_NOTIFY_FAILED,
                    Some(json!({
                        "execution_id": request.execution_id.to_string(),
                        "gate": gate,
                        "error": e.to_string(),
                    })),
                )
                .await;
        }

        let timer = SpanTimer::start(format!("approval:{gate}"));
        let received = match timeout {
            Some(limit) => tokio::time::timeout(limit, receiver).await.ok(),
            None => Some(receiver.await),
        };

        let outcome = match received {
            Some(Ok(decision)) => match &decision {
                Decision::Approve { .. } => Ok(decision),
                Decision::Reject { reviewer, comment } => Err(ApprovalError::Rejected {
                    gate: gate.clone(),
                    reviewer: reviewer.clone(),
                    comment: comment.clone(),
                }),
            },
            Some(Err(_)) => Err(ApprovalError::Cancelled { gate: gate.clone() }),
            None => {
                self.remove_pending(&key);
                let timeout_ms = timeout.map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
                Err(ApprovalError::Expired {
                    gate: gate.clone(),
                    timeout_ms,
                })
            }
        };

        let state = match &outcome {
            Ok(_) => GateState::Approved,
            Err(ApprovalError::Rejected { .. }) => GateState::Rejected,
            Err(ApprovalError::Expired { .. }) => GateState::Expired,
            Err(ApprovalError::Cancelled { .. }) => GateState::Cancelled,
        };
        self.history.write().settle(key, state);

        let waited_ms = timer.finish();
        info!(gate = %gate, state = %state, waited_ms, "Approval gate decided");
        events
            .emit(
                names::APPROVAL_DECIDED,
                Some(json!({
                    "execution_id": request.execution_id.to_string(),
                    "gate": gate,
                    "state": state,
                    "waited_ms": waited_ms,
                })),
            )
            .await;

        outcome
    }

    /// Delivers a decision to a pending gate.
    ///
    /// # Errors
    ///
    /// Returns `ApprovalDecisionError` if no such gate is pending (never
    /// opened, already decided, or expired).
    pub fn decide(&self, execution_id: Uuid, gate: &str, decision: Decision) -> Result<(), ApprovalDecisionError> {
        let key: GateKey = (execution_id, gate.to_string());
        let pending = self
            .remove_pending(&key)
            .ok_or_else(|| ApprovalDecisionError::new(execution_id.to_string(), gate))?;

        let state = if decision.is_approval() {
            GateState::Approved
        } else {
            GateState::Rejected
        };
        info!(
            execution_id = %execution_id,
            gate = %gate,
            reviewer = %decision.reviewer(),
            state = %state,
            "Approval decision received"
        );

        pending
            .sender
            .send(decision)
            .map_err(|_| ApprovalDecisionError::new(execution_id.to_string(), gate))?;
        self.history.write().settle(key, state);
        Ok(())
    }

    /// Withdraws a pending gate; its waiter resolves to `Cancelled`.
    ///
    /// Returns false if the gate was not pending.
    pub fn cancel(&self, execution_id: Uuid, gate: &str) -> bool {
        self.remove_pending(&(execution_id, gate.to_string())).is_some()
    }

    /// Returns every pending request, oldest first.
    #[must_use]
    pub fn pending(&self) -> Vec<ApprovalRequest> {
        self.pending.read().iter().map(|p| p.request.clone()).collect()
    }

    /// Waits until at least one gate is pending and returns the oldest.
    pub async fn next_pending(&self) -> ApprovalRequest {
        loop {
            let arrived = self.arrivals.notified();
            let oldest = self.pending.read().first().map(|p| p.request.clone());
            if let Some(request) = oldest {
                return request;
            }
            arrived.await;
        }
    }

    /// Returns the state of a gate for an execution.
    ///
    /// Decided gates are forgotten once the history limit is exceeded.
    #[must_use]
    pub fn state(&self, execution_id: Uuid, gate: &str) -> Option<GateState> {
        self.history.read().get(&(execution_id, gate.to_string()))
    }

    fn remove_pending(&self, key: &GateKey) -> Option<PendingGate> {
        let mut pending = self.pending.write();
        let index = pending
            .iter()
            .position(|p| p.request.execution_id == key.0 && p.request.gate == key.1)?;
        Some(pending.remove(index))
    }
}
