//! Reviewer notification.

use super::ApprovalRequest;
use crate::errors::NotifyError;
use async_trait::async_trait;
use tracing::info;

/// Delivers approval requests to reviewers.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Notifies every reviewer listed on `request`.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError` if delivery failed. The gate stays pending
    /// either way.
    async fn notify(&self, request: &ApprovalRequest) -> Result<(), NotifyError>;
}

/// Writes approval requests to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, request: &ApprovalRequest) -> Result<(), NotifyError> {
        for reviewer in &request.reviewers {
            info!(
                reviewer = %reviewer,
                gate = %request.gate,
                pipeline = %request.pipeline,
                execution_id = %request.execution_id,
                revision = %request.revision,
                "Approval requested"
            );
        }
        Ok(())
    }
}
