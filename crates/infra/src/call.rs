//! Deadline and cancellation carried through every store call.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;

/// Per-request call budget.
///
/// Cloning shares the cancellation token, so cancelling the request cancels
/// every store call still running on its behalf.
#[derive(Debug, Clone)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Instant,
}

impl CallContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(Instant::now() + timeout, CancellationToken::new())
    }

    pub fn new(deadline: Instant, cancel: CancellationToken) -> Self {
        Self { cancel, deadline }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run one store operation under this context's deadline and token.
    pub async fn run<T, E, F>(&self, operation: &'static str, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<StoreError>,
    {
        if self.cancel.is_cancelled() {
            return Err(StoreError::Cancelled(operation).into());
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StoreError::Cancelled(operation).into()),
            res = tokio::time::timeout_at(self.deadline, fut) => {
                res.map_err(|_| StoreError::DeadlineExceeded(operation))?
            }
        }
    }
}
