//! Handle to an operation running on a scheduler.

use crate::engine::scheduler::Scheduler;
use crate::engine::PreparedOperation;
use crate::error::{StoreError, StoreResult};
use log::{debug, trace};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Deferred result of one prepared operation.
///
/// Resolves exactly once, to the operation's result or to
/// `StoreError::Cancelled`. Dropping the handle cancels the operation: work
/// not yet started is skipped, collection work stops before its next item.
pub struct PendingOperation<T> {
    receiver: oneshot::Receiver<StoreResult<T>>,
    token: CancellationToken,
    _guard: DropGuard,
}

// Never pin-projected; the receiver is polled through `Pin::new`.
impl<T> Unpin for PendingOperation<T> {}

impl<T: Send + 'static> PendingOperation<T> {
    pub(crate) fn schedule<O>(scheduler: &dyn Scheduler, operation: O) -> Self
    where
        O: PreparedOperation<Output = T>,
    {
        let (sender, receiver) = oneshot::channel();
        let token = CancellationToken::new();
        let job_token = token.clone();

        scheduler.schedule(Box::new(move || {
            if job_token.is_cancelled() {
                debug!("event=operation_execute module=engine status=skipped reason=cancelled");
                return;
            }
            let result = operation.execute_cancellable(&job_token);
            if sender.send(result).is_err() {
                trace!("event=operation_deliver module=engine status=skipped reason=receiver_dropped");
            }
        }));

        Self {
            receiver,
            _guard: token.clone().drop_guard(),
            token,
        }
    }
}

impl<T> PendingOperation<T> {
    /// Requests cancellation; the result becomes `Cancelled` unless the
    /// operation already finished.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Blocks the current thread until the result arrives.
    ///
    /// Must not be called from inside an async runtime; await the handle there.
    pub fn wait(self) -> StoreResult<T> {
        let Self {
            receiver, _guard, ..
        } = self;
        let result = receiver.blocking_recv();
        drop(_guard);
        result.unwrap_or_else(|_| Err(StoreError::Cancelled))
    }
}

impl<T> Future for PendingOperation<T> {
    type Output = StoreResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(StoreError::Cancelled)))
    }
}

impl<T> std::fmt::Debug for PendingOperation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingOperation")
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}
