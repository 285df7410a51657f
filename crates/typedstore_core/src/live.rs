//! Reads that refresh when their observed locations change.

use crate::engine::PreparedOperation;
use crate::error::StoreResult;
use crate::notifier::Subscription;
use crate::operations::get::{GetKind, PreparedGet};

/// Sequence of results of one prepared get.
///
/// The first item is the current result; each later item is a fresh execution
/// triggered by one matching change. Reads without observed locations yield
/// exactly one item. The subscription is opened before the first execution,
/// so no change between the two is missed. Dropping the live query
/// unsubscribes.
pub struct LiveQuery<K: GetKind> {
    operation: PreparedGet<K>,
    subscription: Option<Subscription>,
    started: bool,
}

impl<K: GetKind> LiveQuery<K> {
    pub(crate) fn new(operation: PreparedGet<K>, subscription: Option<Subscription>) -> Self {
        Self {
            operation,
            subscription,
            started: false,
        }
    }

    pub fn operation(&self) -> &PreparedGet<K> {
        &self.operation
    }

    /// Async counterpart of `Iterator::next`; executes on the store scheduler.
    pub async fn next_result(&mut self) -> Option<StoreResult<K::Output>> {
        if self.start() {
            return Some(self.operation.execute_async().await);
        }
        self.subscription.as_mut()?.recv().await?;
        Some(self.operation.execute_async().await)
    }

    /// Returns true exactly once, on the first call.
    fn start(&mut self) -> bool {
        !std::mem::replace(&mut self.started, true)
    }
}

impl<K: GetKind> Iterator for LiveQuery<K> {
    type Item = StoreResult<K::Output>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.start() {
            return Some(self.operation.execute());
        }
        self.subscription.as_mut()?.blocking_recv()?;
        Some(self.operation.execute())
    }
}
