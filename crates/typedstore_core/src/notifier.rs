//! Change notification fan-out keyed by storage location.
//!
//! # Responsibility
//! - Register subscriptions for location sets (or for everything).
//! - Deliver each published [`Changes`] to every subscription it intersects.
//!
//! # Invariants
//! - Per subscription, delivery order equals publish order.
//! - Dropping a [`Subscription`] unregisters it; the notifier never blocks on a
//!   slow subscriber (queues are unbounded).
//! - A subscription ends (`None`) only once every notifier handle is dropped.

use crate::changes::Changes;
use crate::location::StorageLocation;
use log::{debug, trace};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Cloneable publish/subscribe hub; clones share subscribers.
#[derive(Clone, Default)]
pub struct ChangeNotifier {
    shared: Arc<NotifierShared>,
}

#[derive(Default)]
struct NotifierShared {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<Subscriber>>,
}

struct Subscriber {
    id: u64,
    /// `None` observes every location.
    observed: Option<BTreeSet<StorageLocation>>,
    sender: UnboundedSender<Changes>,
}

impl Subscriber {
    fn wants(&self, changes: &Changes) -> bool {
        match &self.observed {
            Some(observed) => changes.intersects(observed),
            None => true,
        }
    }
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to changes touching any of `locations`.
    ///
    /// An empty set yields a subscription that never receives anything.
    pub fn observe<I, L>(&self, locations: I) -> Subscription
    where
        I: IntoIterator<Item = L>,
        L: Into<StorageLocation>,
    {
        self.subscribe(Some(locations.into_iter().map(Into::into).collect()))
    }

    /// Subscribes to every published change.
    pub fn observe_all(&self) -> Subscription {
        self.subscribe(None)
    }

    /// Delivers `changes` to matching subscribers; returns how many received it.
    pub fn publish(&self, changes: Changes) -> usize {
        if changes.is_empty() {
            return 0;
        }

        let subscribers = self.shared.subscribers.read();
        let mut delivered = 0;
        for subscriber in subscribers.iter().filter(|s| s.wants(&changes)) {
            if subscriber.sender.send(changes.clone()).is_ok() {
                delivered += 1;
            } else {
                trace!(
                    "event=changes_publish module=notifier status=skipped subscription={} reason=receiver_closed",
                    subscriber.id
                );
            }
        }
        debug!(
            "event=changes_publish module=notifier status=ok locations={} delivered={}",
            changes.locations().len(),
            delivered
        );
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.read().len()
    }

    fn subscribe(&self, observed: Option<BTreeSet<StorageLocation>>) -> Subscription {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        let scope = observed
            .as_ref()
            .map_or_else(|| "all".to_string(), |set| set.len().to_string());

        self.shared.subscribers.write().push(Subscriber {
            id,
            observed,
            sender,
        });
        debug!("event=subscription module=notifier status=open subscription={id} locations={scope}");

        Subscription {
            id,
            receiver,
            shared: Arc::downgrade(&self.shared),
        }
    }
}

/// Lazy, unbounded sequence of [`Changes`] for one observer.
///
/// Iterating blocks the current thread; inside an async runtime use
/// [`Subscription::recv`] instead.
pub struct Subscription {
    id: u64,
    receiver: UnboundedReceiver<Changes>,
    shared: Weak<NotifierShared>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Changes> {
        self.receiver.recv().await
    }

    pub fn blocking_recv(&mut self) -> Option<Changes> {
        self.receiver.blocking_recv()
    }

    /// Returns a queued change without waiting.
    pub fn try_recv(&mut self) -> Option<Changes> {
        self.receiver.try_recv().ok()
    }
}

impl Iterator for Subscription {
    type Item = Changes;

    fn next(&mut self) -> Option<Self::Item> {
        self.blocking_recv()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.subscribers.write().retain(|s| s.id != self.id);
            debug!(
                "event=subscription module=notifier status=closed subscription={}",
                self.id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ChangeNotifier;
    use crate::changes::Changes;

    #[test]
    fn delivers_only_intersecting_changes() {
        let notifier = ChangeNotifier::new();
        let mut items = notifier.observe(["items"]);
        let mut tags = notifier.observe(["tags"]);

        assert_eq!(notifier.publish(Changes::of("items")), 1);

        assert_eq!(items.try_recv(), Some(Changes::of("items")));
        assert_eq!(tags.try_recv(), None);
    }

    #[test]
    fn preserves_publish_order_per_subscriber() {
        let notifier = ChangeNotifier::new();
        let mut all = notifier.observe_all();

        notifier.publish(Changes::of("a"));
        notifier.publish(Changes::of("b"));
        notifier.publish(Changes::new(["a", "c"]));

        let received: Vec<Changes> = std::iter::from_fn(|| all.try_recv()).collect();
        assert_eq!(
            received,
            vec![
                Changes::of("a"),
                Changes::of("b"),
                Changes::new(["a", "c"])
            ]
        );
    }

    #[test]
    fn dropping_subscription_unregisters_it() {
        let notifier = ChangeNotifier::new();
        let first = notifier.observe(["items"]);
        let _second = notifier.observe(["items"]);
        assert_eq!(notifier.subscriber_count(), 2);

        drop(first);
        assert_eq!(notifier.subscriber_count(), 1);
        assert_eq!(notifier.publish(Changes::of("items")), 1);
    }

    #[test]
    fn empty_changes_and_empty_observation_deliver_nothing() {
        let notifier = ChangeNotifier::new();
        let mut nothing = notifier.observe(Vec::<String>::new());
        let _all = notifier.observe_all();

        assert_eq!(notifier.publish(Changes::new(Vec::<String>::new())), 0);
        assert_eq!(notifier.publish(Changes::of("items")), 1);
        assert_eq!(nothing.try_recv(), None);
    }

    #[test]
    fn subscription_ends_when_notifier_is_dropped() {
        let notifier = ChangeNotifier::new();
        let mut subscription = notifier.observe(["items"]);
        notifier.publish(Changes::of("items"));
        drop(notifier);

        assert_eq!(subscription.next(), Some(Changes::of("items")));
        assert_eq!(subscription.next(), None);
    }
}
