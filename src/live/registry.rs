use crate::live::models::{Subscriber, SubscriberId};
use dashmap::DashMap;
use std::{fmt, sync::Arc};

/// The set of live connections.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    subscribers: Arc<DashMap<SubscriberId, Subscriber>>,
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscriber_count", &self.subscribers.len())
            .finish()
    }
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns false if it was already present.
    pub fn register(&self, subscriber: Subscriber) -> bool {
        let mut inserted = false;
        self.subscribers.entry(subscriber.id).or_insert_with(|| {
            inserted = true;
            subscriber
        });
        inserted
    }

    /// Remove a connection. Returns false if it was not registered.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// Point-in-time copy of the membership.
    pub fn snapshot(&self) -> Vec<Subscriber> {
        self.subscribers
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
