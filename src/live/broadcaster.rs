use crate::live::models::ChangeNotification;
use crate::live::registry::SubscriberRegistry;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Fans a notification out to every registered subscriber.
///
/// Delivery is best-effort: a subscriber whose send fails or times out is
/// unregistered and never retried, and the failure is not reported to the
/// caller. Each subscriber's queue is FIFO, so callers that publish for one
/// entity from a single serialization point get per-entity ordering for free.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: SubscriberRegistry,
    send_timeout: Duration,
}

impl Broadcaster {
    pub fn new(registry: SubscriberRegistry, send_timeout: Duration) -> Self {
        Self {
            registry,
            send_timeout,
        }
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    /// Returns the number of subscribers the notification was delivered to.
    pub async fn publish(&self, notification: ChangeNotification) -> usize {
        let notification = Arc::new(notification);
        let subscribers = self.registry.snapshot();
        if subscribers.is_empty() {
            return 0;
        }

        let total = subscribers.len();
        let send_timeout = self.send_timeout;
        let attempts = subscribers.into_iter().map(|subscriber| {
            let notification = Arc::clone(&notification);
            async move {
                let outcome = subscriber.deliver(notification, send_timeout).await;
                (subscriber.id, outcome)
            }
        });

        let mut delivered = 0;
        for (id, outcome) in join_all(attempts).await {
            match outcome {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("Dropping subscriber {}: {}", id, e);
                    self.registry.unregister(id);
                }
            }
        }

        debug!(
            "Published {} for {} to {}/{} subscribers",
            notification.kind(),
            notification.entity(),
            delivered,
            total
        );

        delivered
    }
}
