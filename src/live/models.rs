use crate::db::{EntityKey, Poll};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A committed mutation, carrying the resulting absolute value rather than a delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeNotification {
    PollCreated {
        poll: Poll,
    },
    VoteUpdated {
        poll_id: Uuid,
        option_id: Uuid,
        votes: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        poll: Option<Poll>,
    },
    LikeUpdated {
        poll_id: Uuid,
        likes: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        poll: Option<Poll>,
    },
}

impl ChangeNotification {
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeNotification::PollCreated { .. } => "poll_created",
            ChangeNotification::VoteUpdated { .. } => "vote_updated",
            ChangeNotification::LikeUpdated { .. } => "like_updated",
        }
    }

    pub fn entity(&self) -> EntityKey {
        match self {
            ChangeNotification::PollCreated { poll } => EntityKey::Poll(poll.id),
            ChangeNotification::VoteUpdated { option_id, .. } => EntityKey::Option(*option_id),
            ChangeNotification::LikeUpdated { poll_id, .. } => EntityKey::Poll(*poll_id),
        }
    }

    /// The counter value this notification reports, if it reports one.
    pub fn counter(&self) -> Option<i64> {
        match self {
            ChangeNotification::PollCreated { .. } => None,
            ChangeNotification::VoteUpdated { votes, .. } => Some(*votes),
            ChangeNotification::LikeUpdated { likes, .. } => Some(*likes),
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("subscriber channel closed")]
    Closed,
    #[error("subscriber did not accept the notification within {0:?}")]
    TimedOut(Duration),
}

pub type SubscriberId = Uuid;

/// Sending half of one live connection.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub id: SubscriberId,
    sender: mpsc::Sender<Arc<ChangeNotification>>,
}

impl Subscriber {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Arc<ChangeNotification>>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let subscriber = Self {
            id: Uuid::new_v4(),
            sender,
        };
        (subscriber, receiver)
    }

    pub async fn deliver(
        &self,
        notification: Arc<ChangeNotification>,
        timeout: Duration,
    ) -> Result<(), DeliveryError> {
        match tokio::time::timeout(timeout, self.sender.send(notification)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(DeliveryError::Closed),
            Err(_) => Err(DeliveryError::TimedOut(timeout)),
        }
    }
}
