use crate::counter::CounterMutator;
use crate::db::{EntityKey, NewPoll, Poll, PollStore};
use crate::error::PollError;
use crate::live::{Broadcaster, ChangeNotification, Subscriber, SubscriberId, SubscriberRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Longest accepted title or option text, in characters.
pub const MAX_TEXT_LEN: usize = 255;

/// Shape of the vote/like notification body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NotificationPayload {
    /// Identity plus the changed counter only.
    #[default]
    Counter,
    /// Additionally embeds the full parent poll.
    Poll,
}

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub send_timeout: Duration,
    pub subscriber_buffer: usize,
    pub payload: NotificationPayload,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(2),
            subscriber_buffer: 64,
            payload: NotificationPayload::Counter,
        }
    }
}

/// Create, vote and like as units of mutate-then-notify.
#[derive(Clone)]
pub struct PollService {
    store: Arc<dyn PollStore>,
    counters: CounterMutator,
    broadcaster: Broadcaster,
    options: ServiceOptions,
}

impl std::fmt::Debug for PollService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollService")
            .field("counters", &self.counters)
            .field("broadcaster", &self.broadcaster)
            .field("options", &self.options)
            .finish()
    }
}

impl PollService {
    pub fn new(store: Arc<dyn PollStore>, options: ServiceOptions) -> Self {
        let broadcaster = Broadcaster::new(SubscriberRegistry::new(), options.send_timeout);
        Self {
            counters: CounterMutator::new(store.clone()),
            store,
            broadcaster,
            options,
        }
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        self.broadcaster.registry()
    }

    /// Registers a new live connection and hands back its identity and queue.
    pub fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<Arc<ChangeNotification>>) {
        let (subscriber, receiver) = Subscriber::channel(self.options.subscriber_buffer);
        let id = subscriber.id;
        self.registry().register(subscriber);
        (id, receiver)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.registry().unregister(id);
    }

    pub async fn create_poll(&self, title: &str, option_texts: Vec<String>) -> Result<Poll, PollError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(PollError::Validation("title must not be empty".to_string()));
        }
        if title.chars().count() > MAX_TEXT_LEN {
            return Err(PollError::Validation(format!(
                "title must be at most {MAX_TEXT_LEN} characters"
            )));
        }
        if option_texts.is_empty() {
            return Err(PollError::Validation("at least one option is required".to_string()));
        }

        let option_texts: Vec<String> = option_texts.iter().map(|t| t.trim().to_string()).collect();
        if option_texts.iter().any(|text| text.is_empty()) {
            return Err(PollError::Validation("option text must not be empty".to_string()));
        }
        if option_texts.iter().any(|text| text.chars().count() > MAX_TEXT_LEN) {
            return Err(PollError::Validation(format!(
                "option text must be at most {MAX_TEXT_LEN} characters"
            )));
        }

        let new_poll = NewPoll::new(title, option_texts);
        let store = self.store.clone();
        let broadcaster = self.broadcaster.clone();

        // The new poll and options stay locked until `poll_created` is out,
        // so no vote or like on them can be announced first.
        self.counters
            .with_locks(new_poll.entities(), async move {
                let poll = store.create_poll(new_poll).await?;
                info!("Created poll {} with {} options", poll.id, poll.options.len());

                broadcaster
                    .publish(ChangeNotification::PollCreated { poll: poll.clone() })
                    .await;
                Ok::<_, PollError>(poll)
            })
            .await
    }

    pub async fn get_poll(&self, poll_id: Uuid) -> Result<Poll, PollError> {
        self.store
            .get_poll(poll_id)
            .await?
            .ok_or(PollError::PollNotFound)
    }

    pub async fn list_polls(&self) -> Result<Vec<Poll>, PollError> {
        Ok(self.store.list_polls().await?)
    }

    /// Returns the parent poll carrying the vote count this call committed.
    ///
    /// The poll is not read again after the commit; other counters in it are
    /// as they were before the vote.
    pub async fn vote(&self, poll_id: Uuid, option_id: Uuid) -> Result<Poll, PollError> {
        let mut poll = self.get_poll(poll_id).await?;

        let option = self
            .store
            .get_option(option_id)
            .await?
            .ok_or(PollError::OptionNotFound)?;
        if option.poll_id != poll_id {
            return Err(PollError::OptionNotFound);
        }

        let service = self.clone();
        let votes = self
            .counters
            .increment_then(EntityKey::Option(option_id), move |votes| async move {
                let poll = service.embedded_poll(poll_id).await;
                service
                    .broadcaster
                    .publish(ChangeNotification::VoteUpdated {
                        poll_id,
                        option_id,
                        votes,
                        poll,
                    })
                    .await;
            })
            .await?;

        if let Some(opt) = poll.options.iter_mut().find(|opt| opt.id == option_id) {
            opt.votes = votes;
        }
        Ok(poll)
    }

    pub async fn like(&self, poll_id: Uuid) -> Result<Poll, PollError> {
        let mut poll = self.get_poll(poll_id).await?;

        let service = self.clone();
        poll.likes = self
            .counters
            .increment_then(EntityKey::Poll(poll_id), move |likes| async move {
                let poll = service.embedded_poll(poll_id).await;
                service
                    .broadcaster
                    .publish(ChangeNotification::LikeUpdated { poll_id, likes, poll })
                    .await;
            })
            .await?;

        Ok(poll)
    }

    async fn embedded_poll(&self, poll_id: Uuid) -> Option<Poll> {
        if self.options.payload != NotificationPayload::Poll {
            return None;
        }
        match self.store.get_poll(poll_id).await {
            Ok(poll) => poll,
            Err(e) => {
                warn!("Could not load poll {} for notification: {}", poll_id, e);
                None
            }
        }
    }
}
