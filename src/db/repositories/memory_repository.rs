use crate::db::models::{EntityKey, NewPoll, Poll, PollOption};
use crate::db::store::PollStore;
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    polls: HashMap<Uuid, Poll>,
    /// option id -> owning poll id
    option_owner: HashMap<Uuid, Uuid>,
}

impl Tables {
    fn option_mut(&mut self, option_id: Uuid) -> Option<&mut PollOption> {
        let poll_id = *self.option_owner.get(&option_id)?;
        self.polls
            .get_mut(&poll_id)?
            .options
            .iter_mut()
            .find(|opt| opt.id == option_id)
    }
}

/// Process-local store used when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryPollStore {
    tables: RwLock<Tables>,
}

impl MemoryPollStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PollStore for MemoryPollStore {
    async fn create_poll(&self, new_poll: NewPoll) -> Result<Poll, StoreError> {
        let poll_id = new_poll.id;
        let options = new_poll
            .options
            .into_iter()
            .map(|opt| PollOption {
                id: opt.id,
                poll_id,
                option_text: opt.option_text,
                votes: 0,
            })
            .collect::<Vec<_>>();

        let poll = Poll {
            id: poll_id,
            title: new_poll.title,
            created_at: Utc::now(),
            likes: 0,
            options,
        };

        let mut tables = self.tables.write().await;
        for option in &poll.options {
            tables.option_owner.insert(option.id, poll_id);
        }
        tables.polls.insert(poll_id, poll.clone());

        Ok(poll)
    }

    async fn get_poll(&self, poll_id: Uuid) -> Result<Option<Poll>, StoreError> {
        Ok(self.tables.read().await.polls.get(&poll_id).cloned())
    }

    async fn list_polls(&self) -> Result<Vec<Poll>, StoreError> {
        let mut polls: Vec<Poll> = self.tables.read().await.polls.values().cloned().collect();
        polls.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(polls)
    }

    async fn get_option(&self, option_id: Uuid) -> Result<Option<PollOption>, StoreError> {
        let tables = self.tables.read().await;
        let Some(poll_id) = tables.option_owner.get(&option_id) else {
            return Ok(None);
        };
        Ok(tables
            .polls
            .get(poll_id)
            .and_then(|poll| poll.option(option_id))
            .cloned())
    }

    async fn counter_value(&self, entity: EntityKey) -> Result<Option<i64>, StoreError> {
        let tables = self.tables.read().await;
        Ok(match entity {
            EntityKey::Poll(id) => tables.polls.get(&id).map(|poll| poll.likes),
            EntityKey::Option(id) => tables
                .option_owner
                .get(&id)
                .and_then(|poll_id| tables.polls.get(poll_id))
                .and_then(|poll| poll.option(id))
                .map(|opt| opt.votes),
        })
    }

    async fn increment(&self, entity: EntityKey) -> Result<Option<i64>, StoreError> {
        let mut tables = self.tables.write().await;
        let counter = match entity {
            EntityKey::Poll(id) => tables.polls.get_mut(&id).map(|poll| &mut poll.likes),
            EntityKey::Option(id) => tables.option_mut(id).map(|opt| &mut opt.votes),
        };

        Ok(counter.map(|value| {
            *value += 1;
            *value
        }))
    }
}
