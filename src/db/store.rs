use crate::db::models::{EntityKey, NewPoll, Poll, PollOption};
use crate::error::StoreError;
use async_trait::async_trait;
use uuid::Uuid;

/// Durable record keeper for polls and their options.
///
/// Every method is atomic with respect to a single record. `create_poll` is
/// atomic for the poll together with all of its options: either everything is
/// visible afterwards or nothing is.
#[async_trait]
pub trait PollStore: Send + Sync {
    async fn create_poll(&self, new_poll: NewPoll) -> Result<Poll, StoreError>;

    async fn get_poll(&self, poll_id: Uuid) -> Result<Option<Poll>, StoreError>;

    async fn list_polls(&self) -> Result<Vec<Poll>, StoreError>;

    async fn get_option(&self, option_id: Uuid) -> Result<Option<PollOption>, StoreError>;

    /// Current committed value of the entity's counter, `None` if it does not exist.
    async fn counter_value(&self, entity: EntityKey) -> Result<Option<i64>, StoreError>;

    /// Adds one to the entity's counter and returns the committed result,
    /// `None` if the entity does not exist.
    async fn increment(&self, entity: EntityKey) -> Result<Option<i64>, StoreError>;
}
