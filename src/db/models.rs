use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub likes: i64,
    pub options: Vec<PollOption>,
}

impl Poll {
    pub fn option(&self, option_id: Uuid) -> Option<&PollOption> {
        self.options.iter().find(|opt| opt.id == option_id)
    }

    pub fn total_votes(&self) -> i64 {
        self.options.iter().map(|o| o.votes).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollOption {
    pub id: Uuid,
    pub poll_id: Uuid,
    pub option_text: String,
    pub votes: i64,
}

/// Input for a poll creation, committed as one unit together with its options.
///
/// Identities are chosen up front so the new entities can be locked before
/// they become visible.
#[derive(Debug, Clone)]
pub struct NewPoll {
    pub id: Uuid,
    pub title: String,
    pub options: Vec<NewOption>,
}

#[derive(Debug, Clone)]
pub struct NewOption {
    pub id: Uuid,
    pub option_text: String,
}

impl NewPoll {
    pub fn new(title: impl Into<String>, option_texts: impl IntoIterator<Item = String>) -> Self {
        NewPoll {
            id: Uuid::new_v4(),
            title: title.into(),
            options: option_texts
                .into_iter()
                .map(|option_text| NewOption {
                    id: Uuid::new_v4(),
                    option_text,
                })
                .collect(),
        }
    }

    /// The poll followed by its options.
    pub fn entities(&self) -> Vec<EntityKey> {
        std::iter::once(EntityKey::Poll(self.id))
            .chain(self.options.iter().map(|opt| EntityKey::Option(opt.id)))
            .collect()
    }
}

/// The counter-bearing entities. Poll and option ids live in separate namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKey {
    /// A poll's like counter.
    Poll(Uuid),
    /// An option's vote counter.
    Option(Uuid),
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKey::Poll(id) => write!(f, "poll:{id}"),
            EntityKey::Option(id) => write!(f, "option:{id}"),
        }
    }
}
