use crate::db::connection::DbPool;
use crate::db::models::{EntityKey, NewPoll, Poll, PollOption};
use crate::db::store::PollStore;
use crate::error::StoreError;
use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::types::chrono::{DateTime, Utc};
use sqlx::{Error, Row};
use std::collections::HashMap;
use uuid::Uuid;

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgPollStore {
    pool: DbPool,
}

impl PgPollStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

async fn insert_poll(conn: &mut PgConnection, poll_id: Uuid, title: &str) -> Result<DateTime<Utc>, Error> {
    let row = sqlx::query("INSERT INTO polls (id, title) VALUES ($1, $2) RETURNING created_at")
        .bind(poll_id)
        .bind(title)
        .fetch_one(conn)
        .await?;

    Ok(row.get("created_at"))
}

async fn add_poll_option(
    conn: &mut PgConnection,
    option_id: Uuid,
    poll_id: Uuid,
    position: i32,
    option_text: &str,
) -> Result<(), Error> {
    sqlx::query(
        "INSERT INTO poll_options (id, poll_id, position, option_text) VALUES ($1, $2, $3, $4)",
    )
    .bind(option_id)
    .bind(poll_id)
    .bind(position)
    .bind(option_text)
    .execute(conn)
    .await?;

    Ok(())
}

/// Option index as stored in the `position` column.
fn option_position(index: usize) -> Result<i32, StoreError> {
    i32::try_from(index).map_err(|_| StoreError::TooManyOptions(index))
}

fn option_from_row(r: &PgRow) -> PollOption {
    PollOption {
        id: r.get("id"),
        poll_id: r.get("poll_id"),
        option_text: r.get("option_text"),
        votes: r.get("votes"),
    }
}

fn poll_from_row(r: &PgRow, options: Vec<PollOption>) -> Poll {
    Poll {
        id: r.get("id"),
        title: r.get("title"),
        created_at: r.get("created_at"),
        likes: r.get("likes"),
        options,
    }
}

#[async_trait]
impl PollStore for PgPollStore {
    async fn create_poll(&self, new_poll: NewPoll) -> Result<Poll, StoreError> {
        let mut tx = self.pool.begin().await?;

        let poll_id = new_poll.id;
        let created_at = insert_poll(&mut tx, poll_id, &new_poll.title).await?;

        let mut options = Vec::with_capacity(new_poll.options.len());
        for (index, option) in new_poll.options.into_iter().enumerate() {
            let position = option_position(index)?;
            add_poll_option(&mut tx, option.id, poll_id, position, &option.option_text).await?;
            options.push(PollOption {
                id: option.id,
                poll_id,
                option_text: option.option_text,
                votes: 0,
            });
        }

        tx.commit().await?;

        Ok(Poll {
            id: poll_id,
            title: new_poll.title,
            created_at,
            likes: 0,
            options,
        })
    }

    async fn get_poll(&self, poll_id: Uuid) -> Result<Option<Poll>, StoreError> {
        let Some(row) =
            sqlx::query("SELECT id, title, created_at, likes FROM polls WHERE id = $1")
                .bind(poll_id)
                .fetch_optional(&self.pool)
                .await?
        else {
            return Ok(None);
        };

        let options = sqlx::query(
            "SELECT id, poll_id, option_text, votes FROM poll_options WHERE poll_id = $1 ORDER BY position",
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(option_from_row)
        .collect();

        Ok(Some(poll_from_row(&row, options)))
    }

    async fn list_polls(&self) -> Result<Vec<Poll>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, title, created_at, likes FROM polls ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let poll_ids: Vec<Uuid> = rows.iter().map(|r| r.get("id")).collect();

        let mut options_by_poll: HashMap<Uuid, Vec<PollOption>> = HashMap::new();
        let option_rows = sqlx::query(
            "SELECT id, poll_id, option_text, votes FROM poll_options WHERE poll_id = ANY($1) ORDER BY poll_id, position",
        )
        .bind(&poll_ids)
        .fetch_all(&self.pool)
        .await?;

        for r in &option_rows {
            let option = option_from_row(r);
            options_by_poll.entry(option.poll_id).or_default().push(option);
        }

        Ok(rows
            .iter()
            .map(|r| {
                let id: Uuid = r.get("id");
                poll_from_row(r, options_by_poll.remove(&id).unwrap_or_default())
            })
            .collect())
    }

    async fn get_option(&self, option_id: Uuid) -> Result<Option<PollOption>, StoreError> {
        let row = sqlx::query(
            "SELECT id, poll_id, option_text, votes FROM poll_options WHERE id = $1",
        )
        .bind(option_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(option_from_row))
    }

    async fn counter_value(&self, entity: EntityKey) -> Result<Option<i64>, StoreError> {
        let query = match entity {
            EntityKey::Poll(id) => sqlx::query("SELECT likes AS value FROM polls WHERE id = $1").bind(id),
            EntityKey::Option(id) => {
                sqlx::query("SELECT votes AS value FROM poll_options WHERE id = $1").bind(id)
            }
        };

        let row = query.fetch_optional(&self.pool).await?;
        Ok(row.map(|r| r.get::<i64, _>("value")))
    }

    async fn increment(&self, entity: EntityKey) -> Result<Option<i64>, StoreError> {
        let query = match entity {
            EntityKey::Poll(id) => {
                sqlx::query("UPDATE polls SET likes = likes + 1 WHERE id = $1 RETURNING likes AS value")
                    .bind(id)
            }
            EntityKey::Option(id) => sqlx::query(
                "UPDATE poll_options SET votes = votes + 1 WHERE id = $1 RETURNING votes AS value",
            )
            .bind(id),
        };

        let row = query.fetch_optional(&self.pool).await?;
        Ok(row.map(|r| r.get::<i64, _>("value")))
    }
}
