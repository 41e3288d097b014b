use crate::db::Poll;
use crate::error::PollError;
use crate::startup::AppState;
use axum::{
    extract::{Extension, Json, Path},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreatePollRequest {
    pub title: String,
    pub options: Vec<String>, // option texts, in display order
}

#[derive(Debug, Serialize)]
pub struct PollResponse {
    pub id: Uuid,
    pub title: String,
    pub created_at: String,
    pub likes: i64,
    pub total_votes: i64,
    pub options: Vec<PollOptionResponse>,
}

#[derive(Debug, Serialize)]
pub struct PollOptionResponse {
    pub id: Uuid,
    pub poll_id: Uuid,
    pub option_text: String,
    pub votes: i64,
}

impl From<Poll> for PollResponse {
    fn from(poll: Poll) -> Self {
        let total_votes = poll.total_votes();
        PollResponse {
            id: poll.id,
            title: poll.title,
            created_at: poll.created_at.to_rfc3339(),
            likes: poll.likes,
            total_votes,
            options: poll
                .options
                .into_iter()
                .map(|opt| PollOptionResponse {
                    id: opt.id,
                    poll_id: opt.poll_id,
                    option_text: opt.option_text,
                    votes: opt.votes,
                })
                .collect(),
        }
    }
}

pub async fn root() -> impl IntoResponse {
    Json(json!({"message": "QuickPoll API is running"}))
}

pub async fn list_polls(
    Extension(app_state): Extension<AppState>,
) -> Result<impl IntoResponse, PollError> {
    let polls = app_state.service.list_polls().await?;
    let response: Vec<PollResponse> = polls.into_iter().map(PollResponse::from).collect();

    Ok((StatusCode::OK, Json(response)))
}

pub async fn get_poll(
    Extension(app_state): Extension<AppState>,
    Path(poll_id): Path<Uuid>,
) -> Result<impl IntoResponse, PollError> {
    let poll = app_state.service.get_poll(poll_id).await?;

    Ok((StatusCode::OK, Json(PollResponse::from(poll))))
}

pub async fn create_poll(
    Extension(app_state): Extension<AppState>,
    Json(payload): Json<CreatePollRequest>,
) -> Result<impl IntoResponse, PollError> {
    let poll = app_state
        .service
        .create_poll(&payload.title, payload.options)
        .await?;

    Ok((StatusCode::CREATED, Json(PollResponse::from(poll))))
}

/// Cast a vote; responds with the parent poll.
pub async fn vote_on_option(
    Extension(app_state): Extension<AppState>,
    Path((poll_id, option_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, PollError> {
    let poll = app_state.service.vote(poll_id, option_id).await?;

    Ok((StatusCode::OK, Json(PollResponse::from(poll))))
}

pub async fn like_poll(
    Extension(app_state): Extension<AppState>,
    Path(poll_id): Path<Uuid>,
) -> Result<impl IntoResponse, PollError> {
    let poll = app_state.service.like(poll_id).await?;

    Ok((StatusCode::OK, Json(PollResponse::from(poll))))
}
