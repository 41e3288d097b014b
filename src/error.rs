use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Too many options: {0}")]
    TooManyOptions(usize),
}

#[derive(Error, Debug)]
pub enum PollError {
    #[error("Poll not found")]
    PollNotFound,
    #[error("Poll option not found")]
    OptionNotFound,
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Store failure: {0}")]
    StoreFailure(#[from] StoreError),
}

impl PollError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PollError::PollNotFound | PollError::OptionNotFound)
    }
}

impl IntoResponse for PollError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            PollError::PollNotFound => (StatusCode::NOT_FOUND, "Poll not found"),
            PollError::OptionNotFound => (StatusCode::NOT_FOUND, "Option not found"),
            PollError::Validation(_) => (StatusCode::BAD_REQUEST, "Invalid request"),
            PollError::StoreFailure(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Store failure"),
        };

        let body = Json(json!({
            "error": error_message,
            "details": self.to_string()
        }));

        (status, body).into_response()
    }
}
