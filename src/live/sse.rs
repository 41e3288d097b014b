use crate::live::models::SubscriberId;
use crate::service::PollService;
use crate::startup::AppState;
use axum::{
    extract::Extension,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde_json::json;
use std::{convert::Infallible, time::Duration};
use tracing::error;

/// Unregisters the subscriber once the response stream is dropped.
struct SubscriptionGuard {
    service: PollService,
    id: SubscriberId,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.service.unsubscribe(self.id);
    }
}

pub async fn live_events_sse(
    Extension(app_state): Extension<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let service = app_state.service;
    // Subscribe before the initial load so nothing committed in between is missed.
    let (id, mut rx) = service.subscribe();
    let guard = SubscriptionGuard {
        service: service.clone(),
        id,
    };

    let stream = async_stream::stream! {
        let _guard = guard;

        match service.list_polls().await {
            Ok(polls) => {
                yield Ok(Event::default()
                    .event("init")
                    .data(json!({"polls": polls}).to_string()));
            }
            Err(_) => {
                yield Ok(Event::default()
                    .event("error")
                    .data(json!({"error": "Failed to load polls"}).to_string()));
            }
        }

        while let Some(notification) = rx.recv().await {
            match serde_json::to_string(notification.as_ref()) {
                Ok(data) => {
                    yield Ok(Event::default().event(notification.kind()).data(data));
                }
                Err(e) => {
                    error!("Failed to encode {}: {}", notification.kind(), e);
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keep-alive"),
    )
}
