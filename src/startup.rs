use crate::config::Config;
use crate::db::{DbPool, MemoryPollStore, PgPollStore, PollStore, init_db, pool_stats};
use crate::live::{live_events_sse, websocket_handler};
use crate::polls::{create_poll, get_poll, like_poll, list_polls, root, vote_on_option};
use crate::service::{PollService, ServiceOptions};
use axum::{
    Router,
    extract::Extension,
    http::{HeaderValue, Method, StatusCode, header::{ACCEPT, CONTENT_TYPE}},
    response::IntoResponse,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::time::{Duration, interval};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug)]
pub struct AppState {
    pub service: PollService,
}

impl AppState {
    pub fn new(store: Arc<dyn PollStore>, options: ServiceOptions) -> Self {
        AppState {
            service: PollService::new(store, options),
        }
    }

    /// Picks the store from configuration: Postgres when a database URL is
    /// set, the in-memory store otherwise.
    pub async fn from_config(config: &Config) -> Result<Self, sqlx::Error> {
        let store: Arc<dyn PollStore> = match &config.database_url {
            Some(url) => {
                let pool = init_db(url, config.db_max_connections).await?;
                info!("Connected to database. {}", pool_stats(&pool));
                spawn_health_check(pool.clone());
                Arc::new(PgPollStore::new(pool))
            }
            None => {
                warn!("DATABASE_URL not set, polls are kept in memory only");
                Arc::new(MemoryPollStore::new())
            }
        };

        Ok(Self::new(store, config.service.clone()))
    }
}

fn spawn_health_check(db: DbPool) {
    tokio::spawn(async move {
        let mut interval = interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            match db.acquire().await {
                Ok(conn) => {
                    drop(conn);
                    debug!("{}", pool_stats(&db));
                }
                Err(e) => {
                    error!("Database connection health check failed: {}", e);
                }
            }
        }
    });
}

pub fn app(app_state: AppState, cors_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    Router::new()
        .route("/", get(root))
        .route("/polls", get(list_polls).post(create_poll))
        .route("/polls/", get(list_polls).post(create_poll))
        .route("/polls/:poll_id", get(get_poll))
        .route("/polls/:poll_id/vote/:option_id", post(vote_on_option))
        .route("/polls/:poll_id/like", post(like_poll))
        .route("/ws", get(websocket_handler))
        .route("/events", get(live_events_sse))
        .layer(Extension(app_state))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_credentials(true)
                .allow_methods([Method::POST, Method::GET, Method::OPTIONS])
                .allow_headers([CONTENT_TYPE, ACCEPT]),
        )
        .fallback(handler_404)
}

async fn handler_404() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "nothing to see here")
}
