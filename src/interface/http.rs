use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::{
    chat::{MessageView, UserId},
    entity::{ExternalIdentity, Presence, User},
    error::StoreError,
    history::HistoryProvider,
    router::MessageRouter,
    store::Store,
};

use super::ws::ws_handler;

// -----------------------------------------------------------------------------
// Server State
// -----------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<MessageRouter>,
    pub history: Arc<dyn HistoryProvider>,
    pub store: Arc<Store>,
}

// -----------------------------------------------------------------------------
// Request / response bodies
// -----------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub messages: Vec<MessageView>,
}

#[derive(Debug, Deserialize)]
pub struct PresenceUpdate {
    pub live: bool,
}

#[derive(Debug, Deserialize)]
pub struct ExternalIdentityUpdate {
    pub telegram_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct NewUser {
    pub user_name: String,
    #[serde(default)]
    pub telegram_id: i64,
}

pub struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StoreError::UnknownUser(_) => StatusCode::NOT_FOUND,
            StoreError::UserNameTaken(_) => StatusCode::CONFLICT,
            StoreError::Database(e) => {
                error!("Database error while serving request: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

// -----------------------------------------------------------------------------
// Implementation
// -----------------------------------------------------------------------------

pub struct ChatServer {
    state: AppState,
}

impl ChatServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws/:user_id/:other_id", get(ws_handler))
            .route("/messages/:user_id/:other_id", get(conversation_handler))
            .route("/users", post(create_user_handler))
            .route("/users/:user_id/conversations", get(partners_handler))
            .route("/users/:user_id/others", get(others_handler))
            .route("/users/:user_id/presence", put(presence_handler))
            .route(
                "/users/:user_id/external-identity",
                put(external_identity_handler),
            )
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }
}

async fn conversation_handler(
    State(state): State<AppState>,
    Path((user_id, other_id)): Path<(i64, i64)>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let messages = state
        .history
        .conversation(UserId(user_id), UserId(other_id))
        .await?
        .unwrap_or_default();

    Ok(Json(ConversationResponse { messages }))
}

async fn partners_handler(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<User>>, ApiError> {
    let user = UserId(user_id);
    state.store.get_user(user).await?;
    Ok(Json(state.store.conversation_partners(user).await?))
}

async fn others_handler(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<User>>, ApiError> {
    let user = UserId(user_id);
    state.store.get_user(user).await?;
    Ok(Json(state.store.users_except(user).await?))
}

async fn create_user_handler(
    State(state): State<AppState>,
    Json(request): Json<NewUser>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = state
        .store
        .create_user(
            request.user_name.trim(),
            ExternalIdentity::from_raw(request.telegram_id),
        )
        .await?;
    info!(user = %user.id, name = %user.user_name, "user registered");
    Ok((StatusCode::CREATED, Json(user)))
}

async fn presence_handler(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(update): Json<PresenceUpdate>,
) -> Result<StatusCode, ApiError> {
    let presence = if update.live {
        Presence::Live
    } else {
        Presence::NotLive
    };
    state.store.set_presence(UserId(user_id), presence).await?;
    info!(user = user_id, ?presence, "presence updated");
    Ok(StatusCode::NO_CONTENT)
}

async fn external_identity_handler(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(update): Json<ExternalIdentityUpdate>,
) -> Result<StatusCode, ApiError> {
    state
        .store
        .set_external_identity(UserId(user_id), ExternalIdentity::from_raw(update.telegram_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
