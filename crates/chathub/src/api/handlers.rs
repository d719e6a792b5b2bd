//! HTTP handlers for health and conversation management.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::auth::CurrentUser;
use crate::ids::{ConversationId, UserId};
use crate::store::{Conversation, Message, RemovalOutcome};

/// Longest accepted conversation name, in characters.
const MAX_NAME_LEN: usize = 120;

/// Most messages returned by one history request.
const MAX_HISTORY: u32 = 500;

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Number of users with a live WebSocket connection.
    pub online: usize,
}

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let snapshot = state
        .hub
        .snapshot()
        .await
        .map_err(|e| ApiError::ServiceUnavailable(e.to_string()))?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        online: snapshot.len(),
    }))
}

/// Conversations the caller participates in.
pub async fn list_conversations(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<Conversation>>> {
    let conversations = state.conversations.conversations_for(user.id()).await?;
    Ok(Json(conversations))
}

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub name: String,
}

/// Create a conversation authored by the caller.
pub async fn create_conversation(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<CreateConversationRequest>,
) -> ApiResult<(StatusCode, Json<Conversation>)> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("conversation name must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ApiError::bad_request(format!(
            "conversation name must be at most {} characters",
            MAX_NAME_LEN
        )));
    }

    let conversation = state
        .conversations
        .create_conversation(name, user.id())
        .await?;
    info!(conversation = %conversation.id, author = %user.id(), "Created conversation");

    Ok((StatusCode::CREATED, Json(conversation)))
}

/// Add the caller to a conversation.
pub async fn join_conversation(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(conversation_id): Path<ConversationId>,
) -> ApiResult<Json<Conversation>> {
    state
        .conversations
        .add_participant(&conversation_id, user.id())
        .await?;
    let conversation = state.conversations.get_conversation(&conversation_id).await?;
    Ok(Json(conversation))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemovalResponse {
    pub outcome: RemovalOutcome,
}

/// Remove a participant. Users may remove themselves; the author may remove
/// anyone. Removing the author deletes the conversation.
pub async fn remove_participant(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((conversation_id, target)): Path<(ConversationId, UserId)>,
) -> ApiResult<Json<RemovalResponse>> {
    let conversation = state.conversations.get_conversation(&conversation_id).await?;

    if *user.id() != target && *user.id() != conversation.author {
        return Err(ApiError::forbidden(
            "only the conversation author can remove other participants",
        ));
    }
    if !conversation.has_participant(&target) {
        return Err(ApiError::not_found(format!(
            "participant {} in conversation {}",
            target, conversation_id
        )));
    }

    let outcome = state
        .conversations
        .remove_participant(&conversation_id, &target)
        .await?;
    info!(
        conversation = %conversation_id,
        participant = %target,
        by = %user.id(),
        ?outcome,
        "Removed participant"
    );

    Ok(Json(RemovalResponse { outcome }))
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

/// Message history of a conversation, oldest first. Participants only.
pub async fn list_messages(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(conversation_id): Path<ConversationId>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<Message>>> {
    let conversation = state.conversations.get_conversation(&conversation_id).await?;
    if !conversation.has_participant(user.id()) {
        return Err(ApiError::forbidden("not a participant of this conversation"));
    }

    let limit = query.limit.map(|limit| limit.min(MAX_HISTORY));
    let messages = state.conversations.history(&conversation_id, limit).await?;
    Ok(Json(messages))
}
