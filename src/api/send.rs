use std::sync::Arc;

use axum::{
    Extension, Json, debug_handler,
    extract::{Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    AppResult, AppState,
    chat::{ChatService, Identity},
};

use super::messages::RoomQuery;

#[derive(Debug, Deserialize)]
pub(crate) struct SendMessageRequest {
    room: String,
    body: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct SendMessageResponse {
    id: Uuid,
    /// Queue depth right after this message was accepted.
    pending: usize,
}

/// Queues the message and answers `202 Accepted`: the message is durable
/// only once the ingestion worker has written it.
#[debug_handler(state = AppState)]
pub(crate) async fn send_message(
    State(chat): State<Arc<ChatService>>,
    Extension(user): Extension<Identity>,
    Json(SendMessageRequest { room, body }): Json<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<SendMessageResponse>)> {
    let message = chat.send(&room, user.as_str(), &body).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SendMessageResponse {
            id: message.id,
            pending: chat.pending(),
        }),
    ))
}

#[debug_handler(state = AppState)]
pub(crate) async fn clear(
    State(chat): State<Arc<ChatService>>,
    Query(RoomQuery { room }): Query<RoomQuery>,
) -> AppResult<StatusCode> {
    chat.clear(&room).await?;
    Ok(StatusCode::NO_CONTENT)
}
