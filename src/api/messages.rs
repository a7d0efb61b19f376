use std::sync::Arc;

use axum::{
    Json, debug_handler,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};

use crate::{
    AppResult, AppState,
    chat::{ChatService, Message, RoomId},
    error::ChatError,
};

#[derive(Debug, Deserialize)]
pub(crate) struct RoomQuery {
    pub(crate) room: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RoomsQuery {
    #[serde(default)]
    sort: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct RoomSummary {
    room: RoomId,
    last_message: Option<Message>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn rooms(
    State(chat): State<Arc<ChatService>>,
    Query(RoomsQuery { sort }): Query<RoomsQuery>,
) -> AppResult<Json<Vec<RoomId>>> {
    let rooms = if sort {
        chat.sorted_rooms().await?
    } else {
        chat.rooms().await?
    };
    Ok(Json(rooms))
}

#[debug_handler(state = AppState)]
pub(crate) async fn rooms_last_message(
    State(chat): State<Arc<ChatService>>,
) -> AppResult<Json<Vec<RoomSummary>>> {
    let mut summaries = Vec::new();
    for room in chat.sorted_rooms().await? {
        let last_message = match chat.last_message(room.as_str()).await {
            Ok(last) => Some(last),
            Err(ChatError::NoMessages(_)) => None,
            Err(e) => return Err(e.into()),
        };
        summaries.push(RoomSummary { room, last_message });
    }
    Ok(Json(summaries))
}

#[debug_handler(state = AppState)]
pub(crate) async fn last_message(
    State(chat): State<Arc<ChatService>>,
    Query(RoomQuery { room }): Query<RoomQuery>,
) -> AppResult<Json<Message>> {
    Ok(Json(chat.last_message(&room).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn messages(
    State(chat): State<Arc<ChatService>>,
    Query(RoomQuery { room }): Query<RoomQuery>,
) -> AppResult<Json<Vec<Message>>> {
    Ok(Json(chat.messages(&room).await?))
}
