use std::sync::Arc;

use axum::{
    Extension, debug_handler,
    extract::{Query, State},
    response::Html,
};
use serde::Deserialize;

use crate::{
    AppResult, AppState,
    chat::{ChatService, Identity, RoomId},
    include_res, res,
};

use super::msg;

#[derive(Debug, Deserialize)]
pub(crate) struct RoomQuery {
    room: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn room(
    State(chat): State<Arc<ChatService>>,
    Extension(user): Extension<Identity>,
    Query(RoomQuery { room }): Query<RoomQuery>,
) -> AppResult<Html<String>> {
    let room = RoomId::parse(&room)?;
    let messages = chat.messages(room.as_str()).await?;

    let items: String = messages.iter().map(msg::msg_to_html).collect();

    let body = include_res!(str, "/pages/rooms/room.html")
        .replace("{room}", room.as_str())
        .replace("{user}", &res::escape_text(user.as_str()))
        .replace("{messages}", &items);

    Ok(Html(body))
}
