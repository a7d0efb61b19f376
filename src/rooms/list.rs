use std::sync::Arc;

use axum::{Extension, debug_handler, extract::State, response::Html};

use crate::{
    AppResult, AppState,
    chat::{ChatService, Identity},
    error::ChatError,
    include_res, res,
};

#[debug_handler(state = AppState)]
pub(crate) async fn rooms_list(
    State(chat): State<Arc<ChatService>>,
    Extension(user): Extension<Identity>,
) -> AppResult<Html<String>> {
    let mut room_items = String::new();
    for room in chat.sorted_rooms().await? {
        let preview = match chat.last_message(room.as_str()).await {
            Ok(last) => format!(
                "{}: {}",
                res::escape_text(&last.sender),
                res::escape_text(&last.body)
            ),
            Err(ChatError::NoMessages(_)) => "no messages yet".to_owned(),
            Err(e) => return Err(e.into()),
        };

        room_items += &include_res!(str, "/pages/rooms/room_item.html")
            .replace("{room}", room.as_str())
            .replace("{preview}", &preview);
    }

    Ok(Html(
        include_res!(str, "/pages/rooms/list.html")
            .replace("{user}", &res::escape_text(user.as_str()))
            .replace("{room_items}", &room_items),
    ))
}
