mod list;
mod msg;
mod room;

use axum::{Router, routing::get};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/room", get(room::room))
        .route("/rooms-list", get(list::rooms_list))
}
