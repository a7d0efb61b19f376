//! JSON endpoints behind the cookie gate.

mod messages;
mod send;

use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rooms", get(messages::rooms))
        .route("/rooms-last-message", get(messages::rooms_last_message))
        .route("/last-message", get(messages::last_message))
        .route("/messages", get(messages::messages))
        .route("/send-message", post(send::send_message))
        .route("/clear", delete(send::clear))
}
