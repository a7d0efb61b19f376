use axum::{
    Form, Json, Router, debug_handler,
    extract::Request,
    http::{HeaderMap, HeaderName, StatusCode, header},
    middleware::Next,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
};
use cookie::{Cookie, SameSite};
use serde::Deserialize;
use serde_json::json;

use crate::{AppResult, AppState, chat::Identity, error::ChatError, include_res, res};

pub const USER_COOKIE: &str = "user";

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(auth_page).post(login))
}

/// The identity carried by the request's `user` cookie, if it is usable.
fn user_from(headers: &HeaderMap) -> Option<Identity> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|c| c.name() == USER_COOKIE)
        .and_then(|c| Identity::parse(c.value()).ok())
}

#[debug_handler]
pub(crate) async fn auth_page(headers: HeaderMap) -> impl IntoResponse {
    let current = user_from(&headers)
        .map(|identity| {
            format!(
                "<p>You are chatting as <b>{}</b>. <a href='/rooms-list'>Go to rooms</a></p>",
                res::escape_text(identity.as_str())
            )
        })
        .unwrap_or_default();

    Html(include_res!(str, "/pages/auth.html").replace("{current}", &current))
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginForm {
    nick: String,
}

#[debug_handler]
pub(crate) async fn login(
    Form(LoginForm { nick }): Form<LoginForm>,
) -> AppResult<([(HeaderName, String); 1], Redirect)> {
    let identity = Identity::parse(&nick)?;
    if !identity
        .as_str()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || " -_.".contains(c))
    {
        return Err(ChatError::Validation(
            "nickname may only contain letters, digits, spaces, '-', '_' and '.'".to_owned(),
        )
        .into());
    }

    tracing::info!(nick = identity.as_str(), "user signed in");
    let cookie = Cookie::build((USER_COOKIE, identity.as_str().to_owned()))
        .path("/")
        .same_site(SameSite::Lax)
        .build();

    Ok((
        [(header::SET_COOKIE, cookie.to_string())],
        Redirect::to("/rooms-list"),
    ))
}

/// Lets a request through only when it carries a usable `user` cookie, and
/// hands the identity to the handler as a request extension.
pub async fn require_user(mut req: Request, next: Next) -> Response {
    match user_from(req.headers()) {
        Some(identity) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        None => (
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "You must have a 'user' cookie to access this endpoint."
            })),
        )
            .into_response(),
    }
}
