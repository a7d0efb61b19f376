use axum::{Router, debug_handler, http::header, response::IntoResponse, routing::get};
use pulldown_cmark::{CowStr, Event, Options, Parser};

use crate::AppState;

#[macro_export]
macro_rules! include_res {
    (bytes, $p:expr) => {
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/res", $p))
    };
    (str, $p:expr) => {
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/res", $p))
    };
}

pub fn router() -> Router<AppState> {
    Router::new().route("/style.css", get(stylesheet))
}

#[debug_handler]
pub async fn stylesheet() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/css; charset=utf-8")],
        include_res!(str, "/style.css"),
    )
}

/// Renders a message body as Markdown. Raw HTML in the source is shown as
/// text, never passed through.
pub fn markdown_html(src: &str) -> String {
    let parser = Parser::new_ext(src, Options::ENABLE_STRIKETHROUGH).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        _ => event,
    });

    let mut html_output = String::new();
    pulldown_cmark::html::push_html(&mut html_output, parser);
    html_output
}

/// Escapes `text` for use as HTML element content. Not safe for attributes.
pub fn escape_text(text: &str) -> String {
    let mut out = String::new();
    pulldown_cmark::html::push_html(&mut out, std::iter::once(Event::Text(CowStr::from(text))));
    out
}
