pub mod api;
pub mod appresult;
pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
pub mod res;
pub mod rooms;
pub mod store;
pub mod telemetry;

use std::sync::Arc;

use axum::{
    Router,
    extract::FromRef,
    http::{HeaderName, Method, header},
    middleware,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

pub use appresult::{AppError, AppResult};

use chat::{ChatService, FullPolicy};
use config::Config;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub chat: Arc<ChatService>,
}

/// Builds the full HTTP application around a running chat service.
pub fn app(state: AppState, cfg: &Config) -> Router {
    let gated = rooms::router()
        .nest("/api", api::router())
        .route_layer(middleware::from_fn(auth::require_user));

    let app = Router::new()
        .merge(auth::router())
        .merge(res::router())
        .merge(gated)
        .with_state(state)
        .layer(cors());

    // A blocking enqueue may stall a handler until the worker frees a slot,
    // so that policy is never served without a request timeout.
    let app = match cfg.queue_policy {
        FullPolicy::Block => app.layer(TimeoutLayer::new(cfg.request_timeout)),
        FullPolicy::FailFast => app,
    };

    app.layer(TraceLayer::new_for_http())
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-auth-token"),
        ])
}
