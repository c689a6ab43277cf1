// src/app.rs

//! Builds the gateway's router: the command bridge, HLS file serving, and
//! a liveness probe. Grounded on
//! `original_source/services/web-gateway/gateway/app.py`'s
//! `create_app` — narrowed to the routes spec.md §6.4 names as the
//! gateway's "consumed interface": the auth, config, sources, and
//! WebSocket routes `app.py` also wires up are outside that surface and
//! are not reproduced here.

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::command::dispatch_command;
use crate::health::health_check;
use crate::state::GatewayState;
use crate::stream::serve_stream_file;

pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/command/{target}", post(dispatch_command))
        .route("/api/stream/{*path}", get(serve_stream_file))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
