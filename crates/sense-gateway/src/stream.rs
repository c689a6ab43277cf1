// src/stream.rs

//! `GET /api/stream/{path}`: serves HLS playlist and segment files out of
//! the shared output directory the camera worker writes into. Grounded on
//! `original_source/services/web-gateway/gateway/routes/stream.py`'s
//! `serve_stream_file` — the path-traversal defense is `Path::file_name()`
//! applied to the request path before it ever touches the filesystem.

use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;

use crate::state::GatewayState;

pub async fn serve_stream_file(
    State(state): State<GatewayState>,
    Path(path): Path<String>,
) -> impl IntoResponse {
    let safe_name = std::path::Path::new(&path)
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string);

    let Some(safe_name) = safe_name.filter(|n| !n.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Invalid path").into_response();
    };

    let file_path = state.hls_dir.join(&safe_name);

    if safe_name.ends_with(".m3u8") {
        return match tokio::fs::read(&file_path).await {
            Ok(body) => (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "application/vnd.apple.mpegurl"),
                    (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
                ],
                body,
            )
                .into_response(),
            Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "Stream not available").into_response(),
        };
    }

    if safe_name.ends_with(".ts") {
        return match tokio::fs::read(&file_path).await {
            Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, "video/mp2t")], body).into_response(),
            Err(_) => (StatusCode::NOT_FOUND, "Segment not found").into_response(),
        };
    }

    (StatusCode::BAD_REQUEST, "Unsupported file type").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sense_broker::{Broker, FakeBroker};
    use std::sync::Arc;

    #[tokio::test]
    async fn path_traversal_is_reduced_to_basename() {
        let broker: Arc<dyn Broker> = Arc::new(FakeBroker::new());
        let dir = std::env::temp_dir().join(format!("sense-gateway-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("stream.m3u8"), b"#EXTM3U").unwrap();

        let state = GatewayState::new(broker, dir.clone());
        let response = serve_stream_file(
            State(state),
            Path("../../etc/passwd/../stream.m3u8".to_string()),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn missing_playlist_is_503() {
        let broker: Arc<dyn Broker> = Arc::new(FakeBroker::new());
        let dir = std::env::temp_dir().join(format!("sense-gateway-test-missing-{}", std::process::id()));
        let state = GatewayState::new(broker, dir);
        let response = serve_stream_file(State(state), Path("stream.m3u8".to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn missing_segment_is_404() {
        let broker: Arc<dyn Broker> = Arc::new(FakeBroker::new());
        let dir = std::env::temp_dir().join(format!("sense-gateway-test-seg-{}", std::process::id()));
        let state = GatewayState::new(broker, dir);
        let response = serve_stream_file(State(state), Path("segment_001.ts".to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unsupported_extension_is_400() {
        let broker: Arc<dyn Broker> = Arc::new(FakeBroker::new());
        let state = GatewayState::new(broker, std::env::temp_dir());
        let response = serve_stream_file(State(state), Path("stream.mp4".to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
