use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::capture::FeederCounters;
use crate::config::Config;
use crate::frame::FrameSlot;
use crate::streaming::{multipart, SessionRegistry, StreamMultiplexer, StreamerStats};

const INDEX_TEMPLATE_PATH: &str = "web/index.html";

/// Web server state
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    slot: Arc<FrameSlot>,
    registry: Arc<SessionRegistry>,
    feeder: Arc<FeederCounters>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        slot: Arc<FrameSlot>,
        registry: Arc<SessionRegistry>,
        feeder: Arc<FeederCounters>,
    ) -> Self {
        Self {
            config,
            slot,
            registry,
            feeder,
        }
    }

    pub fn stats(&self) -> StreamerStats {
        StreamerStats::collect(&self.slot, &self.feeder, &self.registry)
    }
}

/// Routes served by the streamer
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/video_feed", get(video_feed_handler))
        .route("/api/config", get(config_handler))
        .route("/api/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves HTTP on `listener` until `shutdown` resolves
pub async fn run_server<F>(listener: TcpListener, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(
        addr = %listener.local_addr()?,
        stream = %stream_url(&state.config),
        "Web server listening"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

fn stream_url(config: &Config) -> String {
    format!("http://{}:{}/video_feed", config.pi_ip(), config.server.port)
}

/// MJPEG stream handler, one multiplexer per viewer
async fn video_feed_handler(State(state): State<AppState>) -> Response {
    if state.slot.is_closed() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Camera stopped").into_response();
    }

    let Some(session) = state.registry.open(state.config.stream.frame_interval()) else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many viewers").into_response();
    };

    let stream = StreamMultiplexer::new(Arc::clone(&state.slot), session).into_stream();

    (
        [
            (header::CONTENT_TYPE, multipart::CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

/// Index page handler
async fn index_handler(State(state): State<AppState>) -> Html<String> {
    let config = &state.config;
    let pi_ip = config.pi_ip();

    let template = match tokio::fs::read_to_string(INDEX_TEMPLATE_PATH).await {
        Ok(html) => html,
        Err(e) => {
            error!("Failed to load {}: {}", INDEX_TEMPLATE_PATH, e);
            FALLBACK_INDEX.to_string()
        }
    };

    Html(render_index(&template, config, &pi_ip))
}

fn render_index(template: &str, config: &Config, pi_ip: &str) -> String {
    template
        .replace("{{IP}}", pi_ip)
        .replace("{{PORT}}", &config.server.port.to_string())
        .replace("{{WIDTH}}", &config.stream.frame_width.to_string())
        .replace("{{HEIGHT}}", &config.stream.frame_height.to_string())
        .replace("{{FPS}}", &config.stream.target_fps.to_string())
        .replace("{{QUALITY}}", &config.stream.jpeg_quality.to_string())
}

const FALLBACK_INDEX: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>RPi MJPEG Streamer</title>
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <style>
        body { font-family: Arial, sans-serif; text-align: center; margin: 20px; }
        img { max-width: 100%; height: auto; border: 1px solid #ddd; }
        .info { background-color: #f5f5f5; padding: 10px; border-radius: 5px; margin-top: 20px; }
    </style>
</head>
<body>
    <h1>Raspberry Pi camera</h1>
    <img src="/video_feed" />
    <div class="info">
        <p>Stream URL: <code>http://{{IP}}:{{PORT}}/video_feed</code></p>
        <p>Resolution: {{WIDTH}}x{{HEIGHT}} @ {{FPS}} FPS, JPEG quality {{QUALITY}}</p>
    </div>
</body>
</html>"#;

/// Configuration API response
#[derive(Serialize)]
struct ConfigResponse {
    frame_width: u32,
    frame_height: u32,
    target_fps: u32,
    jpeg_quality: u8,
    max_clients: usize,
    stream_url: String,
}

/// Config API handler
async fn config_handler(State(state): State<AppState>) -> Json<ConfigResponse> {
    let config = &state.config;

    Json(ConfigResponse {
        frame_width: config.stream.frame_width,
        frame_height: config.stream.frame_height,
        target_fps: config.stream.target_fps,
        jpeg_quality: config.stream.jpeg_quality,
        max_clients: config.server.max_clients,
        stream_url: stream_url(config),
    })
}

/// Stats API handler
async fn stats_handler(State(state): State<AppState>) -> Json<StreamerStats> {
    Json(state.stats())
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check handler
async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (code, status) = if state.slot.is_closed() {
        (StatusCode::SERVICE_UNAVAILABLE, "camera-stopped")
    } else {
        (StatusCode::OK, "ok")
    };

    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}
