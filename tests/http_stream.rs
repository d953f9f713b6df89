use anyhow::Result;
use futures_util::StreamExt;
use rpi_mjpeg_streamer::capture::FeederCounters;
use image::DynamicImage;
use rpi_mjpeg_streamer::client::{self, FrameSink, JpegExtractor, StreamClient};
use rpi_mjpeg_streamer::config::Config;
use rpi_mjpeg_streamer::frame::{Frame, FrameSlot};
use rpi_mjpeg_streamer::streaming::SessionRegistry;
use rpi_mjpeg_streamer::web::{run_server, AppState};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

const PUBLISH_EVERY: Duration = Duration::from_millis(10);

/// In-process server fed by a synthetic camera
struct TestServer {
    addr: SocketAddr,
    slot: Arc<FrameSlot>,
    registry: Arc<SessionRegistry>,
    server: JoinHandle<()>,
    camera: JoinHandle<()>,
}

impl TestServer {
    async fn start(max_clients: usize) -> Result<Self> {
        let mut config = Config::default();
        config.server.max_clients = max_clients;
        config.server.pi_ip = Some("127.0.0.1".to_string());
        config.stream.target_fps = 50;

        let slot = Arc::new(FrameSlot::new());
        let registry = SessionRegistry::new(max_clients);
        let state = AppState::new(
            Arc::new(config),
            Arc::clone(&slot),
            Arc::clone(&registry),
            Arc::new(FeederCounters::default()),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            let _ = run_server(listener, state, std::future::pending()).await;
        });

        let camera_slot = Arc::clone(&slot);
        let camera = tokio::spawn(async move {
            let mut tag = 0u8;
            loop {
                tag = tag.wrapping_add(1);
                if camera_slot.publish(fake_jpeg(tag)).is_none() {
                    break;
                }
                sleep(PUBLISH_EVERY).await;
            }
        });

        Ok(Self {
            addr,
            slot,
            registry,
            server,
            camera,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Stops the synthetic camera; the slot stays open with its last frame
    fn stall_camera(&self) {
        self.camera.abort();
    }

    /// Polls until the active-session count reaches `expected`
    async fn wait_for_sessions(&self, expected: usize) -> bool {
        for _ in 0..100 {
            if self.registry.active_sessions() == expected {
                return true;
            }
            sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.camera.abort();
        self.server.abort();
    }
}

fn fake_jpeg(tag: u8) -> Vec<u8> {
    let mut data = vec![0xFF, 0xD8, tag];
    data.extend(std::iter::repeat(tag | 1).take(64));
    data.extend_from_slice(&[0xFF, 0xD9]);
    data
}

fn real_jpeg(width: u32) -> Vec<u8> {
    let image = image::RgbImage::new(width, 8);
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 80)
        .encode_image(&image)
        .expect("encode test image");
    out
}

struct FailingSink;

impl FrameSink for FailingSink {
    fn on_frame(&mut self, _: &Frame, _: &DynamicImage) -> Result<(), client::ClientError> {
        Err(client::ClientError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk full",
        )))
    }
}

/// Test that the web server responds to health checks
#[tokio::test]
async fn test_health_endpoint() -> Result<()> {
    let server = TestServer::start(4).await?;

    let response = reqwest::get(server.url("/health")).await?;
    assert!(response.status().is_success());

    let body: Value = serde_json::from_str(&response.text().await?)?;
    assert_eq!(body["status"], "ok");

    Ok(())
}

#[tokio::test]
async fn test_index_page_shows_stream_url() -> Result<()> {
    let server = TestServer::start(4).await?;

    let page = reqwest::get(server.url("/")).await?.text().await?;
    let expected = format!("127.0.0.1:{}", Config::default().server.port);
    assert!(page.contains(&expected));
    assert!(page.contains("/video_feed"));

    Ok(())
}

#[tokio::test]
async fn test_video_feed_streams_multipart_jpegs() -> Result<()> {
    let server = TestServer::start(4).await?;

    let response = reqwest::get(server.url("/video_feed")).await?;
    assert!(response.status().is_success());
    assert_eq!(
        response.headers()["content-type"],
        "multipart/x-mixed-replace; boundary=frame"
    );

    let mut extractor = JpegExtractor::new(client::DEFAULT_MAX_IMAGE_BYTES);
    let mut body = response.bytes_stream();
    let mut images = Vec::new();
    let mut raw = Vec::new();

    while images.len() < 3 {
        let chunk = tokio::time::timeout(Duration::from_secs(5), body.next())
            .await?
            .expect("stream ended early")?;
        raw.extend_from_slice(&chunk);
        images.extend(extractor.push(&chunk));
    }

    assert!(raw.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8"));
    for image in &images {
        assert_eq!(image.len(), 69);
        assert!(image.starts_with(&[0xFF, 0xD8]));
    }
    // Every part carries a different frame
    assert_ne!(images[0][2], images[1][2]);
    assert_ne!(images[1][2], images[2][2]);

    Ok(())
}

#[tokio::test]
async fn test_disconnect_releases_session() -> Result<()> {
    let server = TestServer::start(4).await?;
    assert_eq!(server.registry.active_sessions(), 0);

    let response = reqwest::get(server.url("/video_feed")).await?;
    let mut body = response.bytes_stream();
    body.next().await.expect("no data")?;
    assert!(server.wait_for_sessions(1).await);

    drop(body);
    assert!(server.wait_for_sessions(0).await, "session leaked after disconnect");
    assert_eq!(server.registry.total_sessions(), 1);

    Ok(())
}

#[tokio::test]
async fn test_disconnect_on_stalled_camera_releases_session() -> Result<()> {
    let server = TestServer::start(4).await?;
    server.stall_camera();
    server.slot.publish(fake_jpeg(1));

    let response = reqwest::get(server.url("/video_feed")).await?;
    let mut body = response.bytes_stream();
    body.next().await.expect("no data")?;
    assert!(server.wait_for_sessions(1).await);

    // Nothing more will be written, the viewer is parked waiting for a frame
    sleep(Duration::from_millis(100)).await;
    let dropped_at = Instant::now();
    drop(body);

    assert!(server.wait_for_sessions(0).await, "session leaked after disconnect");
    let released_after = dropped_at.elapsed();
    assert!(
        released_after < Duration::from_millis(500),
        "session released after {:?}",
        released_after
    );
    assert_eq!(server.registry.total_sessions(), 1);

    Ok(())
}

#[tokio::test]
async fn test_extra_viewer_rejected() -> Result<()> {
    let server = TestServer::start(1).await?;

    let first = reqwest::get(server.url("/video_feed")).await?;
    assert!(first.status().is_success());

    let second = reqwest::get(server.url("/video_feed")).await?;
    assert_eq!(second.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(server.registry.rejected_sessions(), 1);

    drop(first);
    assert!(server.wait_for_sessions(0).await);

    let third = reqwest::get(server.url("/video_feed")).await?;
    assert!(third.status().is_success());

    Ok(())
}

#[tokio::test]
async fn test_stats_endpoint() -> Result<()> {
    let server = TestServer::start(4).await?;
    sleep(PUBLISH_EVERY * 5).await;

    let body = reqwest::get(server.url("/api/stats")).await?.text().await?;
    let stats: Value = serde_json::from_str(&body)?;
    assert!(stats["current_sequence"].as_u64().unwrap_or(0) > 0);
    assert_eq!(stats["active_sessions"], 0);

    Ok(())
}

#[tokio::test]
async fn test_closing_slot_ends_streams() -> Result<()> {
    let server = TestServer::start(4).await?;

    let response = reqwest::get(server.url("/video_feed")).await?;
    let mut body = response.bytes_stream();
    body.next().await.expect("no data")?;

    server.slot.close();

    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(chunk) = body.next().await {
            chunk?;
        }
        Ok::<_, reqwest::Error>(())
    })
    .await;
    assert!(drained.is_ok(), "stream did not end after close");
    assert!(server.wait_for_sessions(0).await);

    let health = reqwest::get(server.url("/health")).await?;
    assert_eq!(health.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

    Ok(())
}

#[tokio::test]
async fn test_client_pulls_frames_into_slot() -> Result<()> {
    let server = TestServer::start(4).await?;

    let stream = StreamClient::new(server.url("/video_feed"))?;
    let local = stream.slot();

    let reader = tokio::spawn(async move { stream.run().await });

    let mut known = 0;
    for _ in 0..3 {
        match local.wait_next_async(known, Duration::from_secs(5)).await {
            rpi_mjpeg_streamer::Wait::Frame(frame) => {
                assert_eq!(frame.len(), 69);
                known = frame.sequence();
            }
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    local.close();
    let published = tokio::time::timeout(Duration::from_secs(5), reader).await???;
    assert!(published >= 3);

    Ok(())
}

#[tokio::test]
async fn test_client_reports_error_status() -> Result<()> {
    let server = TestServer::start(4).await?;

    let stream = StreamClient::new(server.url("/does_not_exist"))?;
    let result = stream.run().await;

    assert!(matches!(result, Err(client::ClientError::Status(404))));
    assert!(stream.slot().is_closed());

    Ok(())
}

#[tokio::test]
async fn test_client_stops_when_closed_during_stall() -> Result<()> {
    let server = TestServer::start(4).await?;
    server.stall_camera();
    server.slot.publish(fake_jpeg(1));

    let stream = Arc::new(StreamClient::new(server.url("/video_feed"))?);
    let local = stream.slot();
    let reader = {
        let stream = Arc::clone(&stream);
        tokio::spawn(async move { stream.run().await })
    };

    assert!(matches!(
        local.wait_next_async(0, Duration::from_secs(5)).await,
        rpi_mjpeg_streamer::Wait::Frame(_)
    ));

    // No further bytes arrive from the server; closing alone must end the reader
    local.close();
    let published = tokio::time::timeout(Duration::from_secs(2), reader).await???;
    assert_eq!(published, 1);

    Ok(())
}

#[tokio::test]
async fn test_sink_failure_stops_client() -> Result<()> {
    let server = TestServer::start(4).await?;
    server.stall_camera();

    let stream = StreamClient::new(server.url("/video_feed"))?;
    let slot = stream.slot();
    let consumer = tokio::task::spawn_blocking(move || {
        client::consume(&slot, &mut FailingSink, Duration::from_millis(100))
    });

    let camera_slot = Arc::clone(&server.slot);
    let camera = tokio::spawn(async move {
        for width in 8.. {
            if camera_slot.publish(real_jpeg(width)).is_none() {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
    });

    let received = tokio::time::timeout(Duration::from_secs(5), stream.run()).await;
    camera.abort();

    assert!(received.is_ok(), "reader kept running after the sink failed");
    let consumed = tokio::time::timeout(Duration::from_secs(5), consumer).await??;
    assert!(matches!(consumed, Err(client::ClientError::Io(_))));

    Ok(())
}
