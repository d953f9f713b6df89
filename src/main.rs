//! MJPEG streaming server

use anyhow::{Context, Result};
use clap::Parser;
use rpi_mjpeg_streamer::capture::{build_source, spawn_capture, CaptureFeeder};
use rpi_mjpeg_streamer::config::Config;
use rpi_mjpeg_streamer::frame::FrameSlot;
use rpi_mjpeg_streamer::streaming::SessionRegistry;
use rpi_mjpeg_streamer::web::{run_server, AppState};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "mjpeg-server")]
#[command(about = "Single-camera MJPEG streaming server for Raspberry Pi")]
#[command(version)]
struct Cli {
    /// Path to configuration file (defaults are used if it does not exist)
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Address to bind the HTTP server to
    #[arg(long)]
    host: Option<String>,

    /// HTTP port
    #[arg(short, long)]
    port: Option<u16>,

    /// IP address of this Pi shown on the index page. Default auto-detect.
    #[arg(long)]
    pi_ip: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt().with_env_filter(filter).with_target(false).init();

    info!("MJPEG streamer starting");

    let config = Arc::new(load_config(&cli)?);
    info!(
        width = config.stream.frame_width,
        height = config.stream.frame_height,
        fps = config.stream.target_fps,
        quality = config.stream.jpeg_quality,
        source = ?config.capture.source,
        "Configuration loaded"
    );

    let slot = Arc::new(FrameSlot::new());
    let feeder = CaptureFeeder::new(Arc::clone(&slot), config.stream.max_buffer_bytes);
    let counters = feeder.counters();
    let registry = SessionRegistry::new(config.server.max_clients);

    let source = build_source(&config).context("Failed to set up capture source")?;
    let capture = spawn_capture(source, feeder).context("Failed to start capture thread")?;
    let stop = capture.stop_flag();
    let mut capture_task = tokio::task::spawn_blocking(move || capture.join());

    let state = AppState::new(Arc::clone(&config), slot, registry, counters);

    if config.server.stats_interval_seconds > 0 {
        let interval = Duration::from_secs(config.server.stats_interval_seconds);
        tokio::spawn(report_stats(state.clone(), interval));
    }

    let listener = TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr()))?;

    // Stopping capture closes the slot, which ends every open stream so the
    // graceful shutdown can complete.
    let server = run_server(listener, state, async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown requested");
        stop.store(true, Ordering::Relaxed);
    });
    tokio::pin!(server);

    tokio::select! {
        served = &mut server => {
            served?;
            capture_task
                .await
                .context("Capture thread lost")?
                .context("Capture failed")?;
        }
        captured = &mut capture_task => {
            captured
                .context("Capture thread lost")?
                .context("Capture failed")?;
            server.await?;
        }
    }

    info!("MJPEG streamer stopped");
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = if Path::new(&cli.config).exists() {
        info!(config_path = %cli.config, "Loading configuration");
        Config::load(&cli.config).with_context(|| format!("Failed to load {}", cli.config))?
    } else {
        warn!(config_path = %cli.config, "Config file not found, using defaults");
        Config::default()
    };

    if let Some(host) = &cli.host {
        config.server.bind_ip = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(pi_ip) = &cli.pi_ip {
        config.server.pi_ip = Some(pi_ip.clone());
    }

    config.validate()?;
    Ok(config)
}

/// Periodically logs capture and delivery statistics
async fn report_stats(state: AppState, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;

    let mut previous = state.stats();
    let mut last = Instant::now();

    loop {
        ticker.tick().await;

        let current = state.stats();
        let elapsed = last.elapsed().as_secs_f64();
        info!(
            "📊 Capture {:.1} fps | {} viewers | {:.0} kbps out | {} overflows",
            current.capture_fps(&previous, elapsed),
            current.active_sessions,
            current.calculate_bitrate_kbps(&previous, elapsed),
            current.capture_overflows,
        );

        previous = current;
        last = Instant::now();
    }
}
