//! Pulls the MJPEG stream from a streamer and feeds the decoded frames to sinks

use anyhow::{Context, Result};
use clap::Parser;
use rpi_mjpeg_streamer::client::{self, FrameSink, LoggingSink, SnapshotSink, StreamClient};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "mjpeg-client")]
#[command(about = "Client for the Raspberry Pi MJPEG stream")]
#[command(version)]
struct Cli {
    /// IP address of the Raspberry Pi
    #[arg(long, default_value = "172.22.2.178")]
    ip: String,

    /// Port of the streamer on the Raspberry Pi
    #[arg(long, default_value_t = 5000)]
    port: u16,

    /// Save decoded frames as JPEG files into this directory
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Keep one frame out of N when saving snapshots
    #[arg(long, default_value_t = 15)]
    snapshot_every: u64,

    /// Log a frame-rate summary every N frames
    #[arg(long, default_value_t = 30)]
    report_every: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt().with_env_filter(filter).with_target(false).init();

    let mut sinks: Vec<Box<dyn FrameSink>> = vec![Box::new(LoggingSink::new(cli.report_every))];
    if let Some(dir) = &cli.snapshot_dir {
        let sink = SnapshotSink::new(dir, cli.snapshot_every)
            .with_context(|| format!("Cannot use snapshot directory {}", dir.display()))?;
        info!(dir = %dir.display(), every = cli.snapshot_every, "Saving snapshots");
        sinks.push(Box::new(sink));
    }

    let stream = StreamClient::new(client::feed_url(&cli.ip, cli.port))?;
    info!(url = stream.url(), "Starting client");

    let slot = stream.slot();
    let consumer = tokio::task::spawn_blocking(move || {
        client::consume(&slot, &mut sinks, Duration::from_secs(1))
    });

    let ctrl_c_slot = stream.slot();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Stopping client");
            ctrl_c_slot.close();
        }
    });

    let received = stream.run().await;
    let delivered = consumer
        .await
        .context("Consumer thread lost")?
        .context("Frame sink failed")?;

    match received {
        Ok(images) => {
            info!(images, delivered, "Client stopped");
            Ok(())
        }
        Err(e) => {
            warn!(delivered, "Stream lost");
            Err(e).context("Video stream failed")
        }
    }
}
