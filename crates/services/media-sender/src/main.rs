//! Media sender binary entry point
//!
//! Receives an RTP video stream on a local UDP port and relays it to a
//! browser over WebRTC, negotiating through a WebSocket signaling server.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: signaling at ws://127.0.0.1:8000/sender, RTP on 127.0.0.1:6000
//! cargo run -p media-sender
//!
//! # Custom signaling endpoint and peer ids
//! cargo run -p media-sender -- \
//!   --signaling-ip 10.0.0.5 \
//!   --signaling-port 8080 \
//!   --local-id camera-1 \
//!   --remote-id viewer
//!
//! # Feed it with GStreamer
//! gst-launch-1.0 videotestsrc ! x264enc tune=zerolatency ! rtph264pay pt=96 \
//!   ! udpsink host=127.0.0.1 port=6000
//! ```

use anyhow::Context;
use clap::Parser;
use rtp_relay::{MediaRelay, RelayConfig, VideoCodec};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// RTP media sender
///
/// Relays a local RTP video stream to a single WebRTC peer.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Signaling server host
    #[arg(long, default_value = "127.0.0.1", env = "RELAY_SIGNALING_IP")]
    signaling_ip: String,

    /// Signaling server port
    #[arg(long, default_value_t = 8000, env = "RELAY_SIGNALING_PORT")]
    signaling_port: u16,

    /// Local identifier (signaling URL path)
    #[arg(long, default_value = "sender", env = "RELAY_LOCAL_ID")]
    local_id: String,

    /// Remote peer identifier offers are addressed to
    #[arg(long, default_value = "browser", env = "RELAY_REMOTE_ID")]
    remote_id: String,

    /// Local UDP address the RTP producer sends to
    #[arg(long, default_value = "127.0.0.1:6000", env = "RELAY_MEDIA_ADDR")]
    media_addr: SocketAddr,

    /// Receive buffer size of the RTP socket in bytes
    #[arg(long, default_value_t = 212_992, env = "RELAY_RECV_BUFFER")]
    recv_buffer: usize,

    /// SSRC stamped into every relayed packet
    #[arg(long, default_value_t = 42, env = "RELAY_SSRC")]
    ssrc: u32,

    /// Video codec of the incoming stream (h264, vp8)
    #[arg(long, default_value = "h264", env = "RELAY_CODEC")]
    codec: VideoCodec,

    /// RTP payload type of the incoming stream
    #[arg(long, default_value_t = 96, env = "RELAY_PAYLOAD_TYPE")]
    payload_type: u8,

    /// STUN servers (comma-separated)
    #[arg(long, value_delimiter = ',', env = "RELAY_STUN_SERVERS")]
    stun_servers: Vec<String>,

    /// Media gap in milliseconds after which the session is rebuilt
    #[arg(long, default_value_t = 2000, env = "RELAY_IDLE_THRESHOLD_MS")]
    idle_threshold_ms: u64,

    /// Watchdog polling interval in milliseconds
    #[arg(long, default_value_t = 200, env = "RELAY_WATCHDOG_INTERVAL_MS")]
    watchdog_interval_ms: u64,

    /// Give up on the signaling server after this many milliseconds
    #[arg(long, default_value_t = 10_000, env = "RELAY_SIGNALING_TIMEOUT_MS")]
    signaling_timeout_ms: u64,

    /// Log output format
    #[arg(long, default_value = "text", env = "RELAY_LOG_FORMAT")]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

impl Args {
    fn into_config(self) -> RelayConfig {
        RelayConfig {
            signaling_host: self.signaling_ip,
            signaling_port: self.signaling_port,
            local_id: self.local_id,
            remote_id: self.remote_id,
            media_bind_addr: self.media_addr,
            recv_buffer_size: self.recv_buffer,
            ssrc: self.ssrc,
            codec: self.codec,
            payload_type: self.payload_type,
            stun_servers: self.stun_servers,
            idle_threshold_ms: self.idle_threshold_ms,
            watchdog_interval_ms: self.watchdog_interval_ms,
            signaling_connect_timeout_ms: self.signaling_timeout_ms,
            ..Default::default()
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            use clap::error::ErrorKind;

            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            // Help and version go to stdout, usage errors to stderr
            let _ = e.print();
            std::process::exit(code);
        }
    };

    // Set up Ctrl+C handler before anything else runs
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        let was_already_set = shutdown_flag_handler.swap(true, Ordering::SeqCst);
        if was_already_set {
            eprintln!("Shutdown already in progress, forcing immediate exit");
            std::process::exit(130);
        }

        eprintln!("\nCtrl+C received, shutting down (press again to force)");

        std::thread::spawn(|| {
            std::thread::sleep(std::time::Duration::from_secs(5));
            eprintln!("Graceful shutdown timed out, forcing exit");
            std::process::exit(1);
        });
    })
    .context("Failed to set Ctrl+C handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("relay-worker")
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(args: Args, shutdown_flag: Arc<AtomicBool>) -> anyhow::Result<()> {
    init_tracing(args.log_format);

    let config = args.into_config();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        signaling_url = %config.signaling_url(),
        media_addr = %config.media_bind_addr,
        remote_id = %config.remote_id,
        ssrc = config.ssrc,
        "Media sender starting"
    );

    let relay = MediaRelay::with_webrtc(config)?;
    let running = match relay.start().await {
        Ok(running) => running,
        Err(e) => {
            error!(retryable = e.is_retryable(), "Startup failed: {}", e);
            return Err(e.into());
        }
    };

    info!(
        "Relaying RTP from {} to peer '{}'. Press Ctrl+C to stop.",
        running.media_addr(),
        running.bridge().remote_id()
    );

    while !shutdown_flag.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }

    info!("Shutdown signal received, cleaning up...");
    running.shutdown().await?;
    info!("Media sender shut down gracefully");

    Ok(())
}

fn init_tracing(format: LogFormat) {
    // RUST_LOG wins; default to info
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}
