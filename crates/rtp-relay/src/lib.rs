//! RTP-to-WebRTC relay
//!
//! Relays an RTP video stream arriving on a local UDP port to a single
//! WebRTC peer, negotiating through a WebSocket signaling server. The relay
//! keeps exactly one session alive and replaces it whenever it dies: when
//! the track rejects a packet, or when the upstream producer goes quiet.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  RTP producer (UDP)            Browser (WebSocket + RTC) │
//! │      ↓                              ↑        ↑           │
//! │  PacketSource ──► SessionSlot ──► track     SignalingClient
//! │      │  stamp SSRC   │ (one current pair)     │          │
//! │      │               ▲                        ▼          │
//! │      │ send failure  │ install         SignalingBridge   │
//! │      └──────► SessionFactory ◄── Watchdog (idle media)   │
//! │                      │                        ▲          │
//! │                      ▼                        │ offer    │
//! │               SessionEngine ──events──► SessionEventLoop │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use rtp_relay::{MediaRelay, RelayConfig};
//!
//! let config = RelayConfig {
//!     signaling_host: "127.0.0.1".to_string(),
//!     signaling_port: 8000,
//!     ..Default::default()
//! };
//!
//! let running = MediaRelay::with_webrtc(config)?.start().await?;
//! println!("Send RTP to {}", running.media_addr());
//!
//! tokio::signal::ctrl_c().await?;
//! running.shutdown().await?;
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod ingest;
pub mod relay;
pub mod rtp;
pub mod session;
pub mod shutdown;
pub mod signaling;
pub mod state;
pub mod watchdog;

#[cfg(test)]
mod test_support;

pub use config::{RelayConfig, TrackSpec, VideoCodec};
pub use error::{Error, Result};
pub use ingest::{PacketRelay, PacketSource, RelayOutcome};
pub use relay::{MediaRelay, RunningRelay, SessionEventLoop};
pub use session::{
    ActiveSession, EventSink, MediaSession, MediaTrack, RebuildReason, SessionEngine,
    SessionEvent, SessionEventKind, SessionFactory, SessionId, SessionSlot, SessionState,
    WebRtcEngine,
};
pub use signaling::{ChannelState, Dispatch, SignalingBridge, SignalingClient};
pub use state::{Liveness, RelayState};
pub use watchdog::{Watchdog, WatchdogTick};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
    }
}
