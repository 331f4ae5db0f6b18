//! Configuration types for the RTP relay

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::rtp::RTP_HEADER_SIZE;

/// Main configuration for the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Signaling server host
    pub signaling_host: String,

    /// Signaling server port
    pub signaling_port: u16,

    /// Local identifier, used as the signaling URL path segment
    pub local_id: String,

    /// Remote peer identifier that offers are addressed to
    pub remote_id: String,

    /// Local UDP endpoint the upstream RTP producer sends to
    pub media_bind_addr: SocketAddr,

    /// SO_RCVBUF for the ingress socket in bytes (default: 212992)
    pub recv_buffer_size: usize,

    /// Largest datagram accepted from the producer (default: 2048)
    pub max_datagram_size: usize,

    /// Synchronization source stamped into every relayed packet (default: 42)
    pub ssrc: u32,

    /// Video codec of the upstream stream (default: H264)
    pub codec: VideoCodec,

    /// RTP payload type of the upstream stream (default: 96)
    pub payload_type: u8,

    /// CNAME advertised for the outgoing track (default: "video-send")
    pub track_cname: String,

    /// STUN server URLs (default: none, host candidates only)
    pub stun_servers: Vec<String>,

    /// Media gap after which the session is rebuilt (default: 2000ms)
    pub idle_threshold_ms: u64,

    /// Watchdog polling interval (default: 200ms)
    pub watchdog_interval_ms: u64,

    /// Pause after a non-interrupt receive error (default: 200ms)
    pub recv_error_backoff_ms: u64,

    /// Poll interval while waiting for the signaling channel (default: 100ms)
    pub signaling_poll_interval_ms: u64,

    /// Give up on the signaling channel after this long (default: 10000ms)
    pub signaling_connect_timeout_ms: u64,

    /// Capacity of the session event queue (default: 64)
    pub event_queue_capacity: usize,
}

/// Supported video codecs for the outgoing media line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoCodec {
    /// H.264, packetization mode 1 (default)
    H264,
    /// VP8
    VP8,
}

impl VideoCodec {
    /// MIME type used in the SDP media line
    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "video/H264",
            VideoCodec::VP8 => "video/VP8",
        }
    }

    /// RTP clock rate
    pub fn clock_rate(&self) -> u32 {
        90000
    }

    /// fmtp line advertised for the codec
    pub fn sdp_fmtp_line(&self) -> &'static str {
        match self {
            VideoCodec::H264 => {
                "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
            }
            VideoCodec::VP8 => "",
        }
    }
}

impl std::str::FromStr for VideoCodec {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "h264" => Ok(VideoCodec::H264),
            "vp8" => Ok(VideoCodec::VP8),
            other => Err(crate::Error::InvalidConfig(format!(
                "unsupported codec '{}', expected h264 or vp8",
                other
            ))),
        }
    }
}

/// Description of the single outgoing media line of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSpec {
    /// Codec carried on the line
    pub codec: VideoCodec,
    /// Payload type bound to the codec
    pub payload_type: u8,
    /// Synchronization source stamped on every relayed packet
    ///
    /// [`WebRtcEngine`](crate::session::WebRtcEngine) does not honor it on
    /// the wire: `TrackLocalStaticRTP` rewrites the SSRC to the one it
    /// negotiated for the sender and announces that one in the SDP.
    pub ssrc: u32,
    /// Track CNAME / msid label
    pub cname: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            signaling_host: "127.0.0.1".to_string(),
            signaling_port: 8000,
            local_id: "sender".to_string(),
            remote_id: "browser".to_string(),
            media_bind_addr: SocketAddr::from(([127, 0, 0, 1], 6000)),
            recv_buffer_size: 212_992,
            max_datagram_size: 2048,
            ssrc: 42,
            codec: VideoCodec::H264,
            payload_type: 96,
            track_cname: "video-send".to_string(),
            stun_servers: Vec::new(),
            idle_threshold_ms: 2000,
            watchdog_interval_ms: 200,
            recv_error_backoff_ms: 200,
            signaling_poll_interval_ms: 100,
            signaling_connect_timeout_ms: 10_000,
            event_queue_capacity: 64,
        }
    }
}

impl RelayConfig {
    /// WebSocket URL of the signaling rendezvous: `ws://host:port/local_id`
    pub fn signaling_url(&self) -> String {
        format!(
            "ws://{}:{}/{}",
            self.signaling_host, self.signaling_port, self.local_id
        )
    }

    /// Outgoing media line derived from this configuration
    pub fn track_spec(&self) -> TrackSpec {
        TrackSpec {
            codec: self.codec,
            payload_type: self.payload_type,
            ssrc: self.ssrc,
            cname: self.track_cname.clone(),
        }
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_millis(self.idle_threshold_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub fn recv_error_backoff(&self) -> Duration {
        Duration::from_millis(self.recv_error_backoff_ms)
    }

    pub fn signaling_poll_interval(&self) -> Duration {
        Duration::from_millis(self.signaling_poll_interval_ms)
    }

    pub fn signaling_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.signaling_connect_timeout_ms)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `local_id` or `remote_id` is empty
    /// - `signaling_port` is 0
    /// - `payload_type` is outside the dynamic range 96-127
    /// - `max_datagram_size` cannot hold an RTP header
    /// - `watchdog_interval_ms` is 0 or not below `idle_threshold_ms`
    /// - a STUN URL lacks the `stun:`/`stuns:` scheme
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.local_id.is_empty() {
            return Err(Error::InvalidConfig("local_id must not be empty".to_string()));
        }

        if self.remote_id.is_empty() {
            return Err(Error::InvalidConfig("remote_id must not be empty".to_string()));
        }

        if self.signaling_port == 0 {
            return Err(Error::InvalidConfig(
                "signaling_port must be non-zero".to_string(),
            ));
        }

        if !(96..=127).contains(&self.payload_type) {
            return Err(Error::InvalidConfig(format!(
                "payload_type must be in range 96-127, got {}",
                self.payload_type
            )));
        }

        if self.max_datagram_size < RTP_HEADER_SIZE {
            return Err(Error::InvalidConfig(format!(
                "max_datagram_size must be at least {} bytes, got {}",
                RTP_HEADER_SIZE, self.max_datagram_size
            )));
        }

        if self.watchdog_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "watchdog_interval_ms must be non-zero".to_string(),
            ));
        }

        if self.idle_threshold_ms <= self.watchdog_interval_ms {
            return Err(Error::InvalidConfig(format!(
                "idle_threshold_ms ({}) must exceed watchdog_interval_ms ({})",
                self.idle_threshold_ms, self.watchdog_interval_ms
            )));
        }

        if self.event_queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "event_queue_capacity must be non-zero".to_string(),
            ));
        }

        if let Some(bad) = self
            .stun_servers
            .iter()
            .find(|url| !url.starts_with("stun:") && !url.starts_with("stuns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "stun server must start with stun: or stuns:, got {}",
                bad
            )));
        }

        Ok(())
    }
}
