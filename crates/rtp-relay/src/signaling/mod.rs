//! Signaling channel: wire protocol, bridge and WebSocket client
//!
//! The bridge holds all signaling-side behavior (offer replay, answer
//! dispatch, channel state) and is driven by whatever transport feeds it.
//! [`SignalingClient`] is the WebSocket transport used in production.

pub mod bridge;
pub mod client;
pub mod protocol;

pub use bridge::{Dispatch, SignalingBridge};
pub use client::SignalingClient;
pub use protocol::{IgnoreReason, InboundMessage, OutboundMessage};

/// Channel-level state, independent of any session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Not connected yet
    Disconnected,
    /// Connect in progress
    Connecting,
    /// Messages can be exchanged
    Open,
    /// Closed by either side or failed
    Closed,
}
