//! Session management: engine boundary, current-session slot and factory
//!
//! The relay never talks to a peer connection directly. It goes through the
//! [`SessionEngine`] / [`MediaSession`] / [`MediaTrack`] traits, so the
//! orchestration logic is the same for webrtc-rs and for scripted engines in
//! tests. Engine notifications arrive as [`SessionEvent`]s on a bounded queue
//! instead of callbacks into relay state.

pub mod factory;
pub mod peer;
pub mod slot;

pub use factory::{RebuildReason, SessionFactory};
pub use slot::{ActiveSession, SessionSlot};
pub use peer::WebRtcEngine;

use crate::config::TrackSpec;
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Identifier of one built session, increasing with every rebuild
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Connection state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, negotiation not started
    New,
    /// ICE/DTLS in progress
    Connecting,
    /// Media can flow
    Connected,
    /// Connectivity lost, may recover
    Disconnected,
    /// Connection failed
    Failed,
    /// Closed locally or remotely
    Closed,
}

/// Local candidate gathering state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatheringState {
    New,
    Gathering,
    Complete,
}

/// Notification raised by a session engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    /// Session that raised the event
    pub session_id: SessionId,
    /// What happened
    pub kind: SessionEventKind,
}

/// Kinds of engine notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEventKind {
    /// Connection state changed
    StateChanged(SessionState),
    /// Gathering state changed
    GatheringStateChanged(GatheringState),
    /// Gathering finished; carries the complete local description.
    /// Raised at most once per session.
    GatheringComplete { sdp: String },
    /// The outgoing track became sendable
    TrackOpen,
}

/// Per-session handle on the event queue
///
/// Engines get one of these per session so every event is tagged with the
/// right [`SessionId`].
#[derive(Debug, Clone)]
pub struct EventSink {
    session_id: SessionId,
    tx: mpsc::Sender<SessionEvent>,
}

impl EventSink {
    pub fn new(session_id: SessionId, tx: mpsc::Sender<SessionEvent>) -> Self {
        Self { session_id, tx }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Queue an event; waits only for queue capacity
    pub async fn emit(&self, kind: SessionEventKind) {
        let event = SessionEvent {
            session_id: self.session_id,
            kind,
        };

        if self.tx.send(event).await.is_err() {
            debug!(session_id = %self.session_id, "Session event dropped, relay is shutting down");
        }
    }
}

/// Factory for sessions (the transport-session engine)
#[async_trait]
pub trait SessionEngine: Send + Sync {
    /// Construct a new, unnegotiated session that reports through `events`
    async fn create_session(
        &self,
        id: SessionId,
        events: EventSink,
    ) -> Result<Arc<dyn MediaSession>>;
}

/// One negotiated transport connection to the remote peer
#[async_trait]
pub trait MediaSession: Send + Sync {
    fn id(&self) -> SessionId;

    /// Add the single outgoing media line
    async fn add_track(&self, spec: &TrackSpec) -> Result<Arc<dyn MediaTrack>>;

    /// Create the local offer and start gathering
    async fn start_negotiation(&self) -> Result<()>;

    /// Current local description, if negotiation has started
    async fn local_description(&self) -> Option<String>;

    /// Apply the remote peer's answer
    async fn set_remote_answer(&self, sdp: String) -> Result<()>;

    fn state(&self) -> SessionState;

    async fn close(&self) -> Result<()>;
}

/// Outgoing media line of a session
#[async_trait]
pub trait MediaTrack: Send + Sync {
    /// Whether packets can currently be sent
    fn is_open(&self) -> bool;

    /// Send one raw RTP packet
    async fn send(&self, packet: &[u8]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_sink_tags_session() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = EventSink::new(SessionId(7), tx);

        sink.emit(SessionEventKind::TrackOpen).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.session_id, SessionId(7));
        assert_eq!(event.kind, SessionEventKind::TrackOpen);
    }

    #[tokio::test]
    async fn test_event_sink_tolerates_closed_queue() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = EventSink::new(SessionId(1), tx);
        sink.emit(SessionEventKind::StateChanged(SessionState::Closed))
            .await;
    }

    #[test]
    fn test_session_id_display() {
        assert_eq!(SessionId(3).to_string(), "#3");
    }
}
