//! Signaling-side behavior of the relay

use super::protocol::{parse_inbound, IgnoreReason, InboundMessage, OutboundMessage};
use super::ChannelState;
use crate::session::{SessionId, SessionSlot};
use crate::state::RelayState;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

/// What an inbound message resulted in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Dropped without side effects
    Ignored(IgnoreReason),
    /// Answer applied to this session
    AnswerApplied(SessionId),
    /// The session rejected the answer
    AnswerFailed(SessionId),
    /// Answer arrived while no session was installed
    NoSession,
    /// Pending offer sent again
    OfferResent,
    /// Replay asked for, but no offer or channel closed
    NothingToResend,
}

/// Connects the signaling channel to relay state
///
/// Inbound frames go through [`handle_text`](Self::handle_text); outbound
/// frames are pushed as serialized JSON onto the transport's queue.
pub struct SignalingBridge {
    remote_id: String,
    state: Arc<RelayState>,
    slot: Arc<SessionSlot>,
    outbound: mpsc::UnboundedSender<String>,
    channel_state: watch::Sender<ChannelState>,
}

impl SignalingBridge {
    pub fn new(
        remote_id: impl Into<String>,
        state: Arc<RelayState>,
        slot: Arc<SessionSlot>,
        outbound: mpsc::UnboundedSender<String>,
    ) -> Self {
        let (channel_state, _) = watch::channel(ChannelState::Disconnected);

        Self {
            remote_id: remote_id.into(),
            state,
            slot,
            outbound,
            channel_state,
        }
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn channel_state(&self) -> ChannelState {
        *self.channel_state.borrow()
    }

    /// Watch channel state transitions
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.channel_state.subscribe()
    }

    pub fn on_connecting(&self) {
        self.transition(ChannelState::Connecting);
    }

    /// The channel opened. A pending offer is not re-sent until asked for.
    pub fn on_open(&self) {
        self.state.set_channel_open(true);
        self.transition(ChannelState::Open);
    }

    pub fn on_closed(&self) {
        self.state.set_channel_open(false);
        self.transition(ChannelState::Closed);
    }

    pub fn on_error(&self, error: &str) {
        warn!("Signaling channel error: {}", error);
        self.on_closed();
    }

    fn transition(&self, next: ChannelState) {
        let previous = self.channel_state.send_replace(next);
        if previous != next {
            info!("Signaling channel: {:?} -> {:?}", previous, next);
        }
    }

    /// Handle one inbound text frame
    ///
    /// # Example
    ///
    /// ```
    /// # use rtp_relay::{Dispatch, RelayState, SessionSlot, SignalingBridge};
    /// # use std::sync::Arc;
    /// # tokio_test::block_on(async {
    /// let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    /// let state = Arc::new(RelayState::new());
    /// let bridge = SignalingBridge::new("browser", state.clone(), Arc::new(SessionSlot::new()), tx);
    ///
    /// bridge.on_open();
    /// state.set_pending_offer("v=0".to_string());
    ///
    /// let dispatch = bridge.handle_text(r#"{"type":"ready"}"#).await;
    /// assert_eq!(dispatch, Dispatch::OfferResent);
    /// assert!(rx.try_recv().unwrap().contains(r#""type":"offer""#));
    /// # });
    /// ```
    pub async fn handle_text(&self, text: &str) -> Dispatch {
        trace!("Received signaling message: {}", text);

        let message = match parse_inbound(text) {
            Ok(message) => message,
            Err(reason) => {
                debug!("Ignoring signaling message: {}", reason);
                return Dispatch::Ignored(reason);
            }
        };

        match message {
            InboundMessage::Answer { sdp } => self.apply_answer(sdp).await,
            InboundMessage::Request | InboundMessage::Ready => {
                if self.send_pending_offer() {
                    Dispatch::OfferResent
                } else {
                    debug!("Offer replay requested but nothing to send");
                    Dispatch::NothingToResend
                }
            }
        }
    }

    // No correlation with the offer that produced the answer: it goes to
    // whichever session is current right now.
    async fn apply_answer(&self, sdp: String) -> Dispatch {
        let Some(session) = self.slot.current_session() else {
            warn!("Received answer but no session is installed");
            return Dispatch::NoSession;
        };

        let id = session.id();
        match session.set_remote_answer(sdp).await {
            Ok(()) => {
                info!("Applied remote answer to session {}", id);
                Dispatch::AnswerApplied(id)
            }
            Err(e) => {
                warn!("Failed to apply answer to session {}: {}", id, e);
                Dispatch::AnswerFailed(id)
            }
        }
    }

    /// Store a freshly gathered offer and send it if the channel is open
    pub fn publish_offer(&self, sdp: String) -> bool {
        self.state.set_pending_offer(sdp);
        self.send_pending_offer()
    }

    /// Send the pending offer; returns whether anything was sent
    pub fn send_pending_offer(&self) -> bool {
        if !self.state.is_channel_open() {
            return false;
        }

        let Some(sdp) = self.state.pending_offer() else {
            return false;
        };

        let frame = match OutboundMessage::offer(self.remote_id.as_str(), sdp).to_json() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode offer: {}", e);
                return false;
            }
        };

        if self.outbound.send(frame).is_err() {
            warn!("Signaling sender is gone, offer not sent");
            return false;
        }

        info!(remote_id = %self.remote_id, "Sent offer");
        true
    }
}
