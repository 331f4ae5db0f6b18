//! webrtc-rs implementation of the session engine

use super::{
    EventSink, GatheringState, MediaSession, MediaTrack, SessionEngine, SessionEventKind,
    SessionId, SessionState,
};
use crate::config::TrackSpec;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{debug, info, instrument, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};

/// Session engine backed by webrtc-rs peer connections
#[derive(Debug, Clone, Default)]
pub struct WebRtcEngine {
    stun_servers: Vec<String>,
}

impl WebRtcEngine {
    pub fn new(stun_servers: Vec<String>) -> Self {
        Self { stun_servers }
    }

    fn rtc_config(&self) -> RTCConfiguration {
        let ice_servers = if self.stun_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.stun_servers.clone(),
                ..Default::default()
            }]
        };

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl SessionEngine for WebRtcEngine {
    #[instrument(skip(self, events), fields(session_id = %id))]
    async fn create_session(
        &self,
        id: SessionId,
        events: EventSink,
    ) -> Result<Arc<dyn MediaSession>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let peer_connection =
            Arc::new(api.new_peer_connection(self.rtc_config()).await.map_err(|e| {
                Error::WebRtcError(format!("Failed to create peer connection: {}", e))
            })?);

        let session = WebRtcSession::new(id, peer_connection, events);
        session.register_handlers();

        debug!("Created peer connection for session {}", id);
        Ok(Arc::new(session))
    }
}

/// State shared between a session, its track and the engine callbacks
#[derive(Debug)]
struct SessionLink {
    state: Mutex<SessionState>,
    track_open: AtomicBool,
    closed: AtomicBool,
}

impl SessionLink {
    fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::New),
            track_open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Returns the previous state
    fn set_state(&self, next: SessionState) -> SessionState {
        std::mem::replace(&mut *self.state.lock(), next)
    }
}

/// One webrtc-rs peer connection with a single send-only video line
pub struct WebRtcSession {
    id: SessionId,
    peer_connection: Arc<RTCPeerConnection>,
    events: EventSink,
    link: Arc<SessionLink>,
    gathering_reported: Arc<AtomicBool>,
    closed_tx: watch::Sender<bool>,
}

impl WebRtcSession {
    fn new(id: SessionId, peer_connection: Arc<RTCPeerConnection>, events: EventSink) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            id,
            peer_connection,
            events,
            link: Arc::new(SessionLink::new()),
            gathering_reported: Arc::new(AtomicBool::new(false)),
            closed_tx,
        }
    }

    fn register_handlers(&self) {
        let link = Arc::clone(&self.link);
        let events = self.events.clone();
        let id = self.id;

        self.peer_connection
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let link = Arc::clone(&link);
                let events = events.clone();

                Box::pin(async move {
                    let next = match s {
                        RTCPeerConnectionState::New => SessionState::New,
                        RTCPeerConnectionState::Connecting => SessionState::Connecting,
                        RTCPeerConnectionState::Connected => SessionState::Connected,
                        RTCPeerConnectionState::Disconnected => SessionState::Disconnected,
                        RTCPeerConnectionState::Failed => SessionState::Failed,
                        RTCPeerConnectionState::Closed => SessionState::Closed,
                        _ => return,
                    };

                    let previous = link.set_state(next);
                    if previous == next {
                        return;
                    }

                    info!("Session {} state: {:?} -> {:?}", id, previous, next);
                    events.emit(SessionEventKind::StateChanged(next)).await;

                    if next == SessionState::Connected
                        && !link.closed.load(Ordering::Acquire)
                        && !link.track_open.swap(true, Ordering::AcqRel)
                    {
                        events.emit(SessionEventKind::TrackOpen).await;
                    }
                })
            }));

        let events = self.events.clone();
        self.peer_connection
            .on_ice_gathering_state_change(Box::new(move |s: RTCIceGathererState| {
                let events = events.clone();

                Box::pin(async move {
                    let next = match s {
                        RTCIceGathererState::New => GatheringState::New,
                        RTCIceGathererState::Gathering => GatheringState::Gathering,
                        RTCIceGathererState::Complete => GatheringState::Complete,
                        _ => return,
                    };

                    debug!("Session {} gathering state: {:?}", id, next);
                    events
                        .emit(SessionEventKind::GatheringStateChanged(next))
                        .await;
                })
            }));
    }

    /// Report the full local description once gathering completes
    ///
    /// Runs on its own task so it never blocks the engine's callback context,
    /// and stops early if the session is closed first.
    fn spawn_gathering_watch(&self, mut done_rx: tokio::sync::mpsc::Receiver<()>) {
        let peer_connection: Weak<RTCPeerConnection> = Arc::downgrade(&self.peer_connection);
        let events = self.events.clone();
        let reported = Arc::clone(&self.gathering_reported);
        let mut closed_rx = self.closed_tx.subscribe();
        let id = self.id;

        tokio::spawn(async move {
            tokio::select! {
                _ = done_rx.recv() => {}
                _ = closed_rx.changed() => {
                    debug!("Session {} closed before gathering completed", id);
                    return;
                }
            }

            let Some(peer_connection) = peer_connection.upgrade() else {
                return;
            };

            let Some(description) = peer_connection.local_description().await else {
                warn!("Session {} finished gathering without a local description", id);
                return;
            };

            if reported.swap(true, Ordering::AcqRel) {
                return;
            }

            info!("Session {} local description ready", id);
            events
                .emit(SessionEventKind::GatheringComplete {
                    sdp: description.sdp,
                })
                .await;
        });
    }
}

#[async_trait]
impl MediaSession for WebRtcSession {
    fn id(&self) -> SessionId {
        self.id
    }

    async fn add_track(&self, spec: &TrackSpec) -> Result<Arc<dyn MediaTrack>> {
        info!(
            codec = spec.codec.mime_type(),
            payload_type = spec.payload_type,
            ssrc = spec.ssrc,
            "Adding send-only video track to session {}",
            self.id
        );

        // spec.ssrc is not applied: the track rewrites every packet to the
        // sender's negotiated SSRC and payload type
        let track = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: spec.codec.mime_type().to_string(),
                clock_rate: spec.codec.clock_rate(),
                channels: 0,
                sdp_fmtp_line: spec.codec.sdp_fmtp_line().to_string(),
                rtcp_feedback: vec![],
            },
            spec.cname.clone(),
            format!("stream-{}", spec.cname),
        ));

        let transceiver = self
            .peer_connection
            .add_transceiver_from_track(
                Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to add video track: {}", e)))?;

        // Drain RTCP so the interceptors keep running
        let sender = transceiver.sender().await;
        let id = self.id;
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while let Ok((_, _)) = sender.read(&mut rtcp_buf).await {}
            trace!("RTCP reader for session {} finished", id);
        });

        Ok(Arc::new(WebRtcTrack {
            track,
            link: Arc::clone(&self.link),
        }))
    }

    async fn start_negotiation(&self) -> Result<()> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;

        let done_rx = self.peer_connection.gathering_complete_promise().await;

        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        self.spawn_gathering_watch(done_rx);

        debug!("Session {} started local negotiation", self.id);
        Ok(())
    }

    async fn local_description(&self) -> Option<String> {
        self.peer_connection
            .local_description()
            .await
            .map(|description| description.sdp)
    }

    async fn set_remote_answer(&self, sdp: String) -> Result<()> {
        if self.link.closed.load(Ordering::Acquire) {
            return Err(Error::SessionError(format!("session {} is closed", self.id)));
        }

        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| Error::SdpError(format!("Failed to parse answer: {}", e)))?;

        self.peer_connection
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))?;

        debug!("Session {} applied remote answer", self.id);
        Ok(())
    }

    fn state(&self) -> SessionState {
        self.link.state()
    }

    async fn close(&self) -> Result<()> {
        if self.link.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        info!("Closing session {}", self.id);
        self.closed_tx.send_replace(true);
        self.link.set_state(SessionState::Closed);

        self.peer_connection.close().await.map_err(|e| {
            Error::WebRtcError(format!("Failed to close peer connection: {}", e))
        })
    }
}

/// Send-only RTP track of a [`WebRtcSession`]
///
/// The track opens when its session first connects and stays open until the
/// session is closed. Sends fail once the connection has failed or closed.
pub struct WebRtcTrack {
    track: Arc<TrackLocalStaticRTP>,
    link: Arc<SessionLink>,
}

#[async_trait]
impl MediaTrack for WebRtcTrack {
    fn is_open(&self) -> bool {
        self.link.track_open.load(Ordering::Acquire) && !self.link.closed.load(Ordering::Acquire)
    }

    async fn send(&self, packet: &[u8]) -> Result<()> {
        if self.link.closed.load(Ordering::Acquire) {
            return Err(Error::MediaTrackError("track is closed".to_string()));
        }

        match self.link.state() {
            SessionState::Failed | SessionState::Closed => {
                return Err(Error::MediaTrackError(format!(
                    "session transport is {:?}",
                    self.link.state()
                )));
            }
            _ => {}
        }

        self.track
            .write(packet)
            .await
            .map(|_| ())
            .map_err(|e| Error::MediaTrackError(format!("Failed to write RTP packet: {}", e)))
    }
}
