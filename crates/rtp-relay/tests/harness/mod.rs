//! Relay test harness
//!
//! Provides:
//! - `ScriptedEngine`: an in-process session engine whose sessions record
//!   sent packets, applied answers and closes, and let the test fire engine
//!   events (gathering complete, track open) on demand
//! - `RelayFixture`: the relay components wired together exactly as
//!   `MediaRelay` wires them, with the outbound signaling queue captured
//! - RTP packet builders and logging setup

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use rtp_relay::{
    EventSink, MediaSession, MediaTrack, RelayConfig, RelayState, SessionEngine,
    SessionEventKind, SessionEventLoop, SessionFactory, SessionId, SessionSlot, SessionState,
    SignalingBridge, TrackSpec,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use rtp_relay::shutdown::Shutdown;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Initialize test logging (safe to call from every test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,rtp_relay=debug")
        .with_test_writer()
        .try_init();
}

/// Build an RTP packet with the given SSRC and sequence number
pub fn rtp_packet(ssrc: u32, seq: u16, payload: &[u8]) -> Vec<u8> {
    let mut packet = vec![0x80, 96];
    packet.extend_from_slice(&seq.to_be_bytes());
    packet.extend_from_slice(&(seq as u32 * 3000).to_be_bytes());
    packet.extend_from_slice(&ssrc.to_be_bytes());
    packet.extend_from_slice(payload);
    packet
}

/// Read the SSRC field of a packet
pub fn ssrc_of(packet: &[u8]) -> u32 {
    u32::from_be_bytes([packet[8], packet[9], packet[10], packet[11]])
}

/// Track that records what it is given
#[derive(Default)]
pub struct ScriptedTrack {
    open: AtomicBool,
    fail: AtomicBool,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl ScriptedTrack {
    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    /// Reject every following send, as a dead transport would
    pub fn fail_sends(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl MediaTrack for ScriptedTrack {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, packet: &[u8]) -> rtp_relay::Result<()> {
        if self.fail.load(Ordering::SeqCst) || !self.is_open() {
            return Err(rtp_relay::Error::MediaTrackError(
                "transport closed".to_string(),
            ));
        }
        self.sent.lock().push(packet.to_vec());
        Ok(())
    }
}

/// Session driven entirely by the test
pub struct ScriptedSession {
    id: SessionId,
    events: EventSink,
    track: Arc<ScriptedTrack>,
    answers: Mutex<Vec<String>>,
    track_spec: Mutex<Option<TrackSpec>>,
    negotiating: AtomicBool,
    closed: AtomicBool,
    early_gathering: bool,
}

impl ScriptedSession {
    fn new(id: SessionId, events: EventSink, open_track: bool, early_gathering: bool) -> Self {
        let track = Arc::new(ScriptedTrack::default());
        track.set_open(open_track);
        Self {
            id,
            events,
            track,
            answers: Mutex::new(Vec::new()),
            track_spec: Mutex::new(None),
            negotiating: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            early_gathering,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Local description this session reports
    pub fn local_sdp(&self) -> String {
        format!("v=0\r\no=- {} 0 IN IP4 127.0.0.1\r\n", self.id.0)
    }

    /// Report gathering completion, carrying the local description
    pub async fn complete_gathering(&self) {
        self.events
            .emit(SessionEventKind::GatheringComplete {
                sdp: self.local_sdp(),
            })
            .await;
    }

    /// Connect the session and open its track
    pub async fn connect(&self) {
        self.track.set_open(true);
        self.events
            .emit(SessionEventKind::StateChanged(SessionState::Connected))
            .await;
        self.events.emit(SessionEventKind::TrackOpen).await;
    }

    pub fn track(&self) -> Arc<ScriptedTrack> {
        Arc::clone(&self.track)
    }

    pub fn answers(&self) -> Vec<String> {
        self.answers.lock().clone()
    }

    pub fn track_spec(&self) -> Option<TrackSpec> {
        self.track_spec.lock().clone()
    }

    pub fn is_negotiating(&self) -> bool {
        self.negotiating.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSession for ScriptedSession {
    fn id(&self) -> SessionId {
        self.id
    }

    async fn add_track(&self, spec: &TrackSpec) -> rtp_relay::Result<Arc<dyn MediaTrack>> {
        *self.track_spec.lock() = Some(spec.clone());
        Ok(self.track())
    }

    async fn start_negotiation(&self) -> rtp_relay::Result<()> {
        self.negotiating.store(true, Ordering::SeqCst);
        if self.early_gathering {
            // Gathering finishes while the factory is still building
            self.complete_gathering().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(())
    }

    async fn local_description(&self) -> Option<String> {
        self.is_negotiating().then(|| self.local_sdp())
    }

    async fn set_remote_answer(&self, sdp: String) -> rtp_relay::Result<()> {
        if self.is_closed() {
            return Err(rtp_relay::Error::SdpError("session closed".to_string()));
        }
        self.answers.lock().push(sdp);
        Ok(())
    }

    fn state(&self) -> SessionState {
        if self.is_closed() {
            SessionState::Closed
        } else if self.track.is_open() {
            SessionState::Connected
        } else {
            SessionState::New
        }
    }

    async fn close(&self) -> rtp_relay::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.track.set_open(false);
        Ok(())
    }
}

/// Session engine handing out [`ScriptedSession`]s
#[derive(Default)]
pub struct ScriptedEngine {
    sessions: Mutex<Vec<Arc<ScriptedSession>>>,
    open_tracks: AtomicBool,
    early_gathering: AtomicBool,
    fail_next: AtomicBool,
    build_delay_ms: AtomicU64,
}

impl ScriptedEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Tracks start out open, as if the peer connected instantly
    pub fn with_open_tracks() -> Arc<Self> {
        let engine = Self::default();
        engine.open_tracks.store(true, Ordering::SeqCst);
        Arc::new(engine)
    }

    /// Sessions report gathering complete from inside `start_negotiation`
    pub fn gather_during_negotiation(&self) {
        self.early_gathering.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_build(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Make every session construction take this long
    pub fn set_build_delay(&self, delay: Duration) {
        self.build_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn sessions(&self) -> Vec<Arc<ScriptedSession>> {
        self.sessions.lock().clone()
    }

    pub fn session(&self, id: u64) -> Arc<ScriptedSession> {
        self.sessions
            .lock()
            .iter()
            .find(|s| s.id == SessionId(id))
            .cloned()
            .unwrap_or_else(|| panic!("no session #{}", id))
    }

    pub fn latest(&self) -> Arc<ScriptedSession> {
        self.sessions.lock().last().cloned().expect("no session built")
    }

    pub fn created(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Sessions that have not been closed
    pub fn live_sessions(&self) -> Vec<SessionId> {
        self.sessions
            .lock()
            .iter()
            .filter(|s| !s.is_closed())
            .map(|s| s.id)
            .collect()
    }
}

#[async_trait]
impl SessionEngine for ScriptedEngine {
    async fn create_session(
        &self,
        id: SessionId,
        events: EventSink,
    ) -> rtp_relay::Result<Arc<dyn MediaSession>> {
        let delay = self.build_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(rtp_relay::Error::WebRtcError(
                "scripted build failure".to_string(),
            ));
        }

        let session = Arc::new(ScriptedSession::new(
            id,
            events,
            self.open_tracks.load(Ordering::SeqCst),
            self.early_gathering.load(Ordering::SeqCst),
        ));
        self.sessions.lock().push(Arc::clone(&session));
        Ok(session)
    }
}

/// Relay components wired like `MediaRelay`, minus the network transports
pub struct RelayFixture {
    pub config: RelayConfig,
    pub engine: Arc<ScriptedEngine>,
    pub state: Arc<RelayState>,
    pub slot: Arc<SessionSlot>,
    pub factory: Arc<SessionFactory>,
    pub bridge: Arc<SignalingBridge>,
    events: Option<SessionEventLoop>,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl RelayFixture {
    pub fn new(engine: Arc<ScriptedEngine>) -> Self {
        let config = RelayConfig::default();
        let state = Arc::new(RelayState::new());
        let slot = Arc::new(SessionSlot::new());
        let (events_tx, events_rx) = mpsc::channel(config.event_queue_capacity);
        let (outbound_tx, outbound) = mpsc::unbounded_channel();

        let factory = Arc::new(SessionFactory::new(
            engine.clone(),
            Arc::clone(&slot),
            Arc::clone(&state),
            config.track_spec(),
            events_tx,
        ));
        let bridge = Arc::new(SignalingBridge::new(
            config.remote_id.clone(),
            Arc::clone(&state),
            Arc::clone(&slot),
            outbound_tx,
        ));
        let events = SessionEventLoop::new(events_rx, Arc::clone(&slot), Arc::clone(&bridge));

        Self {
            config,
            engine,
            state,
            slot,
            factory,
            bridge,
            events: Some(events),
            outbound,
        }
    }

    /// Apply queued session events; does nothing once the loop is spawned
    pub fn pump_events(&mut self) -> usize {
        self.events
            .as_mut()
            .map(SessionEventLoop::handle_pending)
            .unwrap_or_default()
    }

    /// Run the session event loop on its own task, as `MediaRelay` does
    pub fn spawn_event_loop(&mut self, shutdown: Shutdown) -> JoinHandle<()> {
        let events = self.events.take().expect("event loop already spawned");
        tokio::spawn(events.run(shutdown))
    }

    /// Outbound signaling frames sent since the last call
    pub fn take_outbound(&mut self) -> Vec<serde_json::Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            frames.push(serde_json::from_str(&frame).expect("outbound frame is JSON"));
        }
        frames
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    true
}
