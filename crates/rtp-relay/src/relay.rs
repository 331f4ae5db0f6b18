//! Relay orchestrator: wiring, startup, session events and shutdown

use crate::config::RelayConfig;
use crate::ingest::{bind_udp, PacketRelay, PacketSource};
use crate::session::{
    RebuildReason, SessionEngine, SessionEvent, SessionEventKind, SessionFactory, SessionSlot,
    WebRtcEngine,
};
use crate::shutdown::{self, Shutdown, ShutdownTrigger};
use crate::signaling::{ChannelState, SignalingBridge, SignalingClient};
use crate::state::RelayState;
use crate::watchdog::Watchdog;
use crate::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Consumes engine notifications and applies them to relay state
///
/// Engines never touch relay state from their own callback context; this
/// loop is the only place session events take effect.
pub struct SessionEventLoop {
    rx: mpsc::Receiver<SessionEvent>,
    slot: Arc<SessionSlot>,
    bridge: Arc<SignalingBridge>,
}

impl SessionEventLoop {
    pub fn new(
        rx: mpsc::Receiver<SessionEvent>,
        slot: Arc<SessionSlot>,
        bridge: Arc<SignalingBridge>,
    ) -> Self {
        Self { rx, slot, bridge }
    }

    /// Apply one event
    pub fn handle(&self, event: SessionEvent) {
        let SessionEvent { session_id, kind } = event;

        match kind {
            SessionEventKind::GatheringComplete { sdp } => {
                if self.slot.is_superseded(session_id) {
                    debug!("Ignoring offer from replaced session {}", session_id);
                    return;
                }

                if self.bridge.publish_offer(sdp) {
                    info!("Offer for session {} sent", session_id);
                } else {
                    info!(
                        "Offer for session {} stored until the peer asks for it",
                        session_id
                    );
                }
            }
            SessionEventKind::StateChanged(state) => {
                debug!("Session {} state changed: {:?}", session_id, state);
            }
            SessionEventKind::GatheringStateChanged(state) => {
                debug!("Session {} gathering: {:?}", session_id, state);
            }
            SessionEventKind::TrackOpen => {
                info!(session_id = %session_id, "Video track open");
            }
        }
    }

    /// Apply every event already queued, without waiting; returns how many
    pub fn handle_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.rx.try_recv() {
            self.handle(event);
            handled += 1;
        }
        handled
    }

    /// Handle events until shutdown
    pub async fn run(mut self, mut shutdown: Shutdown) {
        loop {
            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
                _ = shutdown.wait() => break,
            }
        }

        debug!("Session event loop terminated");
    }
}

/// Wait until the signaling channel is open
///
/// Fails if the channel closes before it ever opened or `timeout` passes
/// first. The state is polled every `poll`.
pub async fn wait_for_signaling(
    bridge: &SignalingBridge,
    poll: Duration,
    timeout: Duration,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match bridge.channel_state() {
            ChannelState::Open => return Ok(()),
            ChannelState::Closed => {
                return Err(Error::SignalingError(
                    "WebSocket closed before connection".to_string(),
                ))
            }
            ChannelState::Disconnected | ChannelState::Connecting => {}
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(Error::OperationTimeout(format!(
                "signaling channel not open after {}ms",
                timeout.as_millis()
            )));
        }

        tokio::time::sleep(poll).await;
    }
}

/// Fully wired relay, ready to start
pub struct MediaRelay {
    config: RelayConfig,
    state: Arc<RelayState>,
    slot: Arc<SessionSlot>,
    factory: Arc<SessionFactory>,
    bridge: Arc<SignalingBridge>,
    events: mpsc::Receiver<SessionEvent>,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl MediaRelay {
    /// Wire a relay around `engine`
    pub fn new(config: RelayConfig, engine: Arc<dyn SessionEngine>) -> Result<Self> {
        config.validate()?;

        let state = Arc::new(RelayState::new());
        let slot = Arc::new(SessionSlot::new());
        let (events_tx, events) = mpsc::channel(config.event_queue_capacity);
        let (outbound_tx, outbound) = mpsc::unbounded_channel();

        let factory = Arc::new(SessionFactory::new(
            engine,
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

        Ok(Self {
            config,
            state,
            slot,
            factory,
            bridge,
            events,
            outbound,
        })
    }

    /// Wire a relay around webrtc-rs peer connections
    pub fn with_webrtc(config: RelayConfig) -> Result<Self> {
        let engine = Arc::new(WebRtcEngine::new(config.stun_servers.clone()));
        Self::new(config, engine)
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<RelayState> {
        &self.state
    }

    pub fn slot(&self) -> &Arc<SessionSlot> {
        &self.slot
    }

    pub fn factory(&self) -> &Arc<SessionFactory> {
        &self.factory
    }

    pub fn bridge(&self) -> &Arc<SignalingBridge> {
        &self.bridge
    }

    /// Connect signaling, bind the ingress socket, build the first session
    /// and start the background loops
    pub async fn start(self) -> Result<RunningRelay> {
        let MediaRelay {
            config,
            state,
            slot,
            factory,
            bridge,
            events,
            outbound,
        } = self;

        let (trigger, shutdown) = shutdown::channel();

        let url = config.signaling_url();
        info!("Signaling URL: {}", url);
        let signaling =
            SignalingClient::new(url, Arc::clone(&bridge)).spawn(outbound, shutdown.clone());

        info!("Waiting for signaling to be connected");
        if let Err(e) = wait_for_signaling(
            &bridge,
            config.signaling_poll_interval(),
            config.signaling_connect_timeout(),
        )
        .await
        {
            abort_startup(&trigger, signaling).await;
            return Err(e);
        }

        let socket = match bind_udp(config.media_bind_addr, config.recv_buffer_size) {
            Ok(socket) => socket,
            Err(e) => {
                error!(addr = %config.media_bind_addr, "Failed to bind RTP ingress: {}", e);
                abort_startup(&trigger, signaling).await;
                return Err(e);
            }
        };

        if let Err(e) = factory.build_session(RebuildReason::Initial).await {
            error!("Failed to build initial session: {}", e);
            abort_startup(&trigger, signaling).await;
            return Err(e);
        }

        let source = PacketSource::new(
            socket,
            PacketRelay::new(
                Arc::clone(&slot),
                Arc::clone(&state),
                Arc::clone(&factory),
                config.ssrc,
            ),
            config.max_datagram_size,
            config.recv_error_backoff(),
        );
        let media_addr = source.local_addr()?;
        info!("RTP ingress: {}", media_addr);

        let watchdog = Watchdog::new(
            Arc::clone(&state),
            Arc::clone(&slot),
            Arc::clone(&factory),
            config.idle_threshold(),
            config.watchdog_interval(),
        );

        let event_loop = SessionEventLoop::new(events, Arc::clone(&slot), Arc::clone(&bridge));

        let loops = vec![
            tokio::spawn(event_loop.run(shutdown.clone())),
            tokio::spawn(watchdog.run(shutdown.clone())),
            tokio::spawn(source.run(shutdown)),
        ];

        info!("Waiting for answer via signaling");

        Ok(RunningRelay {
            trigger,
            media_addr,
            state,
            slot,
            factory,
            bridge,
            loops,
            signaling,
        })
    }
}

async fn abort_startup(trigger: &ShutdownTrigger, signaling: JoinHandle<()>) {
    trigger.trigger();
    if let Err(e) = signaling.await {
        warn!("Signaling task failed: {}", e);
    }
}

/// Handle on a started relay
pub struct RunningRelay {
    trigger: ShutdownTrigger,
    media_addr: SocketAddr,
    state: Arc<RelayState>,
    slot: Arc<SessionSlot>,
    factory: Arc<SessionFactory>,
    bridge: Arc<SignalingBridge>,
    loops: Vec<JoinHandle<()>>,
    signaling: JoinHandle<()>,
}

impl RunningRelay {
    /// Bound address of the RTP ingress socket
    pub fn media_addr(&self) -> SocketAddr {
        self.media_addr
    }

    pub fn state(&self) -> &Arc<RelayState> {
        &self.state
    }

    pub fn slot(&self) -> &Arc<SessionSlot> {
        &self.slot
    }

    pub fn factory(&self) -> &Arc<SessionFactory> {
        &self.factory
    }

    pub fn bridge(&self) -> &Arc<SignalingBridge> {
        &self.bridge
    }

    /// Stop the loops, close signaling, then close the current session
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down relay");
        self.trigger.trigger();

        for handle in self.loops {
            if let Err(e) = handle.await {
                warn!("Relay task failed: {}", e);
            }
        }

        if let Err(e) = self.signaling.await {
            warn!("Signaling task failed: {}", e);
        }

        if let Some(active) = self.slot.take() {
            info!("Closing session {}", active.id);
            active.session.close().await?;
        }

        info!(sessions = self.factory.rebuild_count(), "Relay stopped");
        Ok(())
    }
}
