//! UDP ingress: receive RTP from the local producer and relay it
//!
//! Every datagram long enough to carry an RTP header is stamped with the
//! process-wide SSRC and handed to the current track. A track that rejects a
//! packet marks its session as dead and triggers a rebuild.

use crate::rtp;
use crate::session::{RebuildReason, SessionFactory, SessionSlot};
use crate::shutdown::Shutdown;
use crate::state::RelayState;
use crate::Result;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

/// Bind the ingress socket with the requested receive buffer
pub fn bind_udp(addr: SocketAddr, recv_buffer_size: usize) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;

    if let Err(e) = socket.set_recv_buffer_size(recv_buffer_size) {
        warn!("Failed to set SO_RCVBUF to {}: {}", recv_buffer_size, e);
    }

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    let socket = UdpSocket::from_std(socket.into())?;
    info!(
        addr = %socket.local_addr()?,
        recv_buffer_size,
        "RTP ingress bound"
    );
    Ok(socket)
}

/// Result of relaying one datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Shorter than an RTP header, dropped
    TooShort,
    /// No session installed
    NoTrack,
    /// Current track is not sendable yet
    TrackNotOpen,
    /// Handed to the track
    Sent,
    /// The track rejected the packet; `rebuilt` tells whether this call
    /// installed a replacement session
    SendFailed { rebuilt: bool },
}

/// Per-datagram relay logic, independent of the socket
pub struct PacketRelay {
    slot: Arc<SessionSlot>,
    state: Arc<RelayState>,
    factory: Arc<SessionFactory>,
    ssrc: u32,
}

impl PacketRelay {
    pub fn new(
        slot: Arc<SessionSlot>,
        state: Arc<RelayState>,
        factory: Arc<SessionFactory>,
        ssrc: u32,
    ) -> Self {
        Self {
            slot,
            state,
            factory,
            ssrc,
        }
    }

    /// Relay one datagram; the buffer is rewritten in place
    pub async fn relay_datagram(&self, packet: &mut [u8]) -> RelayOutcome {
        if !rtp::has_rtp_header(packet) {
            trace!(len = packet.len(), "Dropping short datagram");
            return RelayOutcome::TooShort;
        }

        let Some((session_id, track)) = self.slot.current_track() else {
            return RelayOutcome::NoTrack;
        };

        if !track.is_open() {
            return RelayOutcome::TrackNotOpen;
        }

        self.state.liveness().record_packet();

        if rtp::stamp_ssrc(packet, self.ssrc).is_err() {
            return RelayOutcome::TooShort;
        }

        let Err(e) = track.send(packet).await else {
            trace!(len = packet.len(), "Relayed packet on session {}", session_id);
            return RelayOutcome::Sent;
        };

        warn!("Send on session {} failed: {}", session_id, e);
        self.state.clear_pending_offer();

        match self
            .factory
            .rebuild_replacing(Some(session_id), RebuildReason::SendFailure)
            .await
        {
            Ok(Some(active)) => {
                info!("Session {} replaced by {} after send failure", session_id, active.id);
                RelayOutcome::SendFailed { rebuilt: true }
            }
            Ok(None) => RelayOutcome::SendFailed { rebuilt: false },
            Err(e) => {
                warn!("Rebuild after send failure failed: {}", e);
                RelayOutcome::SendFailed { rebuilt: false }
            }
        }
    }
}

/// Receive loop over the ingress socket
pub struct PacketSource {
    socket: UdpSocket,
    relay: PacketRelay,
    max_datagram_size: usize,
    error_backoff: Duration,
}

impl PacketSource {
    pub fn new(
        socket: UdpSocket,
        relay: PacketRelay,
        max_datagram_size: usize,
        error_backoff: Duration,
    ) -> Self {
        Self {
            socket,
            relay,
            max_datagram_size,
            error_backoff,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive and relay until shutdown
    ///
    /// Receive errors never end the loop: interrupts retry at once, anything
    /// else is logged and retried after a short pause.
    pub async fn run(self, mut shutdown: Shutdown) {
        let mut buf = vec![0u8; self.max_datagram_size];

        loop {
            let received = tokio::select! {
                result = self.socket.recv_from(&mut buf) => result,
                _ = shutdown.wait() => break,
            };

            match received {
                Ok((len, _from)) => {
                    self.relay.relay_datagram(&mut buf[..len]).await;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("RTP receive error: {}", e);
                    tokio::select! {
                        _ = tokio::time::sleep(self.error_backoff) => {}
                        _ = shutdown.wait() => break,
                    }
                }
            }
        }

        debug!("RTP ingress loop terminated");
    }
}
