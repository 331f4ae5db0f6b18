//! Session construction and replacement

use super::{ActiveSession, EventSink, SessionEngine, SessionEvent, SessionId, SessionSlot};
use crate::config::TrackSpec;
use crate::state::RelayState;
use crate::Result;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, instrument, warn};

/// Why a session is being built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildReason {
    /// First session at startup
    Initial,
    /// The track rejected a packet
    SendFailure,
    /// The upstream producer went quiet
    Idle,
}

impl fmt::Display for RebuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebuildReason::Initial => write!(f, "initial"),
            RebuildReason::SendFailure => write!(f, "send failure"),
            RebuildReason::Idle => write!(f, "media idle"),
        }
    }
}

/// Builds sessions and publishes them into the [`SessionSlot`]
///
/// Builds are serialized: the startup path, the ingest loop and the watchdog
/// may all ask for one, but only one runs at a time.
pub struct SessionFactory {
    engine: Arc<dyn SessionEngine>,
    slot: Arc<SessionSlot>,
    state: Arc<RelayState>,
    track_spec: TrackSpec,
    events: mpsc::Sender<SessionEvent>,
    build_lock: Mutex<()>,
    next_id: AtomicU64,
    installed: AtomicU64,
}

impl SessionFactory {
    pub fn new(
        engine: Arc<dyn SessionEngine>,
        slot: Arc<SessionSlot>,
        state: Arc<RelayState>,
        track_spec: TrackSpec,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            engine,
            slot,
            state,
            track_spec,
            events,
            build_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
            installed: AtomicU64::new(0),
        }
    }

    /// Number of sessions installed so far
    pub fn rebuild_count(&self) -> u64 {
        self.installed.load(Ordering::Acquire)
    }

    pub fn track_spec(&self) -> &TrackSpec {
        &self.track_spec
    }

    /// Build a session unconditionally and make it current
    pub async fn build_session(&self, reason: RebuildReason) -> Result<ActiveSession> {
        let _build = self.build_lock.lock().await;
        self.build_locked(reason).await
    }

    /// Replace `stale` if it is still the current session
    ///
    /// Returns `Ok(None)` when another trigger already replaced it while this
    /// call waited for the build lock.
    pub async fn rebuild_replacing(
        &self,
        stale: Option<SessionId>,
        reason: RebuildReason,
    ) -> Result<Option<ActiveSession>> {
        let _build = self.build_lock.lock().await;

        if self.slot.current_id() != stale {
            info!(
                stale = ?stale,
                current = ?self.slot.current_id(),
                %reason,
                "Session already replaced, skipping rebuild"
            );
            return Ok(None);
        }

        self.build_locked(reason).await.map(Some)
    }

    #[instrument(skip(self), fields(session_id))]
    async fn build_locked(&self, reason: RebuildReason) -> Result<ActiveSession> {
        let _reconnecting = ReconnectingGuard::engage(&self.state);

        let id = SessionId(self.next_id.fetch_add(1, Ordering::AcqRel));
        tracing::Span::current().record("session_id", tracing::field::display(id));
        info!(%reason, "Building session {}", id);

        let session = self
            .engine
            .create_session(id, EventSink::new(id, self.events.clone()))
            .await?;

        let prepared = async {
            let track = session.add_track(&self.track_spec).await?;
            session.start_negotiation().await?;
            Ok::<_, crate::Error>(track)
        }
        .await;

        let track = match prepared {
            Ok(track) => track,
            Err(e) => {
                warn!("Session {} failed during setup: {}", id, e);
                if let Err(close_err) = session.close().await {
                    warn!("Failed to close half-built session {}: {}", id, close_err);
                }
                return Err(e);
            }
        };

        let active = ActiveSession { id, session, track };

        if let Some(previous) = self.slot.install(active.clone()) {
            info!("Closing replaced session {}", previous.id);
            if let Err(e) = previous.session.close().await {
                warn!("Failed to close session {}: {}", previous.id, e);
            }
        }

        self.installed.fetch_add(1, Ordering::AcqRel);
        info!(
            ssrc = self.track_spec.ssrc,
            payload_type = self.track_spec.payload_type,
            "Session {} installed",
            id
        );

        Ok(active)
    }
}

/// Holds the Reconnecting flag for the duration of a build, error paths included
struct ReconnectingGuard<'a> {
    state: &'a RelayState,
}

impl<'a> ReconnectingGuard<'a> {
    fn engage(state: &'a RelayState) -> Self {
        state.set_reconnecting(true);
        Self { state }
    }
}

impl Drop for ReconnectingGuard<'_> {
    fn drop(&mut self) {
        self.state.set_reconnecting(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::test_support::StubEngine;

    fn factory(engine: Arc<StubEngine>) -> (SessionFactory, Arc<SessionSlot>, Arc<RelayState>) {
        let slot = Arc::new(SessionSlot::new());
        let state = Arc::new(RelayState::new());
        let (tx, _rx) = mpsc::channel(8);
        let factory = SessionFactory::new(
            engine,
            Arc::clone(&slot),
            Arc::clone(&state),
            RelayConfig::default().track_spec(),
            tx,
        );
        (factory, slot, state)
    }

    #[tokio::test]
    async fn test_build_installs_and_closes_previous() {
        let engine = Arc::new(StubEngine::default());
        let (factory, slot, state) = factory(Arc::clone(&engine));

        let first = factory.build_session(RebuildReason::Initial).await.unwrap();
        let second = factory.build_session(RebuildReason::Idle).await.unwrap();

        assert_eq!(first.id, SessionId(1));
        assert_eq!(second.id, SessionId(2));
        assert!(slot.is_current(SessionId(2)));
        assert_eq!(factory.rebuild_count(), 2);
        assert!(!state.is_reconnecting());

        let sessions = engine.sessions.lock();
        assert!(sessions[0].is_closed());
        assert!(!sessions[1].is_closed());
    }

    #[tokio::test]
    async fn test_failed_build_keeps_previous_and_clears_flag() {
        let engine = Arc::new(StubEngine::default());
        let (factory, slot, state) = factory(Arc::clone(&engine));

        factory.build_session(RebuildReason::Initial).await.unwrap();
        engine.fail_next.store(true, Ordering::SeqCst);

        assert!(factory.build_session(RebuildReason::SendFailure).await.is_err());
        assert!(slot.is_current(SessionId(1)));
        assert!(!state.is_reconnecting());
        assert!(!engine.sessions.lock()[0].is_closed());
    }

    #[tokio::test]
    async fn test_rebuild_skipped_when_already_replaced() {
        let engine = Arc::new(StubEngine::default());
        let (factory, slot, _state) = factory(Arc::clone(&engine));

        factory.build_session(RebuildReason::Initial).await.unwrap();
        factory.build_session(RebuildReason::Idle).await.unwrap();

        let outcome = factory
            .rebuild_replacing(Some(SessionId(1)), RebuildReason::SendFailure)
            .await
            .unwrap();

        assert!(outcome.is_none());
        assert!(slot.is_current(SessionId(2)));
        assert_eq!(factory.rebuild_count(), 2);
    }
}
