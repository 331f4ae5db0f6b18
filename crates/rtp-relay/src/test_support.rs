//! Minimal in-crate session doubles for unit tests

use crate::config::TrackSpec;
use crate::session::{
    EventSink, MediaSession, MediaTrack, SessionEngine, SessionId, SessionState,
};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub struct StubTrack {
    open: AtomicBool,
    fail_sends: AtomicBool,
    pub sent: Mutex<Vec<Vec<u8>>>,
}

impl StubTrack {
    pub fn open() -> Self {
        Self {
            open: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn closed() -> Self {
        let track = Self::open();
        track.open.store(false, Ordering::SeqCst);
        track
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaTrack for StubTrack {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, packet: &[u8]) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::MediaTrackError("transport closed".to_string()));
        }
        self.sent.lock().push(packet.to_vec());
        Ok(())
    }
}

pub struct StubSession {
    id: SessionId,
    closed: AtomicBool,
    pub answers: Mutex<Vec<String>>,
}

impl StubSession {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            closed: AtomicBool::new(false),
            answers: Mutex::new(Vec::new()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSession for StubSession {
    fn id(&self) -> SessionId {
        self.id
    }

    async fn add_track(&self, _spec: &TrackSpec) -> Result<Arc<dyn MediaTrack>> {
        Ok(Arc::new(StubTrack::open()))
    }

    async fn start_negotiation(&self) -> Result<()> {
        Ok(())
    }

    async fn local_description(&self) -> Option<String> {
        None
    }

    async fn set_remote_answer(&self, sdp: String) -> Result<()> {
        self.answers.lock().push(sdp);
        Ok(())
    }

    fn state(&self) -> SessionState {
        if self.is_closed() {
            SessionState::Closed
        } else {
            SessionState::New
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Engine handing out [`StubSession`]s and remembering them
#[derive(Default)]
pub struct StubEngine {
    pub sessions: Mutex<Vec<Arc<StubSession>>>,
    pub fail_next: AtomicBool,
    pub created: AtomicUsize,
}

#[async_trait]
impl SessionEngine for StubEngine {
    async fn create_session(
        &self,
        id: SessionId,
        _events: EventSink,
    ) -> Result<Arc<dyn MediaSession>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::SessionError("engine refused".to_string()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(StubSession::new(id));
        self.sessions.lock().push(Arc::clone(&session));
        Ok(session)
    }
}
