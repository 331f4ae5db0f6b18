//! The single current (session, track) pair

use super::{MediaSession, MediaTrack, SessionId};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// A fully constructed session and its outgoing track
#[derive(Clone)]
pub struct ActiveSession {
    pub id: SessionId,
    pub session: Arc<dyn MediaSession>,
    pub track: Arc<dyn MediaTrack>,
}

impl fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSession")
            .field("id", &self.id)
            .field("state", &self.session.state())
            .field("track_open", &self.track.is_open())
            .finish()
    }
}

/// Holder of the current session
///
/// Readers copy the handles out; writers swap the whole pair. The lock is only
/// ever held for the copy or swap, never across a send or a build.
#[derive(Debug, Default)]
pub struct SessionSlot {
    current: Mutex<Option<ActiveSession>>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current pair
    pub fn snapshot(&self) -> Option<ActiveSession> {
        self.current.lock().clone()
    }

    /// Current track together with the id of the session that owns it
    pub fn current_track(&self) -> Option<(SessionId, Arc<dyn MediaTrack>)> {
        self.current
            .lock()
            .as_ref()
            .map(|active| (active.id, Arc::clone(&active.track)))
    }

    pub fn current_session(&self) -> Option<Arc<dyn MediaSession>> {
        self.current
            .lock()
            .as_ref()
            .map(|active| Arc::clone(&active.session))
    }

    pub fn current_id(&self) -> Option<SessionId> {
        self.current.lock().as_ref().map(|active| active.id)
    }

    pub fn is_current(&self, id: SessionId) -> bool {
        self.current_id() == Some(id)
    }

    /// Whether a newer session than `id` has already been installed
    ///
    /// A session still being built has a higher id than the current one and
    /// is not superseded.
    pub fn is_superseded(&self, id: SessionId) -> bool {
        self.current_id().is_some_and(|current| current > id)
    }

    /// Publish a new pair, handing back the one it replaced
    ///
    /// The caller owns closing the returned session.
    pub fn install(&self, next: ActiveSession) -> Option<ActiveSession> {
        self.current.lock().replace(next)
    }

    /// Empty the slot
    pub fn take(&self) -> Option<ActiveSession> {
        self.current.lock().take()
    }
}
