//! Shared relay flags
//!
//! Each field is synchronized on its own. Nothing here promises consistency
//! across fields: an offer may go out just before a concurrent rebuild clears
//! it, and that is fine.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// State shared by the signaling bridge, ingest loop, watchdog and factory
#[derive(Debug)]
pub struct RelayState {
    /// Most recent local description of the current session
    pending_offer: Mutex<Option<String>>,

    /// Signaling channel is open
    channel_open: AtomicBool,

    /// A session build is in progress
    reconnecting: AtomicBool,

    /// Last-packet bookkeeping
    liveness: Liveness,
}

impl RelayState {
    pub fn new() -> Self {
        Self {
            pending_offer: Mutex::new(None),
            channel_open: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            liveness: Liveness::new(),
        }
    }

    /// Current pending offer, if any
    pub fn pending_offer(&self) -> Option<String> {
        self.pending_offer.lock().clone()
    }

    pub fn set_pending_offer(&self, sdp: String) {
        *self.pending_offer.lock() = Some(sdp);
    }

    pub fn clear_pending_offer(&self) {
        self.pending_offer.lock().take();
    }

    pub fn is_channel_open(&self) -> bool {
        self.channel_open.load(Ordering::Acquire)
    }

    pub fn set_channel_open(&self, open: bool) {
        self.channel_open.store(open, Ordering::Release);
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::Acquire)
    }

    pub(crate) fn set_reconnecting(&self, value: bool) {
        self.reconnecting.store(value, Ordering::Release);
    }

    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

/// Time of the last accepted media packet plus the idle flag
///
/// Readings are milliseconds on the tokio clock relative to construction,
/// offset by one so that zero can mean "no packet yet".
#[derive(Debug)]
pub struct Liveness {
    origin: Instant,
    last_packet_ms: AtomicU64,
    idle: AtomicBool,
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_packet_ms: AtomicU64::new(0),
            idle: AtomicBool::new(true),
        }
    }

    fn now_ms(&self) -> u64 {
        millis(self.origin.elapsed()).saturating_add(1)
    }

    /// Record an accepted packet and leave the idle state
    pub fn record_packet(&self) {
        self.last_packet_ms.store(self.now_ms(), Ordering::Release);
        self.idle.store(false, Ordering::Release);
    }

    pub fn has_seen_packet(&self) -> bool {
        self.last_packet_ms.load(Ordering::Acquire) != 0
    }

    /// Time since the last accepted packet, `None` before the first one
    pub fn since_last_packet(&self) -> Option<Duration> {
        match self.last_packet_ms.load(Ordering::Acquire) {
            0 => None,
            last => Some(Duration::from_millis(self.now_ms().saturating_sub(last))),
        }
    }

    /// Leave the idle state without a packet so the next stale check fires again
    pub(crate) fn rearm(&self) {
        self.idle.store(false, Ordering::Release);
    }

    pub fn is_idle(&self) -> bool {
        self.idle.load(Ordering::Acquire)
    }

    /// Enter the idle state if media has been quiet for longer than `threshold`
    ///
    /// Returns true only for the call that flips the flag, so one idle episode
    /// yields one `true` no matter how often it is polled.
    pub fn enter_idle_if_stale(&self, threshold: Duration) -> bool {
        match self.since_last_packet() {
            Some(gap) if gap > threshold => self
                .idle
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
            _ => false,
        }
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
