//! Liveness watchdog
//!
//! Rebuilds the session when the upstream producer goes quiet, so a producer
//! restart is picked up without any explicit signal from it.

use crate::session::{RebuildReason, SessionFactory, SessionId, SessionSlot};
use crate::shutdown::Shutdown;
use crate::state::{millis, RelayState};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// What one watchdog tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogTick {
    /// Signaling channel not open, nothing checked
    SignalingClosed,
    /// A build is already running, nothing checked
    Rebuilding,
    /// Media is flowing, or the idle episode was already handled
    Healthy,
    /// Idle detected and a new session installed
    Rebuilt(SessionId),
    /// Idle detected but another trigger had already replaced the session
    RebuildSkipped,
    /// Idle detected and the build failed
    RebuildFailed,
}

pub struct Watchdog {
    state: Arc<RelayState>,
    slot: Arc<SessionSlot>,
    factory: Arc<SessionFactory>,
    idle_threshold: Duration,
    interval: Duration,
}

impl Watchdog {
    pub fn new(
        state: Arc<RelayState>,
        slot: Arc<SessionSlot>,
        factory: Arc<SessionFactory>,
        idle_threshold: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            state,
            slot,
            factory,
            idle_threshold,
            interval,
        }
    }

    /// Run one liveness check
    pub async fn tick(&self) -> WatchdogTick {
        if !self.state.is_channel_open() {
            return WatchdogTick::SignalingClosed;
        }

        if self.state.is_reconnecting() {
            return WatchdogTick::Rebuilding;
        }

        let liveness = self.state.liveness();
        if !liveness.enter_idle_if_stale(self.idle_threshold) {
            return WatchdogTick::Healthy;
        }

        info!(
            gap_ms = liveness
                .since_last_packet()
                .map(millis)
                .unwrap_or_default(),
            threshold_ms = millis(self.idle_threshold),
            "Media idle, rebuilding session"
        );
        self.state.clear_pending_offer();

        match self
            .factory
            .rebuild_replacing(self.slot.current_id(), RebuildReason::Idle)
            .await
        {
            Ok(Some(active)) => WatchdogTick::Rebuilt(active.id),
            Ok(None) => WatchdogTick::RebuildSkipped,
            Err(e) => {
                warn!("Idle rebuild failed, retrying on next tick: {}", e);
                liveness.rearm();
                WatchdogTick::RebuildFailed
            }
        }
    }

    /// Tick at the configured interval until shutdown
    pub async fn run(self, mut shutdown: Shutdown) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.wait() => break,
            }
        }

        debug!("Watchdog terminated");
    }
}
