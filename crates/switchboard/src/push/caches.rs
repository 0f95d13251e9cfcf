//! Caches written by the push stream.

use std::time::Duration;

use tokio::time::Instant;

use switchboard_protocol::{AcdState, AgentState, AgentStatistics, EventId, QueueId, UserId};

use crate::cache::TypedCache;

/// Statistics caches plus the per-event "last handled" timers.
///
/// The heartbeat timer is the [`EventId::PongReceived`] slot of `timers`, so
/// pong bookkeeping never touches a statistics cache's lock.
#[derive(Debug)]
pub struct StatsCaches {
    pub agent_state: TypedCache<UserId, AgentState>,
    pub agent_statistics: TypedCache<UserId, AgentStatistics>,
    pub acd_state: TypedCache<QueueId, AcdState>,
    pub timers: TypedCache<EventId, Instant>,
}

impl StatsCaches {
    pub fn new(max_age: Option<Duration>) -> Self {
        Self {
            agent_state: TypedCache::new(max_age),
            agent_statistics: TypedCache::new(max_age),
            acd_state: TypedCache::new(max_age),
            timers: TypedCache::new(None),
        }
    }

    /// Back to empty and not ready.
    pub fn reset_all(&self) {
        self.agent_state.reset();
        self.agent_statistics.reset();
        self.acd_state.reset();
        self.timers.reset();
    }

    pub fn stamp(&self, event: EventId) {
        self.timers.update(event, Instant::now());
    }

    pub fn record_pong(&self) {
        self.stamp(EventId::PongReceived);
    }

    pub fn last_pong(&self) -> Option<Instant> {
        self.timers.get(&EventId::PongReceived)
    }

    /// When the last full snapshot was applied on this connection.
    pub fn snapshot_received_at(&self) -> Option<Instant> {
        self.timers.get(&EventId::SupervisorStats)
    }

    pub fn last_handled(&self, event: EventId) -> Option<Instant> {
        self.timers.get(&event)
    }
}

impl Default for StatsCaches {
    fn default() -> Self {
        Self::new(None)
    }
}
