//! Event reconciler: folds inbound push frames into the caches.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, trace};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use switchboard_protocol::{
    DataSource, Envelope, EventId, IncrementalSection, Keyed, SnapshotSection,
};

use crate::cache::TypedCache;
use crate::error::{FrameError, Result};
use crate::push::caches::StatsCaches;
use crate::resolver::{MetadataCaches, by_key};

type DecodeResult = std::result::Result<(), serde_json::Error>;

type Handler = fn(&EventReconciler, Value) -> DecodeResult;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SectionTag {
    data_source: String,
}

/// Decodes frames and dispatches them by event id.
///
/// Every catalogued event stamps its slot in [`StatsCaches::timers`] on
/// arrival; for [`EventId::PongReceived`] that slot is the heartbeat timer.
/// Catalogued events without a handler are otherwise ignored.
pub struct EventReconciler {
    stats: Arc<StatsCaches>,
    metadata: Arc<MetadataCaches>,
    handlers: HashMap<EventId, Handler>,
}

impl EventReconciler {
    pub fn new(stats: Arc<StatsCaches>, metadata: Arc<MetadataCaches>) -> Self {
        let table: [(EventId, Handler); 6] = [
            (EventId::ServerConnected, Self::on_connected),
            (EventId::SupervisorStats, Self::on_full_statistics),
            (EventId::IncrementalStatsUpdate, Self::on_incremental_update),
            (EventId::SkillsInvalidated, Self::on_queues_invalidated),
            (EventId::UsersInvalidated, Self::on_users_invalidated),
            (EventId::ReasonCodesInvalidated, Self::on_reason_codes_invalidated),
        ];

        Self {
            stats,
            metadata,
            handlers: table.into_iter().collect(),
        }
    }

    pub fn handles(&self, event: EventId) -> bool {
        self.handlers.contains_key(&event)
    }

    /// Apply one frame. Fails with a [`FrameError`] carrying the raw frame
    /// when the envelope, the event id or a recognised payload is malformed.
    pub fn handle(&self, frame: &[u8]) -> Result<()> {
        let envelope: Envelope = serde_json::from_slice(frame)
            .map_err(|e| FrameError::new(format!("invalid envelope: {e}"), frame))?;

        let event = envelope.event().ok_or_else(|| {
            let reason = if envelope.context.event_id.is_empty() {
                "missing event id".to_string()
            } else {
                format!("unknown event id {}", envelope.context.event_id)
            };
            FrameError::new(reason, frame)
        })?;

        match self.handlers.get(&event) {
            Some(handler) => handler(self, envelope.payload)
                .map_err(|e| FrameError::new(format!("event {event}: {e}"), frame))?,
            None => trace!("no handler for event {event}"),
        }
        self.stats.stamp(event);
        Ok(())
    }

    fn on_connected(&self, _payload: Value) -> DecodeResult {
        info!("push server acknowledged connection");
        Ok(())
    }

    fn on_full_statistics(&self, payload: Value) -> DecodeResult {
        let sections: Vec<Value> = serde_json::from_value(payload)?;
        for raw in sections {
            let tag = SectionTag::deserialize(&raw)?;
            match DataSource::from_tag(&tag.data_source) {
                Some(DataSource::AgentState) => replace_section(&self.stats.agent_state, raw)?,
                Some(DataSource::AgentStatistic) => {
                    replace_section(&self.stats.agent_statistics, raw)?
                }
                Some(DataSource::AcdStatus) => replace_section(&self.stats.acd_state, raw)?,
                _ => debug!("snapshot: ignoring data source {}", tag.data_source),
            }
        }
        Ok(())
    }

    fn on_incremental_update(&self, payload: Value) -> DecodeResult {
        let sections: Vec<Value> = serde_json::from_value(payload)?;
        for raw in sections {
            let tag = SectionTag::deserialize(&raw)?;
            match DataSource::from_tag(&tag.data_source) {
                Some(DataSource::AgentState) => apply_section(&self.stats.agent_state, raw)?,
                Some(DataSource::AgentStatistic) => {
                    apply_section(&self.stats.agent_statistics, raw)?
                }
                Some(DataSource::AcdStatus) => apply_section(&self.stats.acd_state, raw)?,
                _ => debug!("incremental: ignoring data source {}", tag.data_source),
            }
        }
        Ok(())
    }

    fn on_queues_invalidated(&self, _payload: Value) -> DecodeResult {
        debug!("queue metadata invalidated");
        self.metadata.queues.reset();
        Ok(())
    }

    fn on_users_invalidated(&self, _payload: Value) -> DecodeResult {
        debug!("user metadata invalidated");
        self.metadata.agents.reset();
        Ok(())
    }

    fn on_reason_codes_invalidated(&self, _payload: Value) -> DecodeResult {
        debug!("reason code metadata invalidated");
        self.metadata.reason_codes.reset();
        Ok(())
    }
}

impl std::fmt::Debug for EventReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut events: Vec<_> = self.handlers.keys().copied().collect();
        events.sort();
        f.debug_struct("EventReconciler")
            .field("handlers", &events)
            .finish_non_exhaustive()
    }
}

fn replace_section<T>(cache: &TypedCache<T::Key, T>, raw: Value) -> DecodeResult
where
    T: Keyed + Clone + DeserializeOwned,
{
    let section: SnapshotSection<T> = serde_json::from_value(raw)?;
    cache.replace(by_key(section.data));
    Ok(())
}

fn apply_section<T>(cache: &TypedCache<T::Key, T>, raw: Value) -> DecodeResult
where
    T: Keyed + Clone + DeserializeOwned,
    T::Key: DeserializeOwned,
{
    let section: IncrementalSection<T, T::Key> = serde_json::from_value(raw)?;
    for record in section.added.into_iter().chain(section.updated) {
        cache.update(record.key(), record);
    }
    for removed in section.removed {
        cache.delete(&removed.id);
    }
    Ok(())
}
