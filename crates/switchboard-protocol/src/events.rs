//! Push-stream frames.
//!
//! Every inbound frame is a JSON envelope:
//!
//! ```text
//! {"context": {"eventId": "5000"}, "payload": [ {"dataSource": "AGENT_STATE", "data": [..]}, .. ]}
//! ```
//!
//! The event id selects how `payload` is read. Statistics events carry an array
//! of sections, one per data source.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound heartbeat sentinel; the server answers with [`EventId::PongReceived`].
pub const PING_FRAME: &str = "ping";

// ============================================================================
// Event catalog
// ============================================================================

macro_rules! catalog {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident / $lookup:ident / $text:ident {
            $($(#[$vmeta:meta])* $variant:ident = $code:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        $vis enum $name {
            $($(#[$vmeta])* $variant,)+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            pub fn $lookup(value: &str) -> Option<Self> {
                match value {
                    $($code => Some($name::$variant),)+
                    _ => None,
                }
            }

            pub fn $text(&self) -> &'static str {
                match self {
                    $($name::$variant => $code,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.$text())
            }
        }
    };
}

catalog! {
    /// Event codes the statistics stream can emit.
    pub enum EventId / from_code / code {
        ServerConnected = "1010",
        DuplicateConnection = "1020",
        /// Answer to [`PING_FRAME`].
        PongReceived = "1202",
        /// Full statistics snapshot.
        SupervisorStats = "5000",
        DispositionsInvalidated = "5002",
        /// A queue was created, removed or renamed.
        SkillsInvalidated = "5003",
        AgentGroupsInvalidated = "5004",
        CampaignsInvalidated = "5005",
        /// A user was created, removed or renamed.
        UsersInvalidated = "5006",
        ReasonCodesInvalidated = "5007",
        CampaignProfilesInvalidated = "5008",
        CampaignOutOfNumbers = "5009",
        ListsInvalidated = "5010",
        CampaignListsChanged = "5011",
        /// Add/update/remove diff against the last snapshot.
        IncrementalStatsUpdate = "5012",
        IncrementalUserProfilesUpdate = "5013",
        FilterSettingsUpdated = "6001",
        AgentsInvalidated = "6002",
        PermissionsUpdated = "6003",
        ResetCampaignDispositionsCompleted = "6004",
        MonitoringStateUpdated = "6005",
        RandomMonitoringStarted = "6006",
        FdsRealTime = "6007",
        IncrementalInteractions = "6008",
    }
}

catalog! {
    /// Tags naming the data source of a statistics section.
    pub enum DataSource / from_tag / tag {
        AcdStatus = "ACD_STATUS",
        AgentState = "AGENT_STATE",
        AgentStatistic = "AGENT_STATISTIC",
        CampaignState = "CAMPAIGN_STATE",
        InboundCampaignStatistics = "INBOUND_CAMPAIGN_STATISTICS",
        Stations = "STATIONS",
        OutboundCampaignStatistics = "OUTBOUND_CAMPAIGN_STATISTICS",
        OutboundCampaignManager = "OUTBOUND_CAMPAIGN_MANAGER",
        UserSession = "USER_SESSION",
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// Outer shape of every inbound frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub context: EventContext,
    #[serde(default, alias = "payLoad")]
    pub payload: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventContext {
    #[serde(rename = "eventId", default)]
    pub event_id: String,
}

impl Envelope {
    pub fn new(event: EventId, payload: Value) -> Self {
        Self {
            context: EventContext {
                event_id: event.code().to_string(),
            },
            payload,
        }
    }

    /// The catalogued event, or `None` when the id is empty or unknown.
    pub fn event(&self) -> Option<EventId> {
        EventId::from_code(&self.context.event_id)
    }
}

// ============================================================================
// Statistics sections
// ============================================================================

/// One data source inside a full statistics snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSection<T> {
    pub data_source: String,
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

/// One data source inside an incremental update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalSection<T, K> {
    pub data_source: String,
    #[serde(default = "Vec::new")]
    pub added: Vec<T>,
    #[serde(default = "Vec::new")]
    pub updated: Vec<T>,
    #[serde(default = "Vec::new")]
    pub removed: Vec<RemovedEntity<K>>,
}

/// Removed entries only need their key; the rest of the record is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedEntity<K> {
    pub id: K,
}
