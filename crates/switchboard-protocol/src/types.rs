//! Domain records and login payloads.

use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Host used when the login metadata names no active API server.
pub const DEFAULT_API_HOST: &str = "app.five9.com:443";

macro_rules! string_id {
    ($($(#[$meta:meta])* $name:ident),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(pub String);

            impl $name {
                pub fn new(value: impl Into<String>) -> Self {
                    Self(value.into())
                }

                pub fn as_str(&self) -> &str {
                    &self.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }

            impl From<&str> for $name {
                fn from(value: &str) -> Self {
                    Self(value.to_string())
                }
            }
        )+
    };
}

string_id!(
    /// Platform user identifier (agents and supervisors alike).
    UserId,
    /// Login name of a user; the key of user-facing views.
    UserName,
    OrganizationId,
    /// Queue (skill) identifier.
    QueueId,
    ReasonCodeId,
    MaintenanceNoticeId,
    CampaignId,
    SessionId,
    TokenId,
    FarmId,
);

/// A record addressable by a domain key.
///
/// Snapshot and incremental events are folded into caches by this key.
pub trait Keyed {
    type Key: Eq + Hash + Clone;

    fn key(&self) -> Self::Key;
}

// ============================================================================
// Login
// ============================================================================

/// Username/password pair posted to the login endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoginPolicy {
    AttachExisting,
    ForceIn,
}

/// Body of `POST /<context>/auth/login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginPayload {
    pub password_credentials: PasswordCredentials,
    pub app_key: String,
    pub policy: LoginPolicy,
}

impl LoginPayload {
    pub fn new(credentials: PasswordCredentials) -> Self {
        Self {
            password_credentials: credentials,
            app_key: "web-ui".to_string(),
            policy: LoginPolicy::ForceIn,
        }
    }
}

/// Response of the login endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginResponse {
    #[serde(rename = "tokenId", alias = "tokenID")]
    pub token_id: TokenId,
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
    #[serde(rename = "orgId", alias = "orgID")]
    pub org_id: OrganizationId,
    #[serde(rename = "userId", alias = "userID")]
    pub user_id: UserId,
    pub context: SessionContext,
    pub metadata: SessionMetadata,
}

impl LoginResponse {
    /// `host:port` of the first API server in the first active data center.
    pub fn active_api_server(&self) -> Option<String> {
        self.metadata
            .data_centers
            .iter()
            .filter(|dc| dc.active)
            .find_map(|dc| dc.api_urls.first())
            .map(|server| format!("{}:{}", server.host, server.port))
    }

    /// [`active_api_server`](Self::active_api_server), or [`DEFAULT_API_HOST`].
    pub fn api_host(&self) -> String {
        self.active_api_server()
            .unwrap_or_else(|| DEFAULT_API_HOST.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionContext {
    pub cloud_client_url: String,
    pub cloud_token_url: String,
    pub farm_id: FarmId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionMetadata {
    pub freedom_url: String,
    pub data_centers: Vec<DataCenter>,
}

/// A backend site; exactly one is expected to be `active`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DataCenter {
    pub name: String,
    pub ui_urls: Vec<Server>,
    pub api_urls: Vec<Server>,
    pub login_urls: Vec<Server>,
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Server {
    pub host: String,
    pub port: String,
    pub route_key: String,
    pub version: String,
}

/// Where a user is in the login negotiation.
///
/// `NotLoggedIn` is local only; the server reports the other four.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoginState {
    #[default]
    NotLoggedIn,
    SelectStation,
    AcceptNotice,
    Working,
    Relogin,
}

/// Station binding sent with `session_start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationInfo {
    pub station_id: String,
    pub station_type: String,
}

impl StationInfo {
    /// The "no softphone" station used by headless clients.
    pub fn empty() -> Self {
        Self {
            station_id: String::new(),
            station_type: "EMPTY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceNotice {
    pub id: MaintenanceNoticeId,
    pub accepted: bool,
    pub annotation: String,
    pub text: String,
}

// ============================================================================
// Reference data
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentInfo {
    pub id: UserId,
    pub user_name: UserName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Keyed for AgentInfo {
    type Key = UserId;

    fn key(&self) -> UserId {
        self.id.clone()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueInfo {
    pub id: QueueId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Keyed for QueueInfo {
    type Key = QueueId;

    fn key(&self) -> QueueId {
        self.id.clone()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasonCodeInfo {
    pub id: ReasonCodeId,
    pub name: String,
    pub selectable: bool,
}

impl Keyed for ReasonCodeInfo {
    type Key = ReasonCodeId;

    fn key(&self) -> ReasonCodeId {
        self.id.clone()
    }
}

// ============================================================================
// Statistics records
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserState {
    #[serde(rename = "ACW")]
    AfterCallWork,
    LoggedOut,
    NotReady,
    Ready,
    OnCall,
    Ringing,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Presence of one agent (`AGENT_STATE` data source).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentState {
    pub id: UserId,
    pub state: UserState,
    pub state_since: u64,
    pub state_duration: u64,
    pub reason_code_id: Option<ReasonCodeId>,
    pub campaign_id: Option<CampaignId>,
    pub parked_calls_count: u64,
    pub permanent_recording: bool,
    pub session_recording: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Keyed for AgentState {
    type Key = UserId;

    fn key(&self) -> UserId {
        self.id.clone()
    }
}

/// Per-agent counters (`AGENT_STATISTIC` data source).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentStatistics {
    pub id: UserId,
    pub total_calls_count: u64,
    pub inbound_calls_count: u64,
    pub outbound_calls_count: u64,
    pub average_handle_time: u64,
    pub average_wrap_time: u64,
    pub login_time: u64,
    pub occupancy: f64,
    pub utilization: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Keyed for AgentStatistics {
    type Key = UserId;

    fn key(&self) -> UserId {
        self.id.clone()
    }
}

/// Occupancy of one queue (`ACD_STATUS` data source).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AcdState {
    pub id: QueueId,
    pub calls_in_queue: u64,
    pub callbacks_in_queue: u64,
    pub voicemails_in_queue: u64,
    pub agents_logged_in: u64,
    pub agents_active: u64,
    pub agents_on_call: u64,
    pub agents_not_ready_for_calls: u64,
    pub longest_queue_time: u64,
    pub current_longest_queue_time: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Keyed for AcdState {
    type Key = QueueId;

    fn key(&self) -> QueueId {
        self.id.clone()
    }
}

// ============================================================================
// Statistics filter settings
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionType {
    #[default]
    All,
    My,
    Specify,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatisticsRange {
    #[default]
    CurrentDay,
    CurrentMonth,
    CurrentShift,
    CurrentWeek,
    Lifetime,
    RollingHour,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollingPeriod {
    #[serde(rename = "MINUTES5")]
    Minutes5,
    #[serde(rename = "MINUTES10")]
    Minutes10,
    #[serde(rename = "MINUTES15")]
    Minutes15,
    #[serde(rename = "MINUTES30")]
    Minutes30,
    #[serde(rename = "HOUR1")]
    Hour1,
    #[serde(rename = "HOUR2")]
    Hour2,
    #[serde(rename = "HOUR3")]
    Hour3,
    #[default]
    #[serde(rename = "TODAY")]
    Today,
}

/// Which queues and agent groups the supervisor's statistics stream covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StatsFilterSettings {
    pub groups: Vec<String>,
    pub group_selection_type: SelectionType,
    pub range: StatisticsRange,
    pub rolling_time_period: RollingPeriod,
    /// Hours to shift when `range` is `CURRENT_SHIFT`.
    pub shift_hours: u64,
    pub skills: Vec<QueueId>,
    pub skills_selection_type: SelectionType,
    pub subscribed_hour_offset: u64,
    pub time_zone: Option<String>,
    #[serde(rename = "timeZoneID")]
    pub time_zone_id: Option<String>,
    pub use_admin_time_zone: bool,
}
