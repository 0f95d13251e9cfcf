//! Supervisor service: the statistics stream, its projected views and the
//! supervisor REST calls.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;

use log::warn;
use tokio_util::sync::CancellationToken;

use switchboard_protocol::{
    AcdState, AgentInfo, AgentState, AgentStatistics, QueueInfo, ReasonCodeInfo,
    StatsFilterSettings, UserId, UserName,
};

use crate::auth::Authenticator;
use crate::error::{Error, Result};
use crate::push::{PushConnectionManager, StatsCaches};
use crate::resolver::MetadataResolver;
use crate::transport::ApiRequest;

pub struct SupervisorService {
    auth: Arc<Authenticator>,
    resolver: MetadataResolver,
    stats: Arc<StatsCaches>,
    push: PushConnectionManager,
}

impl SupervisorService {
    pub fn new(
        auth: Arc<Authenticator>,
        resolver: MetadataResolver,
        stats: Arc<StatsCaches>,
        push: PushConnectionManager,
    ) -> Self {
        Self {
            auth,
            resolver,
            stats,
            push,
        }
    }

    pub fn authenticator(&self) -> &Arc<Authenticator> {
        &self.auth
    }

    pub fn resolver(&self) -> &MetadataResolver {
        &self.resolver
    }

    pub fn stats(&self) -> &Arc<StatsCaches> {
        &self.stats
    }

    pub fn push(&self) -> &PushConnectionManager {
        &self.push
    }

    /// Run one push connection; see [`PushConnectionManager::run`].
    pub async fn run_push(&self, cancel: CancellationToken) -> Result<()> {
        self.push.run(cancel).await
    }

    // ------------------------------------------------------------------------
    // Projected views
    // ------------------------------------------------------------------------

    /// Current state of every known agent, keyed by user name.
    pub async fn agent_states(&self) -> Result<HashMap<UserName, AgentState>> {
        let snapshot = self.stats.agent_state.get_all()?;
        let agents = self.resolver.agents().await?;
        Ok(project("agent states", snapshot.items, &agents, |info| {
            info.user_name.clone()
        }))
    }

    /// Counters of every known agent, keyed by user name.
    pub async fn agent_statistics(&self) -> Result<HashMap<UserName, AgentStatistics>> {
        let snapshot = self.stats.agent_statistics.get_all()?;
        let agents = self.resolver.agents().await?;
        Ok(project("agent statistics", snapshot.items, &agents, |info| {
            info.user_name.clone()
        }))
    }

    /// Queue occupancy keyed by queue name.
    pub async fn acd_states(&self) -> Result<HashMap<String, AcdState>> {
        let snapshot = self.stats.acd_state.get_all()?;
        let queues = self.resolver.queues().await?;
        Ok(project("queue states", snapshot.items, &queues, |info: &QueueInfo| {
            info.name.clone()
        }))
    }

    /// State of one agent; `None` if the stream has not reported them.
    pub fn agent_state(&self, user_id: &UserId) -> Result<Option<AgentState>> {
        Ok(self.stats.agent_state.lookup(user_id)?)
    }

    // ------------------------------------------------------------------------
    // REST
    // ------------------------------------------------------------------------

    /// The logged-in supervisor's own user record.
    pub async fn own_user_info(&self) -> Result<AgentInfo> {
        let session = self.auth.session().await?;
        let agents = self.resolver.agents().await?;
        agents
            .get(&session.user_id)
            .cloned()
            .ok_or_else(|| Error::UnknownUserId(session.user_id.to_string()))
    }

    pub async fn domain_users(&self) -> Result<Vec<AgentInfo>> {
        self.resolver.list_users().await
    }

    pub async fn queues(&self) -> Result<Vec<QueueInfo>> {
        self.resolver.list_queues().await
    }

    pub async fn reason_codes(&self) -> Result<Vec<ReasonCodeInfo>> {
        self.resolver.list_reason_codes().await
    }

    pub async fn stats_filter_settings(&self) -> Result<StatsFilterSettings> {
        self.auth
            .request_json(&ApiRequest::get(self.filter_settings_path()))
            .await
    }

    pub async fn set_stats_filter_settings(&self, settings: &StatsFilterSettings) -> Result<()> {
        let request = ApiRequest::put(self.filter_settings_path()).json(settings)?;
        self.auth.request(&request).await?;
        Ok(())
    }

    /// Ask the server to push a fresh full snapshot on the stream.
    pub async fn request_full_statistics(&self) -> Result<()> {
        let request = ApiRequest::put(format!(
            "{}/request_full_statistics",
            self.auth.role().user_path()
        ));
        self.auth.request(&request).await?;
        Ok(())
    }

    fn filter_settings_path(&self) -> String {
        format!("{}/stats_filter_settings", self.auth.role().user_path())
    }
}

impl std::fmt::Debug for SupervisorService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorService")
            .field("auth", &self.auth)
            .field("push", &self.push)
            .finish_non_exhaustive()
    }
}

/// Re-key `items` by a display name taken from `metadata`. Entries whose id
/// has no metadata are left out.
fn project<K, V, I, N>(
    view: &str,
    items: HashMap<K, V>,
    metadata: &HashMap<K, I>,
    name_of: impl Fn(&I) -> N,
) -> HashMap<N, V>
where
    K: Eq + Hash + Display,
    N: Eq + Hash,
{
    let mut projected = HashMap::with_capacity(items.len());
    let mut skipped = Vec::new();
    for (id, value) in items {
        match metadata.get(&id) {
            Some(info) => {
                projected.insert(name_of(info), value);
            }
            None => skipped.push(id.to_string()),
        }
    }

    if !skipped.is_empty() {
        skipped.sort();
        warn!(
            "{view}: skipped {} entr{} with unknown id(s): {}",
            skipped.len(),
            if skipped.len() == 1 { "y" } else { "ies" },
            skipped.join(", ")
        );
    }
    projected
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_protocol::UserState;

    #[test]
    fn test_project_skips_unknown_ids() {
        let items = HashMap::from([
            (
                UserId::new("1"),
                AgentState {
                    state: UserState::Ready,
                    ..Default::default()
                },
            ),
            (UserId::new("ghost"), AgentState::default()),
        ]);
        let agents = HashMap::from([(
            UserId::new("1"),
            AgentInfo {
                id: UserId::new("1"),
                user_name: UserName::new("alice@example.com"),
                ..Default::default()
            },
        )]);

        let view = project("agent states", items, &agents, |info| info.user_name.clone());

        assert_eq!(view.len(), 1);
        assert_eq!(
            view[&UserName::new("alice@example.com")].state,
            UserState::Ready
        );
    }
}
