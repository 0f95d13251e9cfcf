//! Metadata resolver: read-through caches of users, queues and reason codes.
//!
//! Reference data changes rarely, so each listing is fetched once and served
//! from its cache until the cache goes stale or is reset by an invalidation
//! event. Concurrent stale reads may both refetch; the last replace wins.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use switchboard_protocol::{
    AgentInfo, Keyed, QueueId, QueueInfo, ReasonCodeId, ReasonCodeInfo, UserId,
};

use crate::auth::Authenticator;
use crate::cache::TypedCache;
use crate::error::Result;
use crate::transport::ApiRequest;

/// One cache per reference listing.
#[derive(Debug)]
pub struct MetadataCaches {
    pub agents: TypedCache<UserId, AgentInfo>,
    pub queues: TypedCache<QueueId, QueueInfo>,
    pub reason_codes: TypedCache<ReasonCodeId, ReasonCodeInfo>,
}

impl MetadataCaches {
    pub fn new(max_age: Duration) -> Self {
        Self {
            agents: TypedCache::new(Some(max_age)),
            queues: TypedCache::new(Some(max_age)),
            reason_codes: TypedCache::new(Some(max_age)),
        }
    }

    pub fn reset_all(&self) {
        self.agents.reset();
        self.queues.reset();
        self.reason_codes.reset();
    }
}

#[derive(Debug, Clone)]
pub struct MetadataResolver {
    auth: Arc<Authenticator>,
    caches: Arc<MetadataCaches>,
}

impl MetadataResolver {
    pub fn new(auth: Arc<Authenticator>, caches: Arc<MetadataCaches>) -> Self {
        Self { auth, caches }
    }

    pub fn caches(&self) -> &Arc<MetadataCaches> {
        &self.caches
    }

    /// Every user in the domain, uncached.
    pub async fn list_users(&self) -> Result<Vec<AgentInfo>> {
        self.auth
            .request_json(&ApiRequest::get(org_path(&self.auth, "users")))
            .await
    }

    /// Every queue (skill) in the domain, uncached.
    pub async fn list_queues(&self) -> Result<Vec<QueueInfo>> {
        self.auth
            .request_json(&ApiRequest::get(org_path(&self.auth, "skills")))
            .await
    }

    /// Logout reason codes followed by not-ready reason codes, uncached.
    pub async fn list_reason_codes(&self) -> Result<Vec<ReasonCodeInfo>> {
        list_reason_codes(&self.auth).await
    }

    pub async fn agents(&self) -> Result<HashMap<UserId, AgentInfo>> {
        read_through(&self.caches.agents, "users", self.list_users()).await
    }

    pub async fn queues(&self) -> Result<HashMap<QueueId, QueueInfo>> {
        read_through(&self.caches.queues, "queues", self.list_queues()).await
    }

    pub async fn reason_codes(&self) -> Result<HashMap<ReasonCodeId, ReasonCodeInfo>> {
        read_through(
            &self.caches.reason_codes,
            "reason codes",
            self.list_reason_codes(),
        )
        .await
    }
}

fn org_path(auth: &Authenticator, listing: &str) -> String {
    format!(
        "/{}/orgs/:organizationID/{listing}",
        auth.role().context_path()
    )
}

/// Logout reason codes followed by not-ready reason codes, in `auth`'s
/// login context.
pub async fn list_reason_codes(auth: &Authenticator) -> Result<Vec<ReasonCodeInfo>> {
    let mut codes: Vec<ReasonCodeInfo> = auth
        .request_json(&ApiRequest::get(org_path(auth, "logout_reason_codes")))
        .await?;
    let not_ready: Vec<ReasonCodeInfo> = auth
        .request_json(&ApiRequest::get(org_path(auth, "not_ready_reason_codes")))
        .await?;
    codes.extend(not_ready);
    Ok(codes)
}

/// Serve a fresh cache, otherwise fetch, replace and return the fetched map.
/// The fetch future is only polled on a miss.
async fn read_through<V, F>(
    cache: &TypedCache<V::Key, V>,
    what: &str,
    fetch: F,
) -> Result<HashMap<V::Key, V>>
where
    V: Keyed + Clone,
    F: Future<Output = Result<Vec<V>>>,
{
    match cache.get_all() {
        Ok(snapshot) => return Ok(snapshot.items),
        Err(reason) => debug!("refreshing {what}: {reason}"),
    }

    let fresh = by_key(fetch.await?);
    cache.replace(fresh.clone());
    Ok(fresh)
}

/// Index records by their key; later duplicates win.
pub fn by_key<V: Keyed>(records: Vec<V>) -> HashMap<V::Key, V> {
    records
        .into_iter()
        .map(|record| (record.key(), record))
        .collect()
}
