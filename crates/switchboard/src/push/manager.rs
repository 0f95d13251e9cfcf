//! Push connection manager.
//!
//! One [`PushConnectionManager::run`] call is one connection: it logs in if
//! needed, opens the channel, runs the heartbeat, snapshot and reader tasks
//! under a shared scope, and returns the first fatal cause once everything has
//! been torn down. Reconnect policy belongs to the caller.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use switchboard_protocol::PING_FRAME;

use crate::auth::Authenticator;
use crate::config::HeartbeatConfig;
use crate::error::{Error, Result};
use crate::push::caches::StatsCaches;
use crate::push::connection::{PushChannel, PushConnector};
use crate::push::reconciler::EventReconciler;
use crate::resolver::MetadataCaches;
use crate::transport::ApiRequest;

/// Path prefix of the statistics stream on the API host.
const PUSH_PATH: &str = "supsvcs/sws";

/// `wss://<host>/supsvcs/sws/<fresh uuid>`.
pub fn push_url(api_host: &str) -> String {
    format!("wss://{api_host}/{PUSH_PATH}/{}", Uuid::new_v4())
}

pub struct PushConnectionManager {
    auth: Arc<Authenticator>,
    connector: Arc<dyn PushConnector>,
    stats: Arc<StatsCaches>,
    metadata: Arc<MetadataCaches>,
    reconciler: Arc<EventReconciler>,
    heartbeat: HeartbeatConfig,
    shutdown_grace: Duration,
    live_tasks: Arc<AtomicUsize>,
}

impl PushConnectionManager {
    pub fn new(
        auth: Arc<Authenticator>,
        connector: Arc<dyn PushConnector>,
        stats: Arc<StatsCaches>,
        metadata: Arc<MetadataCaches>,
        heartbeat: HeartbeatConfig,
        shutdown_grace: Duration,
    ) -> Self {
        let reconciler = Arc::new(EventReconciler::new(stats.clone(), metadata.clone()));
        Self {
            auth,
            connector,
            stats,
            metadata,
            reconciler,
            heartbeat,
            shutdown_grace,
            live_tasks: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Connection tasks spawned by [`run`](Self::run) that have not exited yet.
    pub fn live_tasks(&self) -> usize {
        self.live_tasks.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &Arc<StatsCaches> {
        &self.stats
    }

    /// Run one connection until the first fatal error or until `cancel`
    /// fires. Always returns an error: the fatal cause, or
    /// [`Error::Cancelled`]. Caches are empty and not ready on return.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.reset_caches();
        let outcome = self.serve(cancel).await;
        self.reset_caches();
        match outcome {
            Ok(()) => Err(Error::Cancelled),
            Err(err) => Err(err),
        }
    }

    fn reset_caches(&self) {
        self.stats.reset_all();
        self.metadata.reset_all();
    }

    async fn serve(&self, cancel: CancellationToken) -> Result<()> {
        let session = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            session = self.auth.session() => session?,
        };

        let url = push_url(&session.api_host);
        let headers: Vec<(String, String)> = session
            .cookie
            .iter()
            .map(|cookie| ("Cookie".to_string(), cookie.clone()))
            .collect();

        let channel: Arc<dyn PushChannel> = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            channel = self.connector.connect(&url, &headers) => Arc::from(channel?),
        };
        info!("push connection open: {url}");

        let connected_at = Instant::now();
        self.stats.record_pong();

        let scope = Scope::new(cancel.child_token());
        let mut tasks = JoinSet::new();

        self.spawn(
            &mut tasks,
            &scope,
            ping(channel.clone(), self.heartbeat.ping_interval()),
        );
        self.spawn(
            &mut tasks,
            &scope,
            monitor(
                self.stats.clone(),
                connected_at,
                self.heartbeat.monitor_interval(),
                self.heartbeat.timeout(),
            ),
        );
        self.spawn(&mut tasks, &scope, request_snapshot(self.auth.clone()));
        self.spawn(
            &mut tasks,
            &scope,
            read_frames(channel.clone(), self.reconciler.clone()),
        );

        supervise(&mut tasks, &scope).await;

        if tokio::time::timeout(self.shutdown_grace, channel.close())
            .await
            .is_err()
        {
            debug!("push channel close timed out");
        }

        let drain = async { while tasks.join_next().await.is_some() {} };
        if tokio::time::timeout(self.shutdown_grace, drain).await.is_err() {
            warn!(
                "aborting {} push task(s) after {:?}",
                tasks.len(),
                self.shutdown_grace
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
        info!("push connection closed: {url}");

        match scope.take_cause() {
            Some(cause) => Err(cause),
            None => Ok(()),
        }
    }

    /// Spawn a task that exits on scope cancellation and cancels the scope
    /// when it fails.
    fn spawn<F>(&self, tasks: &mut JoinSet<()>, scope: &Scope, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let guard = TaskGuard::enter(&self.live_tasks);
        let scope = scope.clone();
        tasks.spawn(async move {
            let _guard = guard;
            tokio::select! {
                biased;
                _ = scope.token.cancelled() => {}
                result = task => {
                    if let Err(err) = result {
                        scope.fail(err);
                    }
                }
            }
        });
    }
}

/// Wait until the scope is cancelled. A task that panics fails the scope.
async fn supervise(tasks: &mut JoinSet<()>, scope: &Scope) {
    loop {
        tokio::select! {
            biased;
            _ = scope.token.cancelled() => return,
            joined = tasks.join_next() => match joined {
                Some(Err(err)) if err.is_panic() => {
                    scope.fail(Error::TaskFailed(err.to_string()));
                }
                Some(_) => {}
                None => return,
            },
        }
    }
}

impl std::fmt::Debug for PushConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushConnectionManager")
            .field("heartbeat", &self.heartbeat)
            .field("shutdown_grace", &self.shutdown_grace)
            .field("live_tasks", &self.live_tasks())
            .finish_non_exhaustive()
    }
}

/// Cancellation scope shared by one connection's tasks. The first failure
/// is kept as the cause; later ones are dropped.
#[derive(Clone)]
struct Scope {
    token: CancellationToken,
    cause: Arc<Mutex<Option<Error>>>,
}

impl Scope {
    fn new(token: CancellationToken) -> Self {
        Self {
            token,
            cause: Arc::new(Mutex::new(None)),
        }
    }

    fn fail(&self, err: Error) {
        {
            let mut cause = self.cause.lock().unwrap_or_else(PoisonError::into_inner);
            if cause.is_none() {
                warn!("push connection failed: {err}");
                *cause = Some(err);
            } else {
                debug!("push connection already failing, dropping: {err}");
            }
        }
        self.token.cancel();
    }

    fn take_cause(&self) -> Option<Error> {
        self.cause
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

struct TaskGuard(Arc<AtomicUsize>);

impl TaskGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Connection tasks
// ============================================================================

/// Ping immediately, then on every interval.
async fn ping(channel: Arc<dyn PushChannel>, every: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        channel.write(PING_FRAME.as_bytes()).await?;
    }
}

async fn monitor(
    stats: Arc<StatsCaches>,
    connected_at: Instant,
    every: Duration,
    limit: Duration,
) -> Result<()> {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let elapsed = stats.last_pong().unwrap_or(connected_at).elapsed();
        if elapsed > limit {
            return Err(Error::HeartbeatTimeout { elapsed, limit });
        }
    }
}

async fn request_snapshot(auth: Arc<Authenticator>) -> Result<()> {
    let request = ApiRequest::put(format!(
        "{}/request_full_statistics",
        auth.role().user_path()
    ));
    auth.request(&request).await?;
    debug!("full statistics requested");
    Ok(())
}

async fn read_frames(channel: Arc<dyn PushChannel>, reconciler: Arc<EventReconciler>) -> Result<()> {
    loop {
        let frame = channel.read().await?;
        reconciler.handle(&frame)?;
    }
}
