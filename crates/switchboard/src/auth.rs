//! Session authenticator.
//!
//! Owns one role's login handshake and the resulting [`Session`]. At most one
//! handshake runs at a time; concurrent callers wait for it and share the
//! outcome.

use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use switchboard_protocol::{
    LoginPayload, LoginResponse, LoginState, MaintenanceNotice, MaintenanceNoticeId, OrganizationId,
    PasswordCredentials, SessionId, StationInfo, TokenId, UserId,
};

use crate::config::AuthConfig;
use crate::error::{Error, Result, STATUS_SESSION_MIGRATED, STATUS_UNAUTHORIZED};
use crate::executor::RequestExecutor;
use crate::transport::{ApiRequest, HttpResponse, cookie_header};

/// Which login context a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiRole {
    Supervisor,
    Agent,
}

impl ApiRole {
    pub fn context_path(&self) -> &'static str {
        match self {
            ApiRole::Supervisor => "supsvcs/rs/svc",
            ApiRole::Agent => "appsvcs/rs/svc",
        }
    }

    pub fn role_path(&self) -> &'static str {
        match self {
            ApiRole::Supervisor => "supervisors",
            ApiRole::Agent => "agents",
        }
    }

    /// `/<context>/<role>/:userID`, the prefix of every per-user endpoint.
    pub fn user_path(&self) -> String {
        format!("/{}/{}/:userID", self.context_path(), self.role_path())
    }

    fn login_url(&self, base: &str) -> String {
        format!(
            "{}/{}/auth/login",
            base.trim_end_matches('/'),
            self.context_path()
        )
    }
}

/// Authenticated identity bound to one API host.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub token_id: TokenId,
    pub session_id: SessionId,
    pub org_id: OrganizationId,
    pub user_id: UserId,
    /// `host:port` every REST call and the push connection go to.
    pub api_host: String,
    /// `Cookie` header value carried by every authenticated request.
    pub cookie: Option<String>,
    pub login_state: LoginState,
}

impl Session {
    fn from_login(login: &LoginResponse, api_host: String, cookie: Option<String>) -> Self {
        Self {
            token_id: login.token_id.clone(),
            session_id: login.session_id.clone(),
            org_id: login.org_id.clone(),
            user_id: login.user_id.clone(),
            api_host,
            cookie,
            login_state: LoginState::NotLoggedIn,
        }
    }
}

pub struct Authenticator {
    role: ApiRole,
    executor: RequestExecutor,
    credentials: PasswordCredentials,
    login_base_url: String,
    retry: AuthConfig,
    session: RwLock<Option<Arc<Session>>>,
    login_lock: Mutex<()>,
}

impl Authenticator {
    pub fn new(
        role: ApiRole,
        executor: RequestExecutor,
        credentials: PasswordCredentials,
        login_base_url: impl Into<String>,
        retry: AuthConfig,
    ) -> Self {
        Self {
            role,
            executor,
            credentials,
            login_base_url: login_base_url.into(),
            retry,
            session: RwLock::new(None),
            login_lock: Mutex::new(()),
        }
    }

    pub fn role(&self) -> ApiRole {
        self.role
    }

    /// The published session, without any I/O.
    pub fn current(&self) -> Option<Arc<Session>> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drop the session so the next call logs in again.
    pub fn invalidate(&self) {
        let previous = self
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            info!("{:?} session invalidated", self.role);
        }
    }

    /// Drop the session only while it is still the one `used` was taken
    /// from. A session published by a newer login is kept.
    fn invalidate_used(&self, used: &Session) {
        let mut slot = self
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(current) if std::ptr::eq(Arc::as_ptr(current), used) => {
                *slot = None;
                info!("{:?} session invalidated", self.role);
            }
            Some(_) => debug!("{:?} session already replaced, keeping it", self.role),
            None => {}
        }
    }

    /// Return the current session, logging in first if there is none.
    pub async fn session(&self) -> Result<Arc<Session>> {
        if let Some(session) = self.current() {
            return Ok(session);
        }

        let _guard = self.login_lock.lock().await;
        if let Some(session) = self.current() {
            return Ok(session);
        }

        let session = Arc::new(self.handshake().await?);
        *self
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        Ok(session)
    }

    /// Send an authenticated request.
    pub async fn request(&self, request: &ApiRequest) -> Result<HttpResponse> {
        let session = self.session().await?;
        self.send_authenticated(&session, request).await
    }

    /// Send an authenticated request and decode its JSON body.
    pub async fn request_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T> {
        let response = self.request(request).await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    /// Retry 401 answers with a fixed delay; a migrated service drops the
    /// session and fails immediately.
    async fn send_authenticated(
        &self,
        session: &Session,
        request: &ApiRequest,
    ) -> Result<HttpResponse> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.executor.execute(request, Some(session)).await {
                Ok(response) => return Ok(response),
                Err(Error::Api(err)) if err.status == STATUS_UNAUTHORIZED => {
                    if attempts >= max_attempts {
                        return Err(Error::TransientAuth {
                            attempts,
                            source: err,
                        });
                    }
                    debug!(
                        "{} {} unauthorized (attempt {attempts}/{max_attempts}), retrying",
                        request.method, request.path
                    );
                    tokio::time::sleep(self.retry.retry_delay()).await;
                }
                Err(Error::Api(err)) if err.status == STATUS_SESSION_MIGRATED => {
                    warn!("{:?} service migrated: {err}", self.role);
                    self.invalidate_used(session);
                    return Err(Error::SessionMigrated(err));
                }
                Err(err) => return Err(err),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Handshake
    // ------------------------------------------------------------------------

    async fn handshake(&self) -> Result<Session> {
        let mut session = self.login().await?;
        info!(
            "{:?} logged in as user {} on {}",
            self.role, session.user_id, session.api_host
        );

        let metadata = ApiRequest::get(format!("/{}/auth/metadata", self.role.context_path()));
        self.send_authenticated(&session, &metadata).await?;

        let state = self.login_state(&session).await?;
        debug!("{:?} login state after login: {state:?}", self.role);

        let state = match state {
            LoginState::SelectStation => {
                self.start_session(&session).await?;
                self.after_restart(&session).await?
            }
            LoginState::Relogin => {
                let restart = ApiRequest::put(format!("{}/session_restart", self.role.user_path()));
                self.send_authenticated(&session, &restart).await?;
                self.after_restart(&session).await?
            }
            LoginState::AcceptNotice => self.accept_notices(&session).await?,
            other => other,
        };

        if state != LoginState::Working {
            warn!("{:?} handshake finished in state {state:?}", self.role);
        }
        session.login_state = state;
        Ok(session)
    }

    async fn login(&self) -> Result<Session> {
        let request = ApiRequest::post(self.role.login_url(&self.login_base_url))
            .json(&LoginPayload::new(self.credentials.clone()))?;
        let response = self.executor.execute(&request, None).await?;
        let login: LoginResponse = serde_json::from_slice(&response.body)?;

        let api_host = login
            .active_api_server()
            .unwrap_or_else(|| host_of(&self.login_base_url));
        Ok(Session::from_login(&login, api_host, cookie_header(&response)))
    }

    async fn login_state(&self, session: &Session) -> Result<LoginState> {
        let request = ApiRequest::get(format!("{}/login_state", self.role.user_path()));
        let response = self.send_authenticated(session, &request).await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    async fn start_session(&self, session: &Session) -> Result<()> {
        let request = ApiRequest::put(format!(
            "{}/session_start?force=true",
            self.role.user_path()
        ))
        .json(&StationInfo::empty())?;
        self.send_authenticated(session, &request).await?;
        Ok(())
    }

    /// Re-query after starting or restarting; handle notices if asked to.
    async fn after_restart(&self, session: &Session) -> Result<LoginState> {
        match self.login_state(session).await? {
            LoginState::AcceptNotice => self.accept_notices(session).await,
            state => Ok(state),
        }
    }

    async fn accept_notices(&self, session: &Session) -> Result<LoginState> {
        let notices = self.maintenance_notices(session).await?;
        for notice in &notices {
            self.accept_notice(session, notice).await?;
        }
        info!("{:?} accepted {} maintenance notice(s)", self.role, notices.len());

        if self.login_state(session).await? != LoginState::Working {
            self.start_session(session).await?;
        }
        Ok(LoginState::Working)
    }

    async fn maintenance_notices(&self, session: &Session) -> Result<Vec<MaintenanceNotice>> {
        let request = ApiRequest::get(format!("{}/maintenance_notices", self.role.user_path()));
        let response = self.send_authenticated(session, &request).await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    async fn accept_notice(&self, session: &Session, notice: &MaintenanceNotice) -> Result<()> {
        let request = notice_accept_request(self.role, &notice.id);
        self.send_authenticated(session, &request).await?;
        Ok(())
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("role", &self.role)
            .field("login_base_url", &self.login_base_url)
            .field("logged_in", &self.current().is_some())
            .finish_non_exhaustive()
    }
}

pub(crate) fn notice_accept_request(role: ApiRole, id: &MaintenanceNoticeId) -> ApiRequest {
    ApiRequest::put(format!(
        "{}/maintenance_notices/{id}/accept",
        role.user_path()
    ))
}

/// `host:port` of a base URL, defaulting to port 443.
fn host_of(base_url: &str) -> String {
    let without_scheme = base_url
        .strip_prefix("https://")
        .or_else(|| base_url.strip_prefix("http://"))
        .unwrap_or(base_url);
    let host = without_scheme.split('/').next().unwrap_or(without_scheme);
    if host.contains(':') {
        host.to_string()
    } else {
        format!("{host}:443")
    }
}
