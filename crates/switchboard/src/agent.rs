//! Agent service: REST calls made in the agent login context.

use std::sync::Arc;

use switchboard_protocol::{MaintenanceNotice, MaintenanceNoticeId, ReasonCodeInfo};

use crate::auth::{Authenticator, notice_accept_request};
use crate::error::Result;
use crate::resolver;
use crate::transport::ApiRequest;

#[derive(Debug)]
pub struct AgentService {
    auth: Arc<Authenticator>,
}

impl AgentService {
    pub fn new(auth: Arc<Authenticator>) -> Self {
        Self { auth }
    }

    pub fn authenticator(&self) -> &Arc<Authenticator> {
        &self.auth
    }

    /// Maintenance notices pending for the logged-in agent.
    pub async fn maintenance_notices(&self) -> Result<Vec<MaintenanceNotice>> {
        let request = ApiRequest::get(format!(
            "{}/maintenance_notices",
            self.auth.role().user_path()
        ));
        self.auth.request_json(&request).await
    }

    pub async fn accept_maintenance_notice(
        &self,
        id: &MaintenanceNoticeId,
    ) -> Result<MaintenanceNotice> {
        self.auth
            .request_json(&notice_accept_request(self.auth.role(), id))
            .await
    }

    /// Logout reason codes followed by not-ready reason codes.
    pub async fn reason_codes(&self) -> Result<Vec<ReasonCodeInfo>> {
        resolver::list_reason_codes(&self.auth).await
    }
}
