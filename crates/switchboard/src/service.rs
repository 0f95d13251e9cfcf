//! Service facade: wires transports, authenticators and caches per role.

use std::sync::Arc;

use crate::agent::AgentService;
use crate::auth::{ApiRole, Authenticator};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::executor::RequestExecutor;
use crate::push::{PushConnectionManager, PushConnector, StatsCaches, WsConnector};
use crate::resolver::{MetadataCaches, MetadataResolver};
use crate::supervisor::SupervisorService;
use crate::transport::{HttpTransport, RequestPreprocessor, ReqwestTransport};

/// Entry point. Each role logs in independently on first use.
#[derive(Debug)]
pub struct Service {
    supervisor: SupervisorService,
    agent: AgentService,
}

impl Service {
    pub fn builder(config: ClientConfig) -> ServiceBuilder {
        ServiceBuilder::new(config)
    }

    /// Production wiring: reqwest and tokio-tungstenite.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn supervisor(&self) -> &SupervisorService {
        &self.supervisor
    }

    pub fn agent(&self) -> &AgentService {
        &self.agent
    }
}

pub struct ServiceBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn HttpTransport>>,
    connector: Option<Arc<dyn PushConnector>>,
    preprocessors: Vec<RequestPreprocessor>,
}

impl ServiceBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            connector: None,
            preprocessors: Vec::new(),
        }
    }

    /// Replace the HTTP transport.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the push connector.
    pub fn push_connector(mut self, connector: Arc<dyn PushConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Add a hook run on every outgoing REST request.
    pub fn request_preprocessor(mut self, preprocessor: RequestPreprocessor) -> Self {
        self.preprocessors.push(preprocessor);
        self
    }

    pub fn build(self) -> Result<Service> {
        let config = self.config;
        config.validate()?;
        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(config.http_timeout())?),
        };
        let connector: Arc<dyn PushConnector> =
            self.connector.unwrap_or_else(|| Arc::new(WsConnector));
        let executor = RequestExecutor::new(transport).with_preprocessors(self.preprocessors);

        let authenticator = |role| {
            Arc::new(Authenticator::new(
                role,
                executor.clone(),
                config.credentials.clone(),
                config.login_base_url.clone(),
                config.auth.clone(),
            ))
        };
        let supervisor_auth = authenticator(ApiRole::Supervisor);
        let agent_auth = authenticator(ApiRole::Agent);

        let metadata = Arc::new(MetadataCaches::new(config.metadata_max_age()));
        let stats = Arc::new(StatsCaches::new(config.stats_max_age()));
        let push = PushConnectionManager::new(
            supervisor_auth.clone(),
            connector,
            stats.clone(),
            metadata.clone(),
            config.heartbeat.clone(),
            config.shutdown_grace(),
        );

        let supervisor = SupervisorService::new(
            supervisor_auth.clone(),
            MetadataResolver::new(supervisor_auth, metadata),
            stats,
            push,
        );
        let agent = AgentService::new(agent_auth);

        Ok(Service { supervisor, agent })
    }
}
