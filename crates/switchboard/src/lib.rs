//! Switchboard client engine
//!
//! Authenticated REST access and a live statistics stream for a hosted
//! contact-center platform. The [`Service`] facade owns one authenticator per
//! login role; the supervisor side additionally runs the push connection that
//! keeps the statistics caches current.

pub mod agent;
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod push;
pub mod resolver;
pub mod service;
pub mod supervisor;
pub mod transport;

pub use agent::AgentService;
pub use auth::{ApiRole, Authenticator, Session};
pub use cache::{CacheSnapshot, TypedCache};
pub use config::ClientConfig;
pub use error::{ApiError, CacheError, Error, FrameError, Result};
pub use executor::RequestExecutor;
pub use push::{
    EventReconciler, PushChannel, PushConnectionManager, PushConnector, StatsCaches, WsConnector,
};
pub use resolver::{MetadataCaches, MetadataResolver};
pub use service::{Service, ServiceBuilder};
pub use supervisor::SupervisorService;
pub use transport::{
    ApiRequest, HttpRequest, HttpResponse, HttpTransport, RequestPreprocessor, ReqwestTransport,
};

pub use switchboard_protocol as protocol;
