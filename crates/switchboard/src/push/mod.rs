//! Statistics push stream: channel capability, caches, reconciler and the
//! connection manager that ties them together.

pub mod caches;
pub mod connection;
pub mod manager;
pub mod reconciler;

pub use caches::StatsCaches;
pub use connection::{PushChannel, PushConnector, WsConnector};
pub use manager::{PushConnectionManager, push_url};
pub use reconciler::EventReconciler;
