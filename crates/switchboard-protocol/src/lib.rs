//! Wire types for the contact-center session API and statistics stream.
//!
//! This crate defines the JSON shapes exchanged with the platform:
//!
//! ```text
//! Client --[REST: login, login state, listings]--> API host
//! Client <--[push: {"context":{"eventId":..},"payload":..}]-- API host
//! ```
//!
//! It performs no I/O. The engine crate owns sessions, connections and caches;
//! this crate only knows how the bytes look.
//!
//! ## Design Principles
//!
//! 1. **Closed catalogs.** Event codes and data-source tags are enums. Anything
//!    outside the catalog is reported as `None` by the lookup functions so the
//!    caller decides whether it is fatal.
//! 2. **No silent field loss.** Statistics records keep unknown keys in an
//!    `extra` map, so a record survives a decode/encode cycle intact.

pub mod events;
pub mod types;

pub use events::{
    DataSource, Envelope, EventContext, EventId, IncrementalSection, PING_FRAME, RemovedEntity,
    SnapshotSection,
};
pub use types::*;
