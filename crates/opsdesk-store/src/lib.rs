//! Entity store boundary for the opsdesk configuration layer.
//!
//! The hosted low-code entity store is modelled by the [`EntityStore`] trait.
//! [`InMemoryEntityStore`] reproduces its weak guarantees for tests, and
//! [`SqliteEntityStore`] (feature `sqlite`) is a durable local backend.

pub mod memory_store;
pub mod query;
pub mod record;
pub mod store;

#[cfg(feature = "sqlite")]
pub mod sqlite_store;

pub use memory_store::InMemoryEntityStore;
pub use query::*;
pub use record::*;
pub use store::*;

#[cfg(feature = "sqlite")]
pub use sqlite_store::SqliteEntityStore;
