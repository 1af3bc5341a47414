//! opsdesk-config - persisted JSON configuration over a size-limited store
//!
//! The hosted entity store caps text fields, offers no transactions and no
//! unique constraints, and its filters are only eventually consistent. This
//! crate keeps large JSON blobs (roles, app-wide settings) readable anyway:
//!
//! - **Envelope**: versioned wrapper carrying a writer-assigned logical timestamp
//! - **Chunk**: splitting oversized JSON across records and reassembling it
//! - **Resolver**: multi-tier discovery and newest-generation selection
//! - **Facade**: [`ConfigStore`] with `load` / `save` / `upsert`
//! - **Cleanup**: background retirement of superseded generations
//!
//! # Write discipline
//!
//! ```text
//! save(key, data) → [chunks] → new master → read-back → queue old generations
//! load(key)       → discover → rank by _ts → [reassemble] → data | fallback
//! ```

pub mod chunk;
pub mod cleanup;
pub mod clock;
pub mod envelope;
pub mod error;
pub mod facade;
pub mod resolver;
pub mod settings;

pub use cleanup::{cleanup_generation, CleanupJob, CleanupQueue, CleanupReport, OrphanRecord};
pub use clock::LogicalClock;
pub use envelope::{decode, encode, ChunkRefs, Envelope, EnvelopeVersion};
pub use error::{ConfigError, Result};
pub use facade::{ConfigStore, SaveReceipt, WriteMode};
pub use resolver::{discover, discover_and_resolve, resolve, Candidate, CandidateSummary, Resolution};
pub use settings::{ConfigStoreSettings, DEFAULT_CHUNK_THRESHOLD, DEFAULT_SCAN_LIMIT};
