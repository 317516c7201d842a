//! Store implementations for agentgraph.
//!
//! - Long-term memory: [`InMemoryLongTermStore`] (keyword ranking, optional
//!   embedding ranking fused with RRF) and [`NoopLongTermStore`].
//! - Session metadata: [`OptimisticSessionStore`] over any [`VersionedKv`]
//!   (in-memory, or SQLite behind the `sqlite` feature).

pub mod noop;
pub mod in_memory;
pub mod vector;
pub mod versioned;
pub mod session;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use noop::NoopLongTermStore;
pub use in_memory::InMemoryLongTermStore;
pub use vector::{cosine_similarity, keyword_overlap, reciprocal_rank_fusion};
pub use versioned::{InMemoryVersionedKv, VersionedKv};
pub use session::OptimisticSessionStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteVersionedKv;
