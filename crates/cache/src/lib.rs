//! Local chapter store.
//!
//! The store is the local, durable half of synchronization: what the user
//! has already seen of every content unit, when each unit was last synced,
//! and the user's reading progress. Sources are the truth for chapter
//! metadata; the store is the truth for progress.
//!
//! # Architecture
//! - [`LocalStore`] is the interface everything else talks to, through a
//!   [`StoreHandle`].
//! - Writes are staged per content unit and committed with
//!   [`LocalStore::save_if_changed`] in one transaction.
//! - [`Repository`] persists to SQLite through a [`Database`] pool;
//!   `MemoryStore` (feature `mock`) keeps everything in memory for tests.

mod db;
pub mod error;
#[cfg(feature = "mock")]
mod memory;
mod models;
mod record;
mod repo;
mod store;

pub use crate::db::Database;
#[cfg(feature = "mock")]
pub use crate::memory::MemoryStore;
pub use crate::record::{ChapterRecord, UnitRecord};
pub use crate::repo::Repository;
pub use crate::store::{LocalStore, SaveOutcome, StoreHandle};
