//! Chapter list synchronization.

mod engine;
mod merge;

pub use crate::chapters::engine::ChapterSyncEngine;
