//! The local store interface and its write staging.
//!
//! Writes never reach storage directly. [`create_or_update_chapter_record`]
//! and [`update_last_sync_at`] stage changes per content unit, reads see the
//! staged changes layered over what is stored, and [`save_if_changed`]
//! commits a unit's staged changes in one transaction. Staging per unit means
//! two syncs for different units never commit each other's work.
//!
//! [`create_or_update_chapter_record`]: LocalStore::create_or_update_chapter_record
//! [`update_last_sync_at`]: LocalStore::update_last_sync_at
//! [`save_if_changed`]: LocalStore::save_if_changed

use crate::error::{Error, Result};
use crate::record::{ChapterRecord, UnitRecord};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use time::UtcDateTime;
use tokio::sync::Mutex;

pub type StoreHandle = Arc<dyn LocalStore + Send + Sync>;

/// What [`LocalStore::save_if_changed`] did.
#[derive(Debug)]
pub enum SaveOutcome {
    /// Staged changes were committed.
    Applied,
    /// Nothing was staged for the unit.
    NoChanges,
    /// The commit failed. Whether the changes are still staged depends on
    /// the `rollback_on_error` argument.
    Failed(Error),
}

impl SaveOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Durable keyed storage for chapter metadata and reading progress.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// The unit's sync bookkeeping, or `None` if nothing about the unit has
    /// been stored or staged.
    async fn get_unit(&self, unit_id: &str) -> Result<Option<UnitRecord>>;

    /// Every chapter of the unit, in canonical order.
    async fn get_all_chapter_records(&self, unit_id: &str) -> Result<Vec<ChapterRecord>>;

    async fn get_chapter_record(&self, unit_id: &str, chapter_id: &str) -> Result<Option<ChapterRecord>>;

    /// Stage `record`, returning what the store now holds for its id.
    ///
    /// An existing record keeps its reading progress: only metadata is taken
    /// from `record`. Nothing is staged when the result equals what is already
    /// there.
    async fn create_or_update_chapter_record(&self, unit_id: &str, record: &ChapterRecord) -> Result<ChapterRecord>;

    async fn update_last_sync_at(&self, unit_id: &str, at: UtcDateTime) -> Result<()>;

    /// Commit the unit's staged changes in one transaction.
    ///
    /// On failure the staged changes are discarded when `rollback_on_error`
    /// is set, and kept for a later attempt otherwise.
    async fn save_if_changed(&self, unit_id: &str, rollback_on_error: bool) -> SaveOutcome;

    /// Drop everything staged for the unit without committing it.
    async fn discard_changes(&self, unit_id: &str);

    /// Mark a chapter read or unread. Takes effect immediately.
    async fn set_read(&self, unit_id: &str, chapter_id: &str, is_read: bool) -> Result<()>;

    /// Record the last page read in a chapter. Takes effect immediately.
    async fn set_last_page_read(&self, unit_id: &str, chapter_id: &str, page: Option<u32>) -> Result<()>;
}

/// Uncommitted changes of one content unit.
#[derive(Debug, Clone, Default)]
pub(crate) struct Changes {
    pub(crate) chapters: BTreeMap<String, ChapterRecord>,
    pub(crate) last_sync_at: Option<UtcDateTime>,
}

impl Changes {
    pub(crate) fn is_empty(&self) -> bool {
        self.chapters.is_empty() && self.last_sync_at.is_none()
    }

    /// Fold older changes back in underneath these ones.
    fn absorb_older(&mut self, older: Changes) {
        for (id, record) in older.chapters {
            self.chapters.entry(id).or_insert(record);
        }
        self.last_sync_at = self.last_sync_at.or(older.last_sync_at);
    }
}

/// Per-unit staging area shared by every store implementation.
#[derive(Debug, Default)]
pub(crate) struct Staging {
    units: Mutex<HashMap<String, Changes>>,
}

impl Staging {
    pub(crate) async fn has_changes(&self, unit_id: &str) -> bool {
        self.units.lock().await.get(unit_id).is_some_and(|changes| !changes.is_empty())
    }

    pub(crate) async fn last_sync_at(&self, unit_id: &str) -> Option<UtcDateTime> {
        self.units.lock().await.get(unit_id).and_then(|changes| changes.last_sync_at)
    }

    pub(crate) async fn chapter(&self, unit_id: &str, chapter_id: &str) -> Option<ChapterRecord> {
        let units = self.units.lock().await;
        units.get(unit_id).and_then(|changes| changes.chapters.get(chapter_id).cloned())
    }

    /// Layer staged chapters over `stored`, returning them in canonical order.
    pub(crate) async fn overlay(&self, unit_id: &str, stored: Vec<ChapterRecord>) -> Vec<ChapterRecord> {
        let mut merged: BTreeMap<String, ChapterRecord> =
            stored.into_iter().map(|record| (record.id.clone(), record)).collect();
        if let Some(changes) = self.units.lock().await.get(unit_id) {
            for (id, record) in &changes.chapters {
                merged.insert(id.clone(), record.clone());
            }
        }
        let mut records: Vec<_> = merged.into_values().collect();
        ChapterRecord::sort(&mut records);
        records
    }

    /// Stage `record` on top of `current` (whatever the store holds right
    /// now, staged or not) and return the resulting record.
    pub(crate) async fn stage_chapter(
        &self,
        unit_id: &str,
        current: Option<ChapterRecord>,
        record: &ChapterRecord,
    ) -> ChapterRecord {
        let next = match &current {
            Some(current) => record.clone().with_progress_of(current),
            None => record.clone(),
        };
        if current.as_ref() == Some(&next) {
            return next;
        }
        let mut units = self.units.lock().await;
        let changes = units.entry(unit_id.to_string()).or_default();
        changes.chapters.insert(next.id.clone(), next.clone());
        next
    }

    pub(crate) async fn stage_last_sync_at(&self, unit_id: &str, at: UtcDateTime) {
        self.units.lock().await.entry(unit_id.to_string()).or_default().last_sync_at = Some(at);
    }

    /// Apply a progress write to the staged copy of a chapter, if there is
    /// one. Returns whether a staged copy existed.
    pub(crate) async fn update_chapter(
        &self,
        unit_id: &str,
        chapter_id: &str,
        f: impl FnOnce(&mut ChapterRecord),
    ) -> bool {
        let mut units = self.units.lock().await;
        match units.get_mut(unit_id).and_then(|changes| changes.chapters.get_mut(chapter_id)) {
            Some(record) => {
                f(record);
                true
            },
            None => false,
        }
    }

    /// Remove and return everything staged for the unit.
    pub(crate) async fn take(&self, unit_id: &str) -> Changes {
        self.units.lock().await.remove(unit_id).unwrap_or_default()
    }

    /// Settle a failed commit of `changes`: drop them, or put them back under
    /// anything staged since they were taken.
    pub(crate) async fn settle_failure(&self, unit_id: &str, changes: Changes, rollback: bool) {
        if rollback {
            tracing::debug!(unit = unit_id, chapters = changes.chapters.len(), "Rolled back staged changes");
            return;
        }
        let mut units = self.units.lock().await;
        units.entry(unit_id.to_string()).or_default().absorb_older(changes);
    }
}
