//! In-memory store for testing.

use crate::error::{ErrorKind, Result};
use crate::record::{ChapterRecord, UnitRecord};
use crate::store::{Changes, LocalStore, SaveOutcome, Staging};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use time::UtcDateTime;
use tokio::sync::RwLock;

#[derive(Debug, Default, Clone)]
struct StoredUnit {
    last_sync_at: Option<UtcDateTime>,
    chapters: BTreeMap<String, ChapterRecord>,
}

/// In-memory [`LocalStore`] for testing.
///
/// Behaves like [`Repository`](crate::Repository) (same staging, same
/// progress-preserving commits) without a database. Commits can be made to
/// fail on demand.
///
/// # Examples
///
/// ```
/// use tanko_cache::{LocalStore, MemoryStore, SaveOutcome};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MemoryStore::default();
/// store.update_last_sync_at("berserk", time::UtcDateTime::UNIX_EPOCH).await?;
/// store.fail_next_saves(1);
/// assert!(matches!(store.save_if_changed("berserk", false).await, SaveOutcome::Failed(_)));
/// assert!(matches!(store.save_if_changed("berserk", false).await, SaveOutcome::Applied));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    units: RwLock<HashMap<String, StoredUnit>>,
    staging: Staging,
    failing_saves: AtomicUsize,
    save_calls: AtomicUsize,
}

impl MemoryStore {
    /// Pre-populate a committed unit.
    pub fn with_unit(
        mut self,
        unit_id: impl Into<String>,
        last_sync_at: Option<UtcDateTime>,
        chapters: impl IntoIterator<Item = ChapterRecord>,
    ) -> Self {
        let chapters = chapters.into_iter().map(|record| (record.id.clone(), record)).collect();
        self.units.get_mut().insert(unit_id.into(), StoredUnit { last_sync_at, chapters });
        self
    }

    /// Make the next `count` commits fail.
    pub fn fail_next_saves(&self, count: usize) {
        self.failing_saves.store(count, Ordering::SeqCst);
    }

    /// Number of [`save_if_changed`](LocalStore::save_if_changed) calls that
    /// had something to commit.
    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    /// Committed chapters of a unit, ignoring anything staged, in canonical
    /// order.
    pub async fn committed_chapters(&self, unit_id: &str) -> Vec<ChapterRecord> {
        let units = self.units.read().await;
        let mut records: Vec<_> =
            units.get(unit_id).map(|unit| unit.chapters.values().cloned().collect()).unwrap_or_default();
        ChapterRecord::sort(&mut records);
        records
    }

    /// Committed last sync time of a unit, ignoring anything staged.
    pub async fn committed_last_sync_at(&self, unit_id: &str) -> Option<UtcDateTime> {
        self.units.read().await.get(unit_id).and_then(|unit| unit.last_sync_at)
    }

    async fn commit(&self, unit_id: &str, changes: &Changes) -> Result<()> {
        let failing = self.failing_saves.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            exn::bail!(ErrorKind::Database);
        }
        let mut units = self.units.write().await;
        let unit = units.entry(unit_id.to_string()).or_default();
        for (id, record) in &changes.chapters {
            let record = match unit.chapters.get(id) {
                Some(existing) => record.clone().with_progress_of(existing),
                None => record.clone(),
            };
            unit.chapters.insert(id.clone(), record);
        }
        if let Some(at) = changes.last_sync_at {
            unit.last_sync_at = Some(at);
        }
        Ok(())
    }

    async fn update_committed(&self, unit_id: &str, chapter_id: &str, f: impl FnOnce(&mut ChapterRecord)) -> bool {
        let mut units = self.units.write().await;
        match units.get_mut(unit_id).and_then(|unit| unit.chapters.get_mut(chapter_id)) {
            Some(record) => {
                f(record);
                true
            },
            None => false,
        }
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn get_unit(&self, unit_id: &str) -> Result<Option<UnitRecord>> {
        let staged_sync = self.staging.last_sync_at(unit_id).await;
        let staged = self.staging.has_changes(unit_id).await;
        let stored = self.units.read().await.get(unit_id).map(|unit| unit.last_sync_at);
        Ok(match stored {
            Some(last_sync_at) => Some(UnitRecord {
                id: unit_id.to_string(),
                last_sync_at: staged_sync.or(last_sync_at),
            }),
            None if staged => Some(UnitRecord {
                id: unit_id.to_string(),
                last_sync_at: staged_sync,
            }),
            None => None,
        })
    }

    async fn get_all_chapter_records(&self, unit_id: &str) -> Result<Vec<ChapterRecord>> {
        let stored = self.committed_chapters(unit_id).await;
        Ok(self.staging.overlay(unit_id, stored).await)
    }

    async fn get_chapter_record(&self, unit_id: &str, chapter_id: &str) -> Result<Option<ChapterRecord>> {
        if let Some(record) = self.staging.chapter(unit_id, chapter_id).await {
            return Ok(Some(record));
        }
        let units = self.units.read().await;
        Ok(units.get(unit_id).and_then(|unit| unit.chapters.get(chapter_id).cloned()))
    }

    async fn create_or_update_chapter_record(&self, unit_id: &str, record: &ChapterRecord) -> Result<ChapterRecord> {
        let current = self.get_chapter_record(unit_id, &record.id).await?;
        Ok(self.staging.stage_chapter(unit_id, current, record).await)
    }

    async fn update_last_sync_at(&self, unit_id: &str, at: UtcDateTime) -> Result<()> {
        self.staging.stage_last_sync_at(unit_id, at).await;
        Ok(())
    }

    async fn save_if_changed(&self, unit_id: &str, rollback_on_error: bool) -> SaveOutcome {
        let changes = self.staging.take(unit_id).await;
        if changes.is_empty() {
            return SaveOutcome::NoChanges;
        }
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        match self.commit(unit_id, &changes).await {
            Ok(()) => SaveOutcome::Applied,
            Err(err) => {
                self.staging.settle_failure(unit_id, changes, rollback_on_error).await;
                SaveOutcome::Failed(err)
            },
        }
    }

    async fn discard_changes(&self, unit_id: &str) {
        _ = self.staging.take(unit_id).await;
    }

    async fn set_read(&self, unit_id: &str, chapter_id: &str, is_read: bool) -> Result<()> {
        let committed = self.update_committed(unit_id, chapter_id, |record| record.is_read = is_read).await;
        let staged = self.staging.update_chapter(unit_id, chapter_id, |record| record.is_read = is_read).await;
        if !committed && !staged {
            exn::bail!(ErrorKind::ChapterNotFound(unit_id.to_string(), chapter_id.to_string()));
        }
        Ok(())
    }

    async fn set_last_page_read(&self, unit_id: &str, chapter_id: &str, page: Option<u32>) -> Result<()> {
        let committed = self.update_committed(unit_id, chapter_id, |record| record.last_page_read = page).await;
        let staged = self.staging.update_chapter(unit_id, chapter_id, |record| record.last_page_read = page).await;
        if !committed && !staged {
            exn::bail!(ErrorKind::ChapterNotFound(unit_id.to_string(), chapter_id.to_string()));
        }
        Ok(())
    }
}
