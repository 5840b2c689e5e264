//! SQLite-backed [`LocalStore`].

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{ChapterRow, UnitRow};
use crate::record::{ChapterRecord, UnitRecord};
use crate::store::{Changes, LocalStore, SaveOutcome, Staging};
use async_trait::async_trait;
use exn::ResultExt;
use sqlx::SqlitePool;
use std::sync::Arc;
use time::UtcDateTime;

/// Repository for units and their chapters in the cache database.
///
/// Reads go to the database with this repository's staged changes layered
/// on top; writes are staged until [`save_if_changed`](LocalStore::save_if_changed)
/// commits them. Clones share the staging area.
///
/// # Relationships
///
/// - A unit has many chapters, keyed by `(unit_id, id)`
/// - Deleting a unit cascades to its chapters
/// - Committing never overwrites stored reading progress; only
///   [`set_read`](LocalStore::set_read) and
///   [`set_last_page_read`](LocalStore::set_last_page_read) write it
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
    staging: Arc<Staging>,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self::new(db.pool().clone())
    }
}
impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, staging: Arc::default() }
    }

    async fn stored_unit(&self, unit_id: &str) -> Result<Option<UnitRecord>> {
        let row: Option<UnitRow> = sqlx::query_as(include_str!("../queries/get_unit.sql"))
            .bind(unit_id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(UnitRecord::try_from).transpose()
    }

    async fn stored_chapter(&self, unit_id: &str, chapter_id: &str) -> Result<Option<ChapterRecord>> {
        let row: Option<ChapterRow> = sqlx::query_as(include_str!("../queries/get_chapter.sql"))
            .bind(unit_id)
            .bind(chapter_id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(ChapterRecord::try_from).transpose()
    }

    /// Write one unit's changes in a single transaction.
    async fn commit(&self, unit_id: &str, changes: &Changes) -> Result<()> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/insert_unit.sql"))
            .bind(unit_id)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        for record in changes.chapters.values() {
            let row = ChapterRow::new(unit_id, record);
            sqlx::query(include_str!("../queries/upsert_chapter.sql"))
                .bind(row.unit_id)
                .bind(row.id)
                .bind(row.number)
                .bind(row.title)
                .bind(row.page_count)
                .bind(row.published_at)
                .bind(row.download_ref)
                .bind(row.is_read)
                .bind(row.last_page_read)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        if let Some(at) = changes.last_sync_at {
            sqlx::query(include_str!("../queries/update_last_sync_at.sql"))
                .bind(at.unix_timestamp())
                .bind(unit_id)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Mirror a progress write onto the staged copy of the chapter so reads
    /// (and the next commit, for a chapter not inserted yet) agree with it.
    async fn settle_progress(
        &self,
        unit_id: &str,
        chapter_id: &str,
        rows_affected: u64,
        apply: impl FnOnce(&mut ChapterRecord),
    ) -> Result<()> {
        let staged = self.staging.update_chapter(unit_id, chapter_id, apply).await;
        if rows_affected == 0 && !staged {
            exn::bail!(ErrorKind::ChapterNotFound(unit_id.to_string(), chapter_id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LocalStore for Repository {
    async fn get_unit(&self, unit_id: &str) -> Result<Option<UnitRecord>> {
        let staged_sync = self.staging.last_sync_at(unit_id).await;
        let staged = self.staging.has_changes(unit_id).await;
        let unit = match self.stored_unit(unit_id).await? {
            Some(unit) => Some(UnitRecord {
                last_sync_at: staged_sync.or(unit.last_sync_at),
                ..unit
            }),
            None if staged => Some(UnitRecord {
                id: unit_id.to_string(),
                last_sync_at: staged_sync,
            }),
            None => None,
        };
        Ok(unit)
    }

    async fn get_all_chapter_records(&self, unit_id: &str) -> Result<Vec<ChapterRecord>> {
        let rows: Vec<ChapterRow> = sqlx::query_as(include_str!("../queries/list_chapters_for_unit.sql"))
            .bind(unit_id)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let stored = rows.into_iter().map(ChapterRecord::try_from).collect::<Result<Vec<_>>>()?;
        Ok(self.staging.overlay(unit_id, stored).await)
    }

    async fn get_chapter_record(&self, unit_id: &str, chapter_id: &str) -> Result<Option<ChapterRecord>> {
        match self.staging.chapter(unit_id, chapter_id).await {
            Some(record) => Ok(Some(record)),
            None => self.stored_chapter(unit_id, chapter_id).await,
        }
    }

    async fn create_or_update_chapter_record(&self, unit_id: &str, record: &ChapterRecord) -> Result<ChapterRecord> {
        let current = self.get_chapter_record(unit_id, &record.id).await?;
        Ok(self.staging.stage_chapter(unit_id, current, record).await)
    }

    async fn update_last_sync_at(&self, unit_id: &str, at: UtcDateTime) -> Result<()> {
        self.staging.stage_last_sync_at(unit_id, at).await;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn save_if_changed(&self, unit_id: &str, rollback_on_error: bool) -> SaveOutcome {
        let changes = self.staging.take(unit_id).await;
        if changes.is_empty() {
            return SaveOutcome::NoChanges;
        }
        match self.commit(unit_id, &changes).await {
            Ok(()) => {
                tracing::debug!(chapters = changes.chapters.len(), "Committed staged changes");
                SaveOutcome::Applied
            },
            Err(err) => {
                tracing::warn!(error = ?err, "Failed to commit staged changes");
                self.staging.settle_failure(unit_id, changes, rollback_on_error).await;
                SaveOutcome::Failed(err)
            },
        }
    }

    async fn discard_changes(&self, unit_id: &str) {
        _ = self.staging.take(unit_id).await;
    }

    async fn set_read(&self, unit_id: &str, chapter_id: &str, is_read: bool) -> Result<()> {
        let updated = sqlx::query(include_str!("../queries/set_read.sql"))
            .bind(is_read)
            .bind(unit_id)
            .bind(chapter_id)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?
            .rows_affected();
        self.settle_progress(unit_id, chapter_id, updated, |record| record.is_read = is_read).await
    }

    async fn set_last_page_read(&self, unit_id: &str, chapter_id: &str, page: Option<u32>) -> Result<()> {
        let updated = sqlx::query(include_str!("../queries/set_last_page_read.sql"))
            .bind(page.map(i64::from))
            .bind(unit_id)
            .bind(chapter_id)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?
            .rows_affected();
        self.settle_progress(unit_id, chapter_id, updated, |record| record.last_page_read = page).await
    }
}
