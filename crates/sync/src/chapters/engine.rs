use crate::chapters::merge::merge;
use crate::error::{ErrorKind, Result};
use crate::options::SyncOptions;
use crate::state::{Datasource, DatasourceState};
use tanko_asyncutils::{FlightGuard, Published, SingleFlight};
use tanko_cache::{ChapterRecord, SaveOutcome, StoreHandle};
use tanko_provider::ProviderHandle;
use time::UtcDateTime;
use tracing::instrument;

/// Keeps one content unit's chapter list in sync between a source and the
/// local store.
///
/// Only one operation runs at a time: starting one cancels the operation in
/// flight and waits for it to unwind before touching the published state or
/// the store. Failures never escape; they're classified and published on
/// [`error`](Self::error).
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use tanko_cache::{Database, Repository};
/// use tanko_provider::backend::LocalProvider;
/// use tanko_sync::{ChapterSyncEngine, SyncOptions};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let db = Database::connect("/var/lib/tanko/cache.sqlite").await?;
/// let provider = Arc::new(LocalProvider::new("shelf", "/srv/manga")?);
/// let engine = ChapterSyncEngine::new("berserk", provider, Arc::new(Repository::from(&db)), SyncOptions::default());
/// engine.setup_data().await;
/// for chapter in engine.chapters().current() {
///     println!("{} (read: {})", chapter.id, chapter.is_read);
/// }
/// # Ok(())
/// # }
/// ```
pub struct ChapterSyncEngine {
    unit_id: String,
    provider: ProviderHandle,
    store: StoreHandle,
    options: SyncOptions,
    datasource: Datasource<ChapterRecord>,
    flights: SingleFlight,
}

impl ChapterSyncEngine {
    pub fn new(unit_id: impl Into<String>, provider: ProviderHandle, store: StoreHandle, options: SyncOptions) -> Self {
        Self {
            unit_id: unit_id.into(),
            provider,
            store,
            options,
            datasource: Datasource::new(),
            flights: SingleFlight::new(),
        }
    }

    pub fn unit_id(&self) -> &str {
        &self.unit_id
    }

    /// The chapter list, in canonical order.
    pub fn chapters(&self) -> &Published<Vec<ChapterRecord>> {
        self.datasource.items()
    }

    pub fn state(&self) -> &Published<DatasourceState> {
        self.datasource.state()
    }

    pub fn error(&self) -> &Published<Option<ErrorKind>> {
        self.datasource.error()
    }

    /// Publish the local chapter list, then refetch from the source if the
    /// unit was never synced or its last sync is older than the staleness
    /// threshold.
    #[instrument(skip(self), fields(unit = %self.unit_id, source = self.provider.id()))]
    pub async fn setup_data(&self) {
        let flight = self.flights.supersede().await;
        if flight.is_cancelled() {
            tracing::debug!("Superseded before starting");
            return;
        }
        let activity = self.datasource.begin();
        self.datasource.items().publish(Vec::new());
        activity.finish(self.sync(&flight).await);
    }

    /// Refetch from the source regardless of staleness. The current list
    /// stays visible until the merged one replaces it.
    #[instrument(skip(self), fields(unit = %self.unit_id, source = self.provider.id()))]
    pub async fn refresh(&self) {
        let flight = self.flights.supersede().await;
        if flight.is_cancelled() {
            tracing::debug!("Superseded before starting");
            return;
        }
        let activity = self.datasource.begin();
        let result = match self.local_chapters().await {
            Ok(local) => self.fetch_and_merge(&flight, &local).await,
            Err(err) => Err(err),
        };
        activity.finish(result);
    }

    /// Cancel the operation in flight, if any, and wait for it to unwind.
    pub async fn cancel(&self) {
        let flight = self.flights.supersede().await;
        drop(flight);
    }

    async fn sync(&self, flight: &FlightGuard) -> Result<()> {
        let local = self.local_chapters().await?;
        self.datasource.items().publish(local.clone());
        let unit = self.store.get_unit(&self.unit_id).await.map_err(ErrorKind::store)?;
        let last_sync_at = unit.and_then(|unit| unit.last_sync_at);
        if !self.is_stale_at(last_sync_at, UtcDateTime::now()) {
            tracing::debug!(chapters = local.len(), ?last_sync_at, "Local chapter list is fresh");
            return Ok(());
        }
        self.fetch_and_merge(flight, &local).await
    }

    async fn local_chapters(&self) -> Result<Vec<ChapterRecord>> {
        self.store.get_all_chapter_records(&self.unit_id).await.map_err(ErrorKind::store)
    }

    /// Never synced, synced at least `staleness` before `now`, or synced
    /// "in the future" (clock skew, a restored database).
    fn is_stale_at(&self, last_sync_at: Option<UtcDateTime>, now: UtcDateTime) -> bool {
        match last_sync_at {
            None => true,
            Some(at) if at > now => {
                tracing::warn!(last_sync_at = ?at, ?now, "Last sync is in the future, treating unit as stale");
                true
            },
            Some(at) => now - at >= self.options.staleness,
        }
    }

    async fn fetch_and_merge(&self, flight: &FlightGuard, local: &[ChapterRecord]) -> Result<()> {
        if flight.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled("superseded before fetching".to_string()));
        }
        let fetch = self.provider.fetch_chapters(&self.unit_id, flight.token());
        let remote = match flight.run(fetch).await {
            Some(result) => result.map_err(ErrorKind::provider)?,
            None => exn::bail!(ErrorKind::Cancelled("superseded while fetching".to_string())),
        };
        let merged = merge(remote, local, self.options.hide_empty_chapters);
        if flight.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled("superseded before persisting".to_string()));
        }
        tracing::info!(chapters = merged.len(), "Merged chapter list from source");
        self.datasource.items().publish(merged.clone());
        self.persist(&merged).await
    }

    /// Stage and commit the merged list together with the new sync time.
    /// Runs to completion even if superseded meanwhile.
    async fn persist(&self, merged: &[ChapterRecord]) -> Result<()> {
        if let Err(err) = self.stage(merged).await {
            self.store.discard_changes(&self.unit_id).await;
            return Err(err);
        }
        match self.store.save_if_changed(&self.unit_id, true).await {
            SaveOutcome::Applied | SaveOutcome::NoChanges => Ok(()),
            SaveOutcome::Failed(err) => Err(ErrorKind::store(err)),
        }
    }

    async fn stage(&self, merged: &[ChapterRecord]) -> Result<()> {
        for record in merged {
            self.store
                .create_or_update_chapter_record(&self.unit_id, record)
                .await
                .map_err(ErrorKind::store)?;
        }
        self.store.update_last_sync_at(&self.unit_id, UtcDateTime::now()).await.map_err(ErrorKind::store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::Arc;
    use std::time::Duration;
    use tanko_cache::{Database, LocalStore, MemoryStore, Repository};
    use tanko_provider::backend::MockProvider;
    use tanko_provider::ChapterEntry;
    use tanko_provider::error::ErrorKind as ProviderErrorKind;

    const UNIT: &str = "berserk";

    fn entry(id: &str, number: f64) -> ChapterEntry {
        let published_at = UtcDateTime::from_unix_timestamp(1_600_000_000).unwrap();
        ChapterEntry::new(id, format!("{UNIT}/{id}"), published_at).with_number(number).with_page_count(5)
    }

    fn record(id: &str, number: f64) -> ChapterRecord {
        ChapterRecord::from(entry(id, number))
    }

    fn ids(records: &[ChapterRecord]) -> Vec<String> {
        records.iter().map(|record| record.id.clone()).collect()
    }

    fn engine(provider: &Arc<MockProvider>, store: &Arc<MemoryStore>, options: SyncOptions) -> ChapterSyncEngine {
        ChapterSyncEngine::new(UNIT, provider.clone(), store.clone(), options)
    }

    #[rstest]
    #[case::never_synced(None, true)]
    #[case::just_before_threshold(Some(-1), false)]
    #[case::at_threshold(Some(0), true)]
    #[case::past_threshold(Some(1), true)]
    fn test_staleness_threshold(#[case] offset_secs: Option<i64>, #[case] expected: bool) {
        let options = SyncOptions { staleness: Duration::from_secs(3_600), ..SyncOptions::default() };
        let engine = engine(&Arc::new(MockProvider::default()), &Arc::new(MemoryStore::default()), options);
        let now = UtcDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let last_sync_at = offset_secs.map(|offset| now - time::Duration::seconds(3_600 + offset));
        assert_eq!(engine.is_stale_at(last_sync_at, now), expected);
    }

    #[rstest]
    #[case::one_second(1)]
    #[case::one_year(365 * 24 * 3_600)]
    fn test_future_sync_time_is_stale(#[case] ahead_secs: i64) {
        let options = SyncOptions::default();
        let engine = engine(&Arc::new(MockProvider::default()), &Arc::new(MemoryStore::default()), options);
        let now = UtcDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert!(engine.is_stale_at(Some(now + time::Duration::seconds(ahead_secs)), now));
    }

    #[tokio::test]
    async fn test_future_sync_time_refetches() {
        let synced = UtcDateTime::now() + time::Duration::days(30);
        let provider = Arc::new(MockProvider::default().with_chapters(UNIT, [entry("c1", 1.0)]));
        let store = Arc::new(MemoryStore::default().with_unit(UNIT, Some(synced), Vec::new()));
        let engine = engine(&provider, &store, SyncOptions::default());
        engine.setup_data().await;
        assert_eq!(provider.chapter_calls(), 1);
        assert_eq!(ids(&engine.chapters().current()), ["c1"]);
    }

    #[tokio::test]
    async fn test_never_synced_fetches_once() {
        let provider = Arc::new(MockProvider::default().with_chapters(UNIT, [entry("c1", 1.0), entry("c2", 2.0)]));
        let store = Arc::new(MemoryStore::default());
        let engine = engine(&provider, &store, SyncOptions::default());
        assert_eq!(engine.state().current(), DatasourceState::Starting);

        engine.setup_data().await;
        assert_eq!(provider.chapter_calls(), 1);
        assert_eq!(ids(&engine.chapters().current()), ["c2", "c1"]);
        assert_eq!(engine.state().current(), DatasourceState::Normal);
        assert_eq!(engine.error().current(), None);
        assert_eq!(store.committed_chapters(UNIT).await, engine.chapters().current());
        assert!(store.committed_last_sync_at(UNIT).await.is_some());
    }

    #[tokio::test]
    async fn test_fresh_unit_uses_local_snapshot() {
        let synced = UtcDateTime::now() - time::Duration::days(1);
        let provider = Arc::new(MockProvider::default().with_chapters(UNIT, [entry("remote", 9.0)]));
        let store = Arc::new(MemoryStore::default().with_unit(UNIT, Some(synced), [record("c1", 1.0)]));
        let engine = engine(&provider, &store, SyncOptions::default());

        engine.setup_data().await;
        assert_eq!(provider.chapter_calls(), 0);
        assert_eq!(ids(&engine.chapters().current()), ["c1"]);
        assert_eq!(store.save_calls(), 0);
    }

    #[tokio::test]
    async fn test_stale_unit_fetches_once() {
        let synced = UtcDateTime::now() - time::Duration::days(6);
        let provider = Arc::new(MockProvider::default().with_chapters(UNIT, [entry("c1", 1.0), entry("c2", 2.0)]));
        let store = Arc::new(MemoryStore::default().with_unit(UNIT, Some(synced), [record("c1", 1.0)]));
        let engine = engine(&provider, &store, SyncOptions::default());

        let mut states = engine.state().subscribe();
        engine.setup_data().await;
        assert_eq!(provider.chapter_calls(), 1);
        assert_eq!(ids(&engine.chapters().current()), ["c2", "c1"]);
        assert!(store.committed_last_sync_at(UNIT).await > Some(synced));
        assert_eq!(*states.borrow_and_update(), DatasourceState::Normal);
    }

    #[tokio::test]
    async fn test_local_snapshot_published_before_merge() {
        let provider = Arc::new(MockProvider::default().with_chapters(UNIT, [entry("c1", 1.0), entry("c2", 2.0)]));
        let store = Arc::new(MemoryStore::default().with_unit(UNIT, None, [record("c1", 1.0)]));
        let engine = engine(&provider, &store, SyncOptions::default());
        provider.fail_chapters(Some(|| ProviderErrorKind::Network("offline".into()))).await;

        engine.setup_data().await;
        // The local snapshot survives a failed fetch.
        assert_eq!(ids(&engine.chapters().current()), ["c1"]);
        assert_eq!(engine.error().current(), Some(ErrorKind::Network("offline".into())));
        assert_eq!(engine.state().current(), DatasourceState::Normal);
        assert_eq!(store.committed_last_sync_at(UNIT).await, None);
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent_and_keeps_progress() {
        let provider = Arc::new(MockProvider::default().with_chapters(UNIT, [entry("c1", 1.0), entry("c2", 2.0)]));
        let store = Arc::new(MemoryStore::default());
        let engine = engine(&provider, &store, SyncOptions::default());
        engine.setup_data().await;
        store.set_read(UNIT, "c1", true).await.unwrap();
        store.set_last_page_read(UNIT, "c1", Some(4)).await.unwrap();

        engine.refresh().await;
        let first = engine.chapters().current();
        engine.refresh().await;
        let second = engine.chapters().current();
        assert_eq!(first, second);
        assert_eq!(provider.chapter_calls(), 3);
        let c1 = second.iter().find(|record| record.id == "c1").unwrap();
        assert!(c1.is_read);
        assert_eq!(c1.last_page_read, Some(4));
        assert_eq!(store.committed_chapters(UNIT).await, second);
    }

    #[tokio::test]
    async fn test_refresh_drops_unlisted_but_keeps_them_stored() {
        let provider = Arc::new(MockProvider::default().with_chapters(UNIT, [entry("c1", 1.0), entry("c2", 2.0)]));
        let store = Arc::new(MemoryStore::default());
        let engine = engine(&provider, &store, SyncOptions::default());
        engine.setup_data().await;

        provider.set_chapters(UNIT, [entry("c2", 2.0)]).await;
        engine.refresh().await;
        assert_eq!(ids(&engine.chapters().current()), ["c2"]);
        assert_eq!(ids(&store.committed_chapters(UNIT).await), ["c2", "c1"]);
    }

    #[tokio::test]
    async fn test_empty_everywhere() {
        let provider = Arc::new(MockProvider::default());
        let store = Arc::new(MemoryStore::default());
        let engine = engine(&provider, &store, SyncOptions::default());
        engine.setup_data().await;
        assert!(engine.chapters().current().is_empty());
        assert_eq!(engine.error().current(), None);
        assert_eq!(engine.state().current(), DatasourceState::Normal);
    }

    #[tokio::test]
    async fn test_hide_empty_chapters() {
        let provider = Arc::new(
            MockProvider::default().with_chapters(UNIT, [entry("c1", 1.0).with_page_count(0), entry("c2", 2.0)]),
        );
        let store = Arc::new(MemoryStore::default());
        let options = SyncOptions { hide_empty_chapters: true, ..SyncOptions::default() };
        let engine = engine(&provider, &store, options);
        engine.setup_data().await;
        assert_eq!(ids(&engine.chapters().current()), ["c2"]);
    }

    #[tokio::test]
    async fn test_save_failure() {
        let provider = Arc::new(MockProvider::default().with_chapters(UNIT, [entry("c1", 1.0)]));
        let store = Arc::new(MemoryStore::default());
        store.fail_next_saves(1);
        let engine = engine(&provider, &store, SyncOptions::default());

        engine.setup_data().await;
        assert!(matches!(engine.error().current(), Some(ErrorKind::Store(_))));
        // The published list isn't rolled back, the store is.
        assert_eq!(ids(&engine.chapters().current()), ["c1"]);
        assert!(store.committed_chapters(UNIT).await.is_empty());
        assert_eq!(store.get_unit(UNIT).await.unwrap(), None);
        assert_eq!(engine.state().current(), DatasourceState::Normal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_setup_publishes_nothing() {
        let provider = Arc::new(
            MockProvider::default()
                .with_latency(Duration::from_secs(10))
                .with_chapters(UNIT, [entry("c1", 1.0)]),
        );
        let store = Arc::new(MemoryStore::default());
        let engine = Arc::new(engine(&provider, &store, SyncOptions::default()));

        let first = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.setup_data().await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(provider.chapter_calls(), 1);
        assert_eq!(engine.state().current(), DatasourceState::Loading);

        provider.set_latency(Duration::ZERO).await;
        provider.set_chapters(UNIT, [entry("c1", 1.0), entry("c2", 2.0)]).await;
        engine.setup_data().await;
        first.await.unwrap();

        assert_eq!(provider.chapter_calls(), 2);
        // Only the second call got as far as saving.
        assert_eq!(store.save_calls(), 1);
        assert_eq!(ids(&engine.chapters().current()), ["c2", "c1"]);
        assert_eq!(engine.error().current(), None);
        assert_eq!(engine.state().current(), DatasourceState::Normal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_keeps_list_visible() {
        let provider = Arc::new(MockProvider::default().with_chapters(UNIT, [entry("c1", 1.0)]));
        let store = Arc::new(MemoryStore::default());
        let engine = Arc::new(engine(&provider, &store, SyncOptions::default()));
        engine.setup_data().await;

        provider.set_latency(Duration::from_secs(10)).await;
        provider.set_chapters(UNIT, [entry("c1", 1.0), entry("c2", 2.0)]).await;
        let refresh = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.refresh().await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(engine.state().current(), DatasourceState::Loading);
        assert_eq!(ids(&engine.chapters().current()), ["c1"]);

        refresh.await.unwrap();
        assert_eq!(ids(&engine.chapters().current()), ["c2", "c1"]);
        assert_eq!(engine.state().current(), DatasourceState::Normal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let provider = Arc::new(
            MockProvider::default()
                .with_latency(Duration::from_secs(10))
                .with_chapters(UNIT, [entry("c1", 1.0)]),
        );
        let store = Arc::new(MemoryStore::default());
        let engine = Arc::new(engine(&provider, &store, SyncOptions::default()));
        let running = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.setup_data().await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;

        engine.cancel().await;
        running.await.unwrap();
        assert_eq!(store.save_calls(), 0);
        assert_eq!(engine.error().current(), None);
        assert_eq!(engine.state().current(), DatasourceState::Normal);
    }

    #[tokio::test]
    async fn test_sqlite_round_trip() {
        let db = Database::connect_in_memory().await.unwrap();
        let store = Arc::new(Repository::from(&db));
        let provider = Arc::new(MockProvider::default().with_chapters(UNIT, [entry("c1", 1.0), entry("c2", 2.0)]));
        let engine = ChapterSyncEngine::new(UNIT, provider.clone(), store.clone(), SyncOptions::default());

        engine.setup_data().await;
        assert_eq!(engine.error().current(), None);
        store.set_read(UNIT, "c2", true).await.unwrap();

        provider.set_chapters(UNIT, [entry("c1", 1.0), entry("c2", 2.0).with_title("Renamed")]).await;
        engine.refresh().await;
        let c2 = engine.chapters().current().into_iter().find(|record| record.id == "c2").unwrap();
        assert_eq!(c2.title.as_deref(), Some("Renamed"));
        assert!(c2.is_read);

        // A second engine over the same database trusts the fresh sync.
        let reopened =
            ChapterSyncEngine::new(UNIT, provider.clone(), Arc::new(Repository::from(&db)), SyncOptions::default());
        reopened.setup_data().await;
        assert_eq!(provider.chapter_calls(), 2);
        assert_eq!(reopened.chapters().current(), engine.chapters().current());
        db.close().await;
    }
}
