use crate::error::{ErrorKind, Result};
use crate::options::PageOptions;
use crate::pages::slot::{PageSlot, PageState, SlotTable};
use crate::state::{Datasource, DatasourceState};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::collections::BTreeMap;
use std::sync::Arc;
use tanko_asyncutils::Published;
use tanko_provider::error::Result as ProviderResult;
use tanko_provider::{DownloadDescriptor, ProviderHandle};
use tokio::sync::{Mutex, OnceCell};
use tracing::instrument;

/// Loads the pages of one chapter in fixed-size windows.
///
/// Pages are published as [`PageSlot`]s in position order, without gaps:
/// every position up to the last requested window has a slot, either still
/// loading, loaded, or failed. Failed pages can be retried individually with
/// [`reload_pages`](Self::reload_pages).
///
/// The download descriptor is resolved from the source on first use and then
/// cached for the lifetime of the loader.
pub struct PageWindowLoader {
    provider: ProviderHandle,
    download_ref: String,
    window_size: usize,
    descriptor: OnceCell<DownloadDescriptor>,
    slots: Mutex<SlotTable>,
    has_more: Published<bool>,
    datasource: Datasource<PageSlot>,
}

impl PageWindowLoader {
    pub fn new(provider: ProviderHandle, download_ref: impl Into<String>, options: PageOptions) -> Self {
        Self {
            provider,
            download_ref: download_ref.into(),
            window_size: options.window_size(),
            descriptor: OnceCell::new(),
            slots: Mutex::new(SlotTable::default()),
            has_more: Published::new(true),
            datasource: Datasource::new(),
        }
    }

    pub fn download_ref(&self) -> &str {
        &self.download_ref
    }

    pub fn pages(&self) -> &Published<Vec<PageSlot>> {
        self.datasource.items()
    }

    pub fn state(&self) -> &Published<DatasourceState> {
        self.datasource.state()
    }

    pub fn error(&self) -> &Published<Option<ErrorKind>> {
        self.datasource.error()
    }

    pub fn has_more(&self) -> &Published<bool> {
        &self.has_more
    }

    pub fn has_more_pages(&self) -> bool {
        self.has_more.current()
    }

    /// The cached descriptor, once something has resolved it.
    pub fn descriptor(&self) -> Option<&DownloadDescriptor> {
        self.descriptor.get()
    }

    /// Number of windows requested since the last refresh.
    pub async fn window_index(&self) -> usize {
        self.slots.lock().await.window_index()
    }

    /// Forget every page and load the first window again.
    ///
    /// Windows still in flight from before the refresh can no longer write
    /// their pages.
    #[instrument(skip(self), fields(download_ref = %self.download_ref))]
    pub async fn refresh(&self) {
        let activity = self.datasource.begin();
        let generation = {
            let mut slots = self.slots.lock().await;
            let generation = slots.reset();
            self.has_more.publish(true);
            self.datasource.items().publish(slots.snapshot());
            generation
        };
        activity.finish(self.load_window(generation).await);
    }

    /// Load the next window, unless every page has been requested already.
    #[instrument(skip(self), fields(download_ref = %self.download_ref))]
    pub async fn load_next_pages(&self) {
        if !self.has_more_pages() {
            tracing::debug!("No more pages to load");
            return;
        }
        let activity = self.datasource.begin();
        let generation = self.slots.lock().await.generation();
        activity.finish(self.load_window(generation).await);
    }

    /// Fetch the given pages again, each `(position, url)` naming the URL
    /// that last failed for it.
    ///
    /// Pages that fail again stay failed. The error channel is only set when
    /// every page of the batch failed.
    #[instrument(skip_all, fields(download_ref = %self.download_ref))]
    pub async fn reload_pages(&self, items: impl IntoIterator<Item = (usize, String)>) {
        let items: BTreeMap<usize, String> = items.into_iter().collect();
        let activity = self.datasource.begin();
        let generation = self.slots.lock().await.generation();
        activity.finish(self.reload(generation, items).await);
    }

    async fn resolve_descriptor(&self) -> Result<&DownloadDescriptor> {
        self.descriptor
            .get_or_try_init(|| async {
                tracing::debug!("Resolving download descriptor");
                self.provider
                    .fetch_download_descriptor(&self.download_ref)
                    .await
                    .map_err(ErrorKind::provider)
                    .inspect(|descriptor| {
                        tracing::debug!(pages = descriptor.page_count(), "Resolved download descriptor");
                    })
            })
            .await
    }

    /// Claim and fetch the next window of `generation`. A refresh while the
    /// descriptor resolves makes this a no-op.
    async fn load_window(&self, generation: u64) -> Result<()> {
        let descriptor = self.resolve_descriptor().await?;
        let page_count = descriptor.page_count();
        let (start, end) = {
            let mut slots = self.slots.lock().await;
            if slots.generation() != generation {
                tracing::debug!(generation, current = slots.generation(), "Refreshed before the window was claimed");
                return Ok(());
            }
            let window = slots.next_window(self.window_size, page_count);
            self.has_more.publish(slots.has_more(self.window_size, page_count));
            let Some((start, end)) = window else {
                tracing::debug!(page_count, "Every page has been requested");
                return Ok(());
            };
            for position in start..end {
                slots.apply(generation, position, PageState::Loading);
            }
            self.datasource.items().publish(slots.snapshot());
            (start, end)
        };
        tracing::debug!(start, end, page_count, "Loading window");

        let mut fetches: FuturesUnordered<_> = (start..end)
            .map(|position| async move { (position, self.fetch_page(position, descriptor).await) })
            .collect();
        while let Some((position, result)) = fetches.next().await {
            let state = match result {
                Ok(state) => state,
                Err(err) => {
                    let url = self.provider.build_page_url(position, descriptor);
                    tracing::warn!(position, %url, error = ?err, "Failed to load page");
                    PageState::NotFound(url)
                },
            };
            self.settle(generation, position, state).await;
        }
        Ok(())
    }

    async fn reload(&self, generation: u64, items: BTreeMap<usize, String>) -> Result<()> {
        let descriptor = self.resolve_descriptor().await?;
        let items = {
            let mut slots = self.slots.lock().await;
            if slots.generation() != generation {
                tracing::debug!(generation, current = slots.generation(), "Refreshed before the reload started");
                return Ok(());
            }
            let mut accepted = Vec::with_capacity(items.len());
            for (position, url) in items {
                if !slots.contains(position) {
                    tracing::warn!(position, "Ignoring reload of a page that was never requested");
                    continue;
                }
                slots.apply(generation, position, PageState::Loading);
                accepted.push((position, url));
            }
            if !accepted.is_empty() {
                self.datasource.items().publish(slots.snapshot());
            }
            accepted
        };
        let total = items.len();

        let mut fetches: FuturesUnordered<_> = items
            .into_iter()
            .map(|(position, url)| async move { (position, url, self.fetch_page(position, descriptor).await) })
            .collect();
        let mut failures = 0;
        let mut last_error = None;
        while let Some((position, url, result)) = fetches.next().await {
            let state = match result {
                Ok(state) => state,
                Err(err) => {
                    tracing::warn!(position, %url, error = ?err, "Failed to reload page");
                    failures += 1;
                    last_error = Some(err);
                    PageState::NotFound(url)
                },
            };
            self.settle(generation, position, state).await;
        }
        match last_error {
            Some(err) if failures == total => Err(ErrorKind::provider(err)),
            _ => Ok(()),
        }
    }

    async fn fetch_page(&self, position: usize, descriptor: &DownloadDescriptor) -> ProviderResult<PageState> {
        let bytes = self.provider.fetch_page_bytes(position, descriptor).await?;
        Ok(PageState::Remote(Arc::from(bytes)))
    }

    async fn settle(&self, generation: u64, position: usize, state: PageState) {
        let mut slots = self.slots.lock().await;
        if slots.apply(generation, position, state) {
            self.datasource.items().publish(slots.snapshot());
        }
    }
}
