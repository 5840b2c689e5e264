//! In-memory provider for testing.

use crate::error::{ErrorKind, Result};
use crate::{ChapterEntry, DownloadDescriptor, ProviderDelegate, paginate};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

type FailureFn = Arc<dyn Fn() -> ErrorKind + Send + Sync>;

/// In-memory provider for testing.
///
/// Chapter indexes and descriptors live in maps behind [`RwLock`]s so tests
/// can change what the "source" reports between calls. Every fetch can be
/// slowed down with an artificial latency (which plays well with a paused
/// tokio clock), and chapter index fetches or individual pages can be made
/// to fail. Pages are served as the bytes of their page reference.
///
/// # Examples
///
/// ```
/// use tanko_provider::backend::MockProvider;
/// use tanko_provider::{ChapterEntry, DownloadDescriptor, ProviderDelegate};
/// use time::UtcDateTime;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let provider = MockProvider::default()
///     .with_chapters("berserk", [ChapterEntry::new("c1", "r1", UtcDateTime::UNIX_EPOCH)])
///     .with_descriptor("r1", DownloadDescriptor::new("https://cdn", ["p1.jpg"]));
/// let chapters = provider.fetch_chapters("berserk", &CancellationToken::new()).await?;
/// assert_eq!(chapters.len(), 1);
/// let descriptor = provider.fetch_download_descriptor("r1").await?;
/// assert_eq!(provider.fetch_page_bytes(0, &descriptor).await?, b"p1.jpg");
/// # Ok(())
/// # }
/// ```
pub struct MockProvider {
    id: String,
    index_page_size: usize,
    chapters: RwLock<HashMap<String, Vec<ChapterEntry>>>,
    descriptors: RwLock<HashMap<String, DownloadDescriptor>>,
    chapter_failure: RwLock<Option<FailureFn>>,
    failing_pages: RwLock<HashSet<usize>>,
    latency: RwLock<Duration>,
    page_latency: RwLock<HashMap<usize, Duration>>,
    chapter_calls: AtomicUsize,
    descriptor_calls: AtomicUsize,
    page_calls: AtomicUsize,
}

impl MockProvider {
    /// Change the source identifier of the mock provider.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Pre-populate the chapter index of a unit.
    pub fn with_chapters(
        mut self,
        unit_id: impl Into<String>,
        chapters: impl IntoIterator<Item = ChapterEntry>,
    ) -> Self {
        self.chapters.get_mut().insert(unit_id.into(), chapters.into_iter().collect());
        self
    }

    /// Pre-populate the descriptor a download reference resolves to.
    pub fn with_descriptor(mut self, download_ref: impl Into<String>, descriptor: DownloadDescriptor) -> Self {
        self.descriptors.get_mut().insert(download_ref.into(), descriptor);
        self
    }

    /// Pages at these positions fail with a network error.
    pub fn with_failing_pages(mut self, positions: impl IntoIterator<Item = usize>) -> Self {
        self.failing_pages.get_mut().extend(positions);
        self
    }

    /// Number of chapters served per index page.
    ///
    /// Panics on zero; a zero-sized index page would never end.
    pub fn with_index_page_size(mut self, size: usize) -> Self {
        assert!(size > 0, "MockProvider::with_index_page_size: size must be positive");
        self.index_page_size = size;
        self
    }

    /// Delay applied to every fetch.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        *self.latency.get_mut() = latency;
        self
    }

    pub async fn set_chapters(&self, unit_id: impl Into<String>, chapters: impl IntoIterator<Item = ChapterEntry>) {
        self.chapters.write().await.insert(unit_id.into(), chapters.into_iter().collect());
    }

    pub async fn set_descriptor(&self, download_ref: impl Into<String>, descriptor: DownloadDescriptor) {
        self.descriptors.write().await.insert(download_ref.into(), descriptor);
    }

    /// Make chapter index fetches fail with whatever `failure` produces, or
    /// succeed again with `None`.
    pub async fn fail_chapters(&self, failure: Option<impl Fn() -> ErrorKind + Send + Sync + 'static>) {
        *self.chapter_failure.write().await = failure.map(|f| Arc::new(f) as FailureFn);
    }

    pub async fn set_failing_pages(&self, positions: impl IntoIterator<Item = usize>) {
        *self.failing_pages.write().await = positions.into_iter().collect();
    }

    pub async fn set_latency(&self, latency: Duration) {
        *self.latency.write().await = latency;
    }

    /// Override the latency of a single page position.
    pub async fn set_page_latency(&self, position: usize, latency: Duration) {
        self.page_latency.write().await.insert(position, latency);
    }

    pub fn chapter_calls(&self) -> usize {
        self.chapter_calls.load(Ordering::SeqCst)
    }

    pub fn descriptor_calls(&self) -> usize {
        self.descriptor_calls.load(Ordering::SeqCst)
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    async fn delay(latency: Duration) {
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}
impl Default for MockProvider {
    fn default() -> Self {
        Self {
            id: "mock".to_string(),
            index_page_size: 20,
            chapters: RwLock::default(),
            descriptors: RwLock::default(),
            chapter_failure: RwLock::default(),
            failing_pages: RwLock::default(),
            latency: RwLock::default(),
            page_latency: RwLock::default(),
            chapter_calls: AtomicUsize::new(0),
            descriptor_calls: AtomicUsize::new(0),
            page_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ProviderDelegate for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch_chapters(&self, unit_id: &str, cancel: &CancellationToken) -> Result<Vec<ChapterEntry>> {
        self.chapter_calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.read().await;
        if cancel.run_until_cancelled(Self::delay(latency)).await.is_none() {
            exn::bail!(ErrorKind::Cancelled);
        }
        if let Some(failure) = self.chapter_failure.read().await.clone() {
            exn::bail!(failure());
        }
        let all = self.chapters.read().await.get(unit_id).cloned().unwrap_or_default();
        let size = self.index_page_size;
        paginate(cancel, |offset| {
            let page: Vec<_> = all.iter().skip(offset).take(size).cloned().collect();
            async move { Ok(page) }
        })
        .await
    }

    async fn fetch_download_descriptor(&self, download_ref: &str) -> Result<DownloadDescriptor> {
        self.descriptor_calls.fetch_add(1, Ordering::SeqCst);
        Self::delay(*self.latency.read().await).await;
        let descriptor = self.descriptors.read().await.get(download_ref).cloned();
        descriptor.ok_or_else(|| ErrorKind::NotFound(download_ref.to_string()).into())
    }

    async fn fetch_page_bytes(&self, position: usize, descriptor: &DownloadDescriptor) -> Result<Vec<u8>> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        let latency = match self.page_latency.read().await.get(&position) {
            Some(latency) => *latency,
            None => *self.latency.read().await,
        };
        Self::delay(latency).await;
        if self.failing_pages.read().await.contains(&position) {
            exn::bail!(ErrorKind::Network(format!("page {} unavailable", descriptor.page_url(position))));
        }
        match descriptor.page_ref(position) {
            Some(page) => Ok(page.as_bytes().to_vec()),
            None => exn::bail!(ErrorKind::NotFound(descriptor.page_url(position))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::UtcDateTime;

    fn chapters(count: usize) -> Vec<ChapterEntry> {
        (0..count)
            .map(|n| ChapterEntry::new(format!("c{n}"), format!("r{n}"), UtcDateTime::UNIX_EPOCH))
            .collect()
    }

    #[tokio::test]
    async fn test_paginated_index() {
        let provider = MockProvider::default().with_index_page_size(3).with_chapters("unit", chapters(10));
        let fetched = provider.fetch_chapters("unit", &CancellationToken::new()).await.unwrap();
        assert_eq!(fetched, chapters(10));
        assert_eq!(provider.chapter_calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_unit_is_empty() {
        let provider = MockProvider::default();
        let fetched = provider.fetch_chapters("nope", &CancellationToken::new()).await.unwrap();
        assert!(fetched.is_empty());
    }

    #[tokio::test]
    async fn test_chapter_failure() {
        let provider = MockProvider::default().with_chapters("unit", chapters(2));
        provider.fail_chapters(Some(|| ErrorKind::Parsing("bad html".into()))).await;
        let err = provider.fetch_chapters("unit", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Parsing(_)));
        provider.fail_chapters(None::<fn() -> ErrorKind>).await;
        assert!(provider.fetch_chapters("unit", &CancellationToken::new()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_observes_cancellation() {
        let provider = Arc::new(MockProvider::default().with_latency(Duration::from_secs(30)));
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let provider = Arc::clone(&provider);
            let cancel = cancel.clone();
            async move { provider.fetch_chapters("unit", &cancel).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Cancelled));
    }

    #[tokio::test]
    async fn test_descriptor_not_found() {
        let provider = MockProvider::default();
        let err = provider.fetch_download_descriptor("missing").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        assert_eq!(provider.descriptor_calls(), 1);
    }

    #[tokio::test]
    async fn test_failing_pages() {
        let provider = MockProvider::default().with_failing_pages([1]);
        let descriptor = DownloadDescriptor::new("base", ["a", "b", "c"]);
        assert_eq!(provider.fetch_page_bytes(0, &descriptor).await.unwrap(), b"a");
        let err = provider.fetch_page_bytes(1, &descriptor).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Network(_)));
        let err = provider.fetch_page_bytes(3, &descriptor).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        assert_eq!(provider.page_calls(), 3);
    }
}
