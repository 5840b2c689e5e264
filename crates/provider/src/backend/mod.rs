//! Provider trait and implementations.
//!
//! This module defines the [`ProviderDelegate`] trait, the single capability
//! set every content source implements, plus the built-in sources.

mod local;
#[cfg(feature = "mock")]
mod mock;

pub use self::local::LocalProvider;
#[cfg(feature = "mock")]
pub use self::mock::MockProvider;
use crate::error::Result;
use crate::models::{ChapterEntry, DownloadDescriptor};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Unified interface for content sources.
///
/// One implementation per source. Everything is asynchronous because almost
/// every source sits on the other end of a network connection; a stuck call is
/// the provider's problem, nothing above it imposes timeouts.
///
/// # Examples
///
/// ```
/// use tanko_provider::{ProviderDelegate, error::Result};
///
/// async fn first_page(provider: &dyn ProviderDelegate, download_ref: &str) -> Result<Vec<u8>> {
///     let descriptor = provider.fetch_download_descriptor(download_ref).await?;
///     provider.fetch_page_bytes(0, &descriptor).await
/// }
/// ```
#[async_trait]
pub trait ProviderDelegate: Send + Sync {
    /// Source identifier this provider is registered under. Supposed to be
    /// unique within a [`Registry`](crate::Registry).
    fn id(&self) -> &str;

    /// Fetch the complete chapter index of a content unit.
    ///
    /// Sources that paginate their index must request every page (see
    /// [`paginate`](crate::paginate)) and check `cancel` between pages, failing
    /// with [`Cancelled`](crate::error::ErrorKind::Cancelled) once it fires.
    /// An unknown unit with no chapters is an empty list, not an error.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tokio_util::sync::CancellationToken;
    /// # use tanko_provider::{ProviderDelegate, error::Result};
    /// # async fn example(provider: &dyn ProviderDelegate) -> Result<()> {
    /// let cancel = CancellationToken::new();
    /// let chapters = provider.fetch_chapters("berserk", &cancel).await?;
    /// for chapter in chapters.iter().filter(|c| c.is_readable()) {
    ///     println!("{}: {} pages", chapter.id, chapter.page_count);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    async fn fetch_chapters(&self, unit_id: &str, cancel: &CancellationToken) -> Result<Vec<ChapterEntry>>;

    /// Resolve a chapter's download reference into a [`DownloadDescriptor`].
    async fn fetch_download_descriptor(&self, download_ref: &str) -> Result<DownloadDescriptor>;

    /// Fetch the bytes of the page at `position`.
    ///
    /// Fails with a provider-specific error (network, parsing, not found) if
    /// the page is unavailable.
    async fn fetch_page_bytes(&self, position: usize, descriptor: &DownloadDescriptor) -> Result<Vec<u8>>;

    /// Best-effort address of a page, used only for diagnostics when a fetch
    /// fails. Must not fail.
    fn build_page_url(&self, position: usize, descriptor: &DownloadDescriptor) -> String {
        descriptor.page_url(position)
    }
}
