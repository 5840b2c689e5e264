//! Chapter index pagination.
//!
//! Most sources hand out their chapter index a page at a time. Providers do
//! their own paging, and [`paginate`] is the loop they share: ask for
//! successive offsets until an empty page comes back, checking for
//! cancellation before every request so an outer cancellation is noticed
//! between pages rather than after the whole index.

use crate::ChapterEntry;
use crate::error::{ErrorKind, Result};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Upper bound on index pages requested in one pass. A source that never
/// returns an empty page would otherwise be asked forever.
pub const MAX_INDEX_PAGES: usize = 10_000;

/// Collect a paginated chapter index.
///
/// `fetch_page` receives the offset (number of entries collected so far) and
/// returns the next page of entries. Collection stops at the first empty
/// page. Fails with [`Cancelled`](ErrorKind::Cancelled) as soon as `cancel`
/// fires between two pages, and with [`Parsing`](ErrorKind::Parsing) if the
/// source is still returning entries after [`MAX_INDEX_PAGES`] pages.
///
/// # Examples
///
/// ```
/// use tanko_provider::{ChapterEntry, paginate};
/// use time::UtcDateTime;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let all: Vec<ChapterEntry> = (0..25)
///     .map(|n| ChapterEntry::new(format!("c{n}"), format!("r{n}"), UtcDateTime::UNIX_EPOCH))
///     .collect();
/// let cancel = CancellationToken::new();
/// let entries = paginate(&cancel, |offset| {
///     let page: Vec<_> = all.iter().skip(offset).take(10).cloned().collect();
///     async move { Ok(page) }
/// })
/// .await?;
/// assert_eq!(entries.len(), 25);
/// # Ok(())
/// # }
/// ```
pub async fn paginate<F, Fut>(cancel: &CancellationToken, mut fetch_page: F) -> Result<Vec<ChapterEntry>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Vec<ChapterEntry>>>,
{
    let mut entries = Vec::new();
    for page in 0..MAX_INDEX_PAGES {
        if cancel.is_cancelled() {
            tracing::debug!(page, collected = entries.len(), "Chapter index pagination cancelled");
            exn::bail!(ErrorKind::Cancelled);
        }
        let batch = fetch_page(entries.len()).await?;
        if batch.is_empty() {
            tracing::trace!(pages = page, collected = entries.len(), "Chapter index exhausted");
            return Ok(entries);
        }
        entries.extend(batch);
    }
    exn::bail!(ErrorKind::Parsing(format!(
        "chapter index did not end after {MAX_INDEX_PAGES} pages"
    )))
}
