//! Provider models.
//!
//! These are the raw shapes a source hands back: chapter index entries and
//! download descriptors. User state (read flags, progress) is layered on top
//! by the local store, never by providers.

use time::UtcDateTime;

/// One entry of a content unit's chapter index, as reported by a source.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterEntry {
    /// Unique within the content unit.
    pub id: String,
    /// Chapter number; `None` when the source doesn't know or doesn't order
    /// its chapters.
    pub number: Option<f64>,
    pub title: Option<String>,
    pub page_count: u32,
    pub published_at: UtcDateTime,
    /// Opaque reference resolved through
    /// [`fetch_download_descriptor`](crate::ProviderDelegate::fetch_download_descriptor).
    pub download_ref: String,
}
impl ChapterEntry {
    pub fn new(id: impl Into<String>, download_ref: impl Into<String>, published_at: UtcDateTime) -> Self {
        Self {
            id: id.into(),
            number: None,
            title: None,
            page_count: 0,
            published_at,
            download_ref: download_ref.into(),
        }
    }

    pub fn with_number(mut self, number: impl Into<Option<f64>>) -> Self {
        self.number = number.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_page_count(mut self, page_count: u32) -> Self {
        self.page_count = page_count;
        self
    }

    /// A chapter with no pages can't be read.
    pub fn is_readable(&self) -> bool {
        self.page_count > 0
    }
}

/// Everything needed to fetch the pages of one chapter.
///
/// Resolved once per chapter and immutable afterwards. `base` is whatever
/// addressing the source needs (a URL prefix, a directory), `pages` the
/// ordered per-page references relative to it. Two descriptors with the same
/// addressing fields are the same descriptor; [`identity`](Self::identity)
/// gives a stable digest of them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DownloadDescriptor {
    base: String,
    pages: Vec<String>,
}
impl DownloadDescriptor {
    pub fn new(base: impl Into<String>, pages: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            base: base.into(),
            pages: pages.into_iter().map(Into::into).collect(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn pages(&self) -> &[String] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// The reference of the page at `position`, if it exists.
    pub fn page_ref(&self, position: usize) -> Option<&str> {
        self.pages.get(position).map(String::as_str)
    }

    /// Best-effort address of a page, for diagnostics and fallbacks.
    ///
    /// Joins `base` and the page reference with exactly one `/`. Positions
    /// outside the descriptor produce `base#position` rather than failing.
    pub fn page_url(&self, position: usize) -> String {
        match self.page_ref(position) {
            Some(page) if page.contains("://") => page.to_string(),
            Some(page) => format!("{}/{}", self.base.trim_end_matches('/'), page.trim_start_matches('/')),
            None => format!("{}#{position}", self.base),
        }
    }

    /// BLAKE3 digest over the addressing fields.
    ///
    /// Fields are length-prefixed so that moving characters between `base`
    /// and the page references always changes the digest.
    pub fn identity(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for field in std::iter::once(&self.base).chain(&self.pages) {
            hasher.update(&(field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hasher.finalize().to_string()
    }
}
