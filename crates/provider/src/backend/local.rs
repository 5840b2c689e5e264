//! Local filesystem provider.
//!
//! Serves chapters straight from a directory tree laid out as
//! `<root>/<unit>/<chapter>/<page images>`. Chapter directories may start with
//! their number (`"12.5 - The Black Swordsman"`); whatever follows it becomes
//! the title. Page order is the lexicographic order of the image file names.

use crate::error::{ErrorKind, Result};
use crate::id::{validate, validate_segment};
use crate::{ChapterEntry, DownloadDescriptor, ProviderDelegate};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use time::UtcDateTime;
use tokio::fs;
use tokio_util::sync::CancellationToken;

const PAGE_EXTENSIONS: [&str; 6] = ["avif", "gif", "jpeg", "jpg", "png", "webp"];

/// Local filesystem provider.
///
/// # Examples
///
/// ```no_run
/// use tanko_provider::backend::LocalProvider;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let provider = LocalProvider::new("shelf", "/srv/manga")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LocalProvider {
    id: String,
    root: PathBuf,
}
impl LocalProvider {
    /// Create a provider rooted at `root`, which must be an absolute path.
    ///
    /// The directory doesn't have to exist yet; units that can't be found are
    /// simply empty.
    pub fn new(id: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() || (root.exists() && !root.is_dir()) {
            exn::bail!(ErrorKind::InvalidId(root.display().to_string()));
        }
        Ok(Self { id: id.into(), root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.display().to_string()),
            _ => ErrorKind::Io(e),
        }
    }

    fn is_page(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| PAGE_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)))
    }

    /// Sorted file names of every page image directly inside `dir`.
    async fn page_files(dir: &Path) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(dir).await.map_err(|e| Self::map_io_error(e, dir))?;
        let mut pages = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| Self::map_io_error(e, dir))? {
            let path = entry.path();
            if !Self::is_page(&path) {
                continue;
            }
            let is_file = entry.file_type().await.map_err(|e| Self::map_io_error(e, &path))?.is_file();
            // Non-UTF8 names can't round-trip through a descriptor; skip them.
            if let (true, Some(name)) = (is_file, entry.file_name().to_str()) {
                pages.push(name.to_string());
            }
        }
        pages.sort();
        Ok(pages)
    }

    async fn chapter_entry(&self, unit: &Path, dir: &Path, name: &str) -> Result<ChapterEntry> {
        let metadata = fs::metadata(dir).await.map_err(|e| Self::map_io_error(e, dir))?;
        let published_at: UtcDateTime = metadata.modified().map_err(ErrorKind::Io)?.into();
        let page_count = Self::page_files(dir).await?.len();
        let download_ref = unit.join(name).to_string_lossy().into_owned();
        let (number, title) = parse_chapter_name(name);
        let mut entry = ChapterEntry::new(name, download_ref, published_at)
            .with_number(number)
            .with_page_count(u32::try_from(page_count).unwrap_or(u32::MAX));
        if let Some(title) = title {
            entry = entry.with_title(title);
        }
        Ok(entry)
    }

    /// The chapter directory a download reference points at: exactly
    /// `<unit>/<chapter>` below the root.
    fn chapter_dir(&self, download_ref: &str) -> Result<PathBuf> {
        let relative = validate(download_ref)?;
        if relative.components().count() != 2 {
            exn::bail!(ErrorKind::InvalidId(download_ref.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

/// Split a chapter directory name into its leading number and the remaining
/// title, e.g. `"012.5 - Guts"` into `(Some(12.5), Some("Guts"))`.
fn parse_chapter_name(name: &str) -> (Option<f64>, Option<String>) {
    let split = name.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(name.len());
    let number = name[..split].trim_end_matches('.').parse::<f64>().ok();
    let rest = match number {
        Some(_) => name[split..].trim_start_matches(|c: char| c.is_whitespace() || c == '-' || c == '_'),
        None => name,
    };
    let title = rest.trim();
    (number, (!title.is_empty()).then(|| title.to_string()))
}

#[async_trait]
impl ProviderDelegate for LocalProvider {
    fn id(&self) -> &str {
        &self.id
    }

    #[tracing::instrument(skip(self, cancel), fields(source = %self.id))]
    async fn fetch_chapters(&self, unit_id: &str, cancel: &CancellationToken) -> Result<Vec<ChapterEntry>> {
        let unit = validate_segment(unit_id)?;
        let unit_dir = self.root.join(&unit);
        let mut entries = match fs::read_dir(&unit_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %unit_dir.display(), "Unit directory does not exist");
                return Ok(Vec::new());
            },
            Err(e) => exn::bail!(Self::map_io_error(e, &unit_dir)),
        };

        let mut chapters = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| Self::map_io_error(e, &unit_dir))? {
            if cancel.is_cancelled() {
                exn::bail!(ErrorKind::Cancelled);
            }
            let path = entry.path();
            let is_dir = entry.file_type().await.map_err(|e| Self::map_io_error(e, &path))?.is_dir();
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::warn!(path = %path.display(), "Skipping chapter directory with non-UTF8 name");
                continue;
            };
            if is_dir {
                chapters.push(self.chapter_entry(&unit, &path, &name).await?);
            }
        }
        chapters.sort_by(|a, b| a.id.cmp(&b.id));
        tracing::debug!(chapters = chapters.len(), "Listed local chapters");
        Ok(chapters)
    }

    async fn fetch_download_descriptor(&self, download_ref: &str) -> Result<DownloadDescriptor> {
        let dir = self.chapter_dir(download_ref)?;
        let pages = Self::page_files(&dir).await?;
        Ok(DownloadDescriptor::new(dir.to_string_lossy(), pages))
    }

    async fn fetch_page_bytes(&self, position: usize, descriptor: &DownloadDescriptor) -> Result<Vec<u8>> {
        let Some(page) = descriptor.page_ref(position) else {
            exn::bail!(ErrorKind::NotFound(descriptor.page_url(position)));
        };
        let base = Path::new(descriptor.base());
        // Descriptors are plain data and could have been built by anyone.
        if !base.starts_with(&self.root) {
            exn::bail!(ErrorKind::InvalidId(descriptor.base().to_string()));
        }
        let path = base.join(validate_segment(page)?);
        Ok(fs::read(&path).await.map_err(|e| Self::map_io_error(e, &path))?)
    }
}
