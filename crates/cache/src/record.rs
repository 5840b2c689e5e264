//! Stored chapter and unit records.

use std::cmp::Ordering;
use tanko_provider::ChapterEntry;
use time::UtcDateTime;

/// A chapter as the local store knows it: source metadata plus the user's
/// reading progress.
///
/// Identity is `id`, unique within a content unit. Metadata is owned by the
/// source and overwritten on every sync, progress (`is_read`,
/// `last_page_read`) is owned by the reader and never touched by a sync.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterRecord {
    pub id: String,
    pub number: Option<f64>,
    pub title: Option<String>,
    pub page_count: u32,
    pub published_at: UtcDateTime,
    pub download_ref: String,
    pub is_read: bool,
    pub last_page_read: Option<u32>,
}

impl ChapterRecord {
    /// Take over the reading progress of `other`, keeping everything else.
    pub fn with_progress_of(mut self, other: &ChapterRecord) -> Self {
        self.is_read = other.is_read;
        self.last_page_read = other.last_page_read;
        self
    }

    /// Canonical chapter ordering: highest number first (unknown numbers
    /// last), then newest first, then by id.
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        let by_number = match (self.number, other.number) {
            (Some(a), Some(b)) => b.total_cmp(&a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_number
            .then_with(|| other.published_at.cmp(&self.published_at))
            .then_with(|| self.id.cmp(&other.id))
    }

    pub fn sort(records: &mut [ChapterRecord]) {
        records.sort_by(Self::canonical_cmp);
    }
}

impl From<ChapterEntry> for ChapterRecord {
    /// A never-read record. The publication time loses its sub-second part,
    /// the store keeps whole seconds only.
    fn from(entry: ChapterEntry) -> Self {
        let published_at = entry.published_at.replace_nanosecond(0).unwrap_or(entry.published_at);
        Self {
            id: entry.id,
            number: entry.number,
            title: entry.title,
            page_count: entry.page_count,
            published_at,
            download_ref: entry.download_ref,
            is_read: false,
            last_page_read: None,
        }
    }
}

/// A content unit's sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitRecord {
    pub id: String,
    /// When the unit was last successfully synchronized; `None` means never.
    pub last_sync_at: Option<UtcDateTime>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rstest::rstest;

    pub(crate) fn record(id: &str, number: Option<f64>, published: i64) -> ChapterRecord {
        let published_at = UtcDateTime::from_unix_timestamp(published).unwrap();
        ChapterRecord::from(ChapterEntry::new(id, format!("ref/{id}"), published_at).with_number(number))
    }

    #[test]
    fn test_from_entry_truncates_timestamp() {
        let published_at = UtcDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let entry = ChapterEntry::new("c1", "ref", published_at.replace_millisecond(250).unwrap()).with_page_count(3);
        let record = ChapterRecord::from(entry);
        assert_eq!(record.published_at, published_at);
        assert_eq!(record.page_count, 3);
        assert!(!record.is_read);
        assert_eq!(record.last_page_read, None);
    }

    #[test]
    fn test_with_progress_of() {
        let mut local = record("c1", Some(1.0), 10);
        local.is_read = true;
        local.last_page_read = Some(7);
        let mut remote = record("c1", Some(1.5), 20);
        remote.title = Some("Renamed".to_string());
        let merged = remote.clone().with_progress_of(&local);
        assert_eq!(merged.number, Some(1.5));
        assert_eq!(merged.title.as_deref(), Some("Renamed"));
        assert!(merged.is_read);
        assert_eq!(merged.last_page_read, Some(7));
    }

    #[rstest]
    #[case::higher_number_first(record("a", Some(2.0), 0), record("b", Some(1.0), 0), Ordering::Less)]
    #[case::fractional(record("a", Some(1.5), 0), record("b", Some(2.0), 0), Ordering::Greater)]
    #[case::unknown_number_last(record("a", None, 99), record("b", Some(1.0), 0), Ordering::Greater)]
    #[case::newer_first(record("a", Some(1.0), 10), record("b", Some(1.0), 20), Ordering::Greater)]
    #[case::id_breaks_ties(record("a", None, 10), record("b", None, 10), Ordering::Less)]
    fn test_canonical_order(#[case] a: ChapterRecord, #[case] b: ChapterRecord, #[case] expected: Ordering) {
        assert_eq!(a.canonical_cmp(&b), expected);
        assert_eq!(b.canonical_cmp(&a), expected.reverse());
    }

    #[test]
    fn test_sort() {
        let mut records = vec![
            record("extra", None, 50),
            record("c1", Some(1.0), 10),
            record("c3", Some(3.0), 30),
            record("c2", Some(2.0), 20),
        ];
        ChapterRecord::sort(&mut records);
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["c3", "c2", "c1", "extra"]);
    }
}
