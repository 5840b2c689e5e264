use std::collections::{HashMap, HashSet};
use tanko_cache::ChapterRecord;
use tanko_provider::ChapterEntry;

/// Merge a source's chapter index with the locally known records.
///
/// The source wins on metadata, the local record wins on reading progress
/// (matched by id). Local records the source no longer lists are left out.
/// Repeated ids keep their first occurrence. The result is in canonical order.
pub(crate) fn merge(remote: Vec<ChapterEntry>, local: &[ChapterRecord], hide_empty: bool) -> Vec<ChapterRecord> {
    let progress: HashMap<&str, &ChapterRecord> = local.iter().map(|record| (record.id.as_str(), record)).collect();
    let mut seen = HashSet::with_capacity(remote.len());
    let mut merged = Vec::with_capacity(remote.len());
    for entry in remote {
        if !seen.insert(entry.id.clone()) {
            tracing::warn!(chapter = %entry.id, "Source listed chapter twice, keeping the first");
            continue;
        }
        if hide_empty && !entry.is_readable() {
            tracing::trace!(chapter = %entry.id, "Hiding chapter without pages");
            continue;
        }
        let record = ChapterRecord::from(entry);
        merged.push(match progress.get(record.id.as_str()) {
            Some(local) => record.with_progress_of(local),
            None => record,
        });
    }
    ChapterRecord::sort(&mut merged);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::UtcDateTime;

    fn entry(id: &str, number: f64, pages: u32) -> ChapterEntry {
        ChapterEntry::new(id, format!("ref/{id}"), UtcDateTime::UNIX_EPOCH)
            .with_number(number)
            .with_page_count(pages)
    }

    fn ids(records: &[ChapterRecord]) -> Vec<&str> {
        records.iter().map(|record| record.id.as_str()).collect()
    }

    #[test]
    fn test_remote_metadata_local_progress() {
        let mut local = ChapterRecord::from(entry("c1", 1.0, 10));
        local.is_read = true;
        local.last_page_read = Some(9);
        local.title = Some("Old".to_string());
        let remote = vec![entry("c1", 1.0, 12).with_title("New"), entry("c2", 2.0, 8)];

        let merged = merge(remote, &[local], false);
        assert_eq!(ids(&merged), ["c2", "c1"]);
        assert_eq!(merged[1].title.as_deref(), Some("New"));
        assert_eq!(merged[1].page_count, 12);
        assert!(merged[1].is_read);
        assert_eq!(merged[1].last_page_read, Some(9));
        assert!(!merged[0].is_read);
    }

    #[test]
    fn test_dropped_remotely() {
        let local = [ChapterRecord::from(entry("gone", 1.0, 10))];
        let merged = merge(vec![entry("c2", 2.0, 8)], &local, false);
        assert_eq!(ids(&merged), ["c2"]);
    }

    #[test]
    fn test_duplicates_keep_first() {
        let remote = vec![entry("c1", 1.0, 10), entry("c1", 1.0, 99)];
        let merged = merge(remote, &[], false);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].page_count, 10);
    }

    #[test]
    fn test_hide_empty() {
        let remote = vec![entry("c1", 1.0, 0), entry("c2", 2.0, 8)];
        assert_eq!(ids(&merge(remote.clone(), &[], false)), ["c2", "c1"]);
        assert_eq!(ids(&merge(remote, &[], true)), ["c2"]);
    }

    #[test]
    fn test_empty() {
        assert!(merge(Vec::new(), &[], false).is_empty());
    }
}
