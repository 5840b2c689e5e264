use crate::ChapterRecord;
use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use time::UtcDateTime;

#[derive(sqlx::FromRow)]
pub(crate) struct ChapterRow {
    pub(crate) unit_id: String,
    pub(crate) id: String,
    #[sqlx(default)]
    pub(crate) number: Option<f64>,
    #[sqlx(default)]
    pub(crate) title: Option<String>,
    pub(crate) page_count: i64,
    pub(crate) published_at: i64,
    pub(crate) download_ref: String,
    pub(crate) is_read: bool,
    #[sqlx(default)]
    pub(crate) last_page_read: Option<i64>,
}
impl ChapterRow {
    pub(crate) fn new(unit_id: &str, record: &ChapterRecord) -> Self {
        Self {
            unit_id: unit_id.to_string(),
            id: record.id.clone(),
            number: record.number,
            title: record.title.clone(),
            page_count: i64::from(record.page_count),
            published_at: record.published_at.unix_timestamp(),
            download_ref: record.download_ref.clone(),
            is_read: record.is_read,
            last_page_read: record.last_page_read.map(i64::from),
        }
    }
}
impl TryFrom<ChapterRow> for ChapterRecord {
    type Error = Error;
    fn try_from(row: ChapterRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            number: row.number,
            title: row.title,
            page_count: u32::try_from(row.page_count).or_raise(|| ErrorKind::InvalidData("page count"))?,
            published_at: UtcDateTime::from_unix_timestamp(row.published_at)
                .or_raise(|| ErrorKind::InvalidData("publication date"))?,
            download_ref: row.download_ref,
            is_read: row.is_read,
            last_page_read: row
                .last_page_read
                .map(u32::try_from)
                .transpose()
                .or_raise(|| ErrorKind::InvalidData("last page read"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> ChapterRow {
        ChapterRow {
            unit_id: "berserk".to_string(),
            id: "c1".to_string(),
            number: Some(1.0),
            title: Some("The Black Swordsman".to_string()),
            page_count: 24,
            published_at: 1_700_000_000,
            download_ref: "berserk/c1".to_string(),
            is_read: true,
            last_page_read: Some(12),
        }
    }

    #[test]
    fn test_row_to_record() {
        let record = ChapterRecord::try_from(row()).unwrap();
        assert_eq!(record.page_count, 24);
        assert_eq!(record.published_at.unix_timestamp(), 1_700_000_000);
        assert_eq!(record.last_page_read, Some(12));
        let back = ChapterRow::new("berserk", &record);
        assert_eq!(back.published_at, 1_700_000_000);
        assert_eq!(back.last_page_read, Some(12));
    }

    #[test]
    fn test_negative_page_count_rejected() {
        let err = ChapterRecord::try_from(ChapterRow { page_count: -1, ..row() }).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData("page count")));
    }
}
