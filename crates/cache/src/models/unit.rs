use crate::UnitRecord;
use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use time::UtcDateTime;

#[derive(sqlx::FromRow)]
pub(crate) struct UnitRow {
    id: String,
    last_sync_at: Option<i64>,
}
impl TryFrom<UnitRow> for UnitRecord {
    type Error = Error;
    fn try_from(row: UnitRow) -> Result<Self, Self::Error> {
        let last_sync_at = row
            .last_sync_at
            .map(UtcDateTime::from_unix_timestamp)
            .transpose()
            .or_raise(|| ErrorKind::InvalidData("last sync date"))?;
        Ok(Self { id: row.id, last_sync_at })
    }
}
