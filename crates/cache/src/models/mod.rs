mod chapter;
mod unit;

pub(crate) use self::chapter::ChapterRow;
pub(crate) use self::unit::UnitRow;
