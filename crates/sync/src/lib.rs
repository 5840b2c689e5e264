//! Chapter synchronization and windowed page loading.
//!
//! Two datasources sit between a content source and whatever displays it:
//!
//! - [`ChapterSyncEngine`] keeps one content unit's chapter list in sync.
//!   It shows the locally stored list first, refetches from the source when
//!   the list is stale, merges the result (source metadata, local reading
//!   progress), publishes it and persists it.
//! - [`PageWindowLoader`] loads one chapter's pages a window at a time, with
//!   failures isolated to the page that failed.
//!
//! Both publish their items, a [`DatasourceState`] and the error of the
//! latest operation through [`Published`](tanko_asyncutils::Published)
//! channels. Errors never escape the public API; they're classified into
//! [`ErrorKind`] and published.

mod chapters;
pub mod error;
mod options;
mod pages;
mod state;

pub use crate::chapters::ChapterSyncEngine;
pub use crate::error::ErrorKind;
pub use crate::options::{PageOptions, SyncOptions};
pub use crate::pages::{PageSlot, PageState, PageWindowLoader};
pub use crate::state::{Datasource, DatasourceState};
