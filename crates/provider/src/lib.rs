//! Content providers.
//!
//! A provider is one content source: it lists the chapters of a content unit,
//! resolves a chapter's [`DownloadDescriptor`] and fetches individual pages.
//! Everything downstream talks to providers through [`ProviderHandle`], and
//! picks them by source identifier from a [`Registry`].

pub mod backend;
pub mod error;
mod id;
mod models;
mod paginate;
mod registry;

pub use crate::backend::ProviderDelegate;
pub use crate::id::validate as validate_id;
pub use crate::models::{ChapterEntry, DownloadDescriptor};
pub use crate::paginate::{MAX_INDEX_PAGES, paginate};
pub use crate::registry::Registry;
use std::sync::Arc;

pub type ProviderHandle = Arc<dyn ProviderDelegate + Send + Sync>;
