//! Windowed page loading.

mod loader;
mod slot;

pub use crate::pages::loader::PageWindowLoader;
pub use crate::pages::slot::{PageSlot, PageState};
