use std::collections::BTreeMap;
use std::sync::Arc;

/// Load state of a single page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageState {
    /// A fetch is in flight.
    Loading,
    /// The page's bytes.
    Remote(Arc<[u8]>),
    /// The page couldn't be fetched; carries the URL that failed so a reload
    /// can try it again.
    NotFound(String),
}

impl PageState {
    /// Whether a slot currently in this state may move to `next`.
    ///
    /// Loaded bytes are only ever replaced by newer bytes. A loading slot
    /// settles into either outcome. A failed slot can go anywhere.
    pub fn accepts(&self, next: &PageState) -> bool {
        match (self, next) {
            (PageState::NotFound(_), _) => true,
            (PageState::Loading, PageState::Loading) => false,
            (PageState::Loading, _) => true,
            (PageState::Remote(_), PageState::Remote(_)) => true,
            (PageState::Remote(_), _) => false,
        }
    }

    pub fn bytes(&self) -> Option<&Arc<[u8]>> {
        match self {
            PageState::Remote(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, PageState::Remote(_))
    }
}

/// One page of a chapter as published by the page loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSlot {
    pub position: usize,
    pub state: PageState,
}

/// Every slot published so far for one chapter, keyed by position.
///
/// Writes carry the generation they were started under; a refresh bumps the
/// generation so stragglers from windows started before it are dropped.
#[derive(Debug, Default)]
pub(crate) struct SlotTable {
    slots: BTreeMap<usize, PageState>,
    generation: u64,
    window_index: usize,
}

impl SlotTable {
    /// Forget every slot and start a new generation.
    pub(crate) fn reset(&mut self) -> u64 {
        self.slots.clear();
        self.window_index = 0;
        self.generation += 1;
        self.generation
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn window_index(&self) -> usize {
        self.window_index
    }

    /// Claim the next window of the current generation. Returns its page
    /// range, clamped to `page_count`, or `None` when every page has been
    /// claimed already.
    pub(crate) fn next_window(&mut self, window_size: usize, page_count: usize) -> Option<(usize, usize)> {
        let start = self.window_index.saturating_mul(window_size);
        if start >= page_count {
            return None;
        }
        let end = start.saturating_add(window_size).min(page_count);
        self.window_index += 1;
        Some((start, end))
    }

    pub(crate) fn has_more(&self, window_size: usize, page_count: usize) -> bool {
        self.window_index.saturating_mul(window_size) < page_count
    }

    pub(crate) fn contains(&self, position: usize) -> bool {
        self.slots.contains_key(&position)
    }

    /// Apply a write if it belongs to the current generation and the slot's
    /// current state accepts it. Returns whether the table changed.
    pub(crate) fn apply(&mut self, generation: u64, position: usize, state: PageState) -> bool {
        if generation != self.generation {
            tracing::trace!(position, generation, current = self.generation, "Dropping write from stale window");
            return false;
        }
        match self.slots.get_mut(&position) {
            Some(current) if current.accepts(&state) => {
                *current = state;
                true
            },
            Some(current) => {
                tracing::trace!(position, ?current, "Slot rejected transition");
                false
            },
            None => {
                self.slots.insert(position, state);
                true
            },
        }
    }

    /// All slots in ascending position order.
    pub(crate) fn snapshot(&self) -> Vec<PageSlot> {
        self.slots
            .iter()
            .map(|(position, state)| PageSlot { position: *position, state: state.clone() })
            .collect()
    }
}
