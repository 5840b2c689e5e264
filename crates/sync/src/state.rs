//! Observable state shared by the chapter engine and the page loader.

use crate::error::{ErrorKind, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use tanko_asyncutils::Published;

/// What a datasource is doing; says nothing about individual items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DatasourceState {
    /// Freshly constructed, nothing requested yet.
    #[default]
    Starting,
    /// At least one operation is running.
    Loading,
    /// Idle.
    Normal,
}

/// The three channels every datasource publishes: the current items, the
/// current [`DatasourceState`] and the error of the latest operation.
///
/// All of them replay their latest value to new observers.
pub struct Datasource<T> {
    items: Published<Vec<T>>,
    state: Published<DatasourceState>,
    error: Published<Option<ErrorKind>>,
    active: AtomicUsize,
}

impl<T> Datasource<T> {
    pub fn new() -> Self {
        Self {
            items: Published::new(Vec::new()),
            state: Published::new(DatasourceState::Starting),
            error: Published::new(None),
            active: AtomicUsize::new(0),
        }
    }

    pub fn items(&self) -> &Published<Vec<T>> {
        &self.items
    }

    pub fn state(&self) -> &Published<DatasourceState> {
        &self.state
    }

    pub fn error(&self) -> &Published<Option<ErrorKind>> {
        &self.error
    }

    /// Start an operation: clear the error and publish `Loading`.
    ///
    /// The state returns to `Normal` once every activity has been dropped,
    /// however the operations end.
    pub(crate) fn begin(&self) -> Activity<'_, T> {
        self.active.fetch_add(1, Ordering::SeqCst);
        self.error.publish(None);
        self.state.publish(DatasourceState::Loading);
        Activity { datasource: self }
    }
}

impl<T> Default for Datasource<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// One running operation of a [`Datasource`].
#[must_use = "dropping the activity immediately ends the operation"]
pub(crate) struct Activity<'a, T> {
    datasource: &'a Datasource<T>,
}

impl<T> Activity<'_, T> {
    /// End the operation, publishing its error. Cancellation isn't an error
    /// anyone needs to see, so it's only logged.
    pub(crate) fn finish(self, result: Result<()>) {
        match result {
            Ok(()) => {},
            Err(err) if err.is_cancelled() => tracing::debug!(error = %*err, "Operation cancelled"),
            Err(err) => {
                tracing::warn!(error = ?err, "Operation failed");
                self.datasource.error.publish(Some((*err).clone()));
            },
        }
    }
}

impl<T> Drop for Activity<'_, T> {
    fn drop(&mut self) {
        if self.datasource.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.datasource.state.publish(DatasourceState::Normal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let datasource = Datasource::<u32>::new();
        assert_eq!(datasource.state().current(), DatasourceState::Starting);
        let activity = datasource.begin();
        assert_eq!(datasource.state().current(), DatasourceState::Loading);
        activity.finish(Err(exn::Exn::from(ErrorKind::Network("offline".into()))));
        assert_eq!(datasource.state().current(), DatasourceState::Normal);
        assert_eq!(datasource.error().current(), Some(ErrorKind::Network("offline".into())));
        // The next operation clears it.
        let activity = datasource.begin();
        assert_eq!(datasource.error().current(), None);
        activity.finish(Ok(()));
        assert_eq!(datasource.error().current(), None);
    }

    #[test]
    fn test_cancellation_is_not_published() {
        let datasource = Datasource::<u32>::new();
        datasource.begin().finish(Err(exn::Exn::from(ErrorKind::Cancelled("superseded".into()))));
        assert_eq!(datasource.error().current(), None);
        assert_eq!(datasource.state().current(), DatasourceState::Normal);
    }

    #[test]
    fn test_overlapping_activities() {
        let datasource = Datasource::<u32>::new();
        let first = datasource.begin();
        let second = datasource.begin();
        drop(first);
        assert_eq!(datasource.state().current(), DatasourceState::Loading);
        drop(second);
        assert_eq!(datasource.state().current(), DatasourceState::Normal);
    }
}
