//! Single-flight supervision.
//!
//! Starting a new operation cancels the one in flight and then *waits for it
//! to finish unwinding* before handing control to the new operation. This is
//! the only mutual exclusion the owner needs: whatever the operations touch
//! (published state, a store) is never touched by two of them at once.

use std::future::Future;
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;

struct Flight {
    token: CancellationToken,
    done: oneshot::Receiver<()>,
}

/// At most one in-flight operation per owner.
///
/// # Examples
///
/// ```
/// use tanko_asyncutils::SingleFlight;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let flights = SingleFlight::default();
/// let first = flights.supersede().await;
/// assert!(!first.is_cancelled());
///
/// // A second operation would cancel `first` and wait for it to be dropped.
/// drop(first);
/// let second = flights.supersede().await;
/// assert!(!second.is_cancelled());
/// # }
/// ```
#[derive(Default)]
pub struct SingleFlight {
    current: Mutex<Option<Flight>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new operation, superseding the previous one.
    ///
    /// Cancels the previous operation's token and waits until its
    /// [`FlightGuard`] has been dropped. If yet another operation supersedes
    /// this one while it is still waiting, the returned guard is already
    /// cancelled and the caller should return without doing anything.
    pub async fn supersede(&self) -> FlightGuard {
        let token = CancellationToken::new();
        let (done_tx, done_rx) = oneshot::channel();
        let previous = self.current.lock().await.replace(Flight {
            token: token.clone(),
            done: done_rx,
        });
        if let Some(previous) = previous {
            previous.token.cancel();
            tracing::trace!("Waiting for superseded operation to unwind");
            // The guard never sends; dropping it closes the channel, which is
            // the completion signal.
            _ = previous.done.await;
        }
        FlightGuard { token, _done: done_tx }
    }
}

/// Handle for the operation currently in flight.
///
/// Dropping the guard signals completion to whichever operation superseded it.
#[must_use = "dropping the guard immediately ends the operation"]
pub struct FlightGuard {
    token: CancellationToken,
    _done: oneshot::Sender<()>,
}

impl FlightGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once a newer operation has superseded this one.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Run `fut` until it completes or this operation is superseded,
    /// whichever happens first. Returns `None` when superseded.
    pub async fn run<F: Future>(&self, fut: F) -> Option<F::Output> {
        self.token.run_until_cancelled(fut).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_first_flight_is_not_cancelled() {
        let flights = SingleFlight::new();
        let guard = flights.supersede().await;
        assert!(!guard.is_cancelled());
    }

    #[tokio::test]
    async fn test_supersede_cancels_and_waits_for_previous() {
        let flights = Arc::new(SingleFlight::new());
        let first = flights.supersede().await;

        let waiting = Arc::clone(&flights);
        let second = tokio::spawn(async move { waiting.supersede().await.is_cancelled() });

        // The newcomer cancels us straight away...
        first.cancelled().await;
        // ...but cannot proceed until we are gone.
        tokio::task::yield_now().await;
        assert!(!second.is_finished());

        drop(first);
        assert!(!second.await.unwrap());
    }

    #[tokio::test]
    async fn test_completed_flight_does_not_block() {
        let flights = SingleFlight::new();
        drop(flights.supersede().await);
        let guard = tokio::time::timeout(Duration::from_secs(1), flights.supersede()).await.unwrap();
        assert!(!guard.is_cancelled());
    }

    #[tokio::test]
    async fn test_waiting_flight_can_itself_be_superseded() {
        let flights = Arc::new(SingleFlight::new());
        let first = flights.supersede().await;

        let second = tokio::spawn({
            let flights = Arc::clone(&flights);
            async move { flights.supersede().await.is_cancelled() }
        });
        first.cancelled().await;

        let third = tokio::spawn({
            let flights = Arc::clone(&flights);
            async move { flights.supersede().await.is_cancelled() }
        });
        // Let the third operation register itself and cancel the second.
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        drop(first);
        // The second operation was superseded while it waited.
        assert!(second.await.unwrap());
        assert!(!third.await.unwrap());
    }

    #[tokio::test]
    async fn test_run_stops_when_superseded() {
        let flights = SingleFlight::new();
        let guard = flights.supersede().await;
        guard.token().cancel();
        let result = guard.run(std::future::pending::<()>()).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_run_returns_output() {
        let flights = SingleFlight::new();
        let guard = flights.supersede().await;
        assert_eq!(guard.run(async { 42 }).await, Some(42));
    }
}
