//! Replay-latest observable values.

use async_stream::stream;
use futures::Stream;
use tokio::sync::watch;

/// A single-writer, many-reader cell that always holds a current value.
///
/// Built on [`tokio::sync::watch`]: publishing never blocks and never waits
/// for observers, observers that fall behind only ever see the most recent
/// value (intermediate values are coalesced), and anyone subscribing late
/// still gets the current value immediately.
///
/// # Examples
///
/// ```
/// use futures::StreamExt;
/// use tanko_asyncutils::Published;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cell = Published::new(0_u32);
/// cell.publish(7);
///
/// // Late subscribers replay the latest value first.
/// let mut updates = Box::pin(cell.stream());
/// assert_eq!(updates.next().await, Some(7));
///
/// cell.publish(8);
/// assert_eq!(updates.next().await, Some(8));
/// # }
/// ```
#[derive(Debug)]
pub struct Published<T> {
    sender: watch::Sender<T>,
}

impl<T> Published<T> {
    pub fn new(initial: T) -> Self {
        // The initial receiver is dropped straight away; `send_replace` and
        // `send_if_modified` keep working without any live receivers.
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    /// Replace the current value and notify every observer.
    pub fn publish(&self, value: T) {
        self.sender.send_replace(value);
    }

    /// Modify the current value in place.
    ///
    /// Observers are only notified when `modify` returns `true`; the return
    /// value is passed back to the caller.
    pub fn update(&self, modify: impl FnOnce(&mut T) -> bool) -> bool {
        self.sender.send_if_modified(modify)
    }

    /// Inspect the current value without cloning it.
    ///
    /// The value is read-locked for the duration of `inspect`, so keep it short
    /// and never `.await` inside it.
    pub fn with<R>(&self, inspect: impl FnOnce(&T) -> R) -> R {
        inspect(&self.sender.borrow())
    }

    /// Raw change notifications. The receiver starts with the current value
    /// marked as seen.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }

    /// Number of live [`subscribe`](Self::subscribe)rs and [`stream`](Self::stream)s.
    pub fn observers(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Clone> Published<T> {
    /// Clone of the current value.
    pub fn current(&self) -> T {
        self.sender.borrow().clone()
    }
}

impl<T: Clone + Send + Sync + 'static> Published<T> {
    /// Stream the current value followed by every subsequent change.
    ///
    /// The stream ends once the cell itself is dropped.
    pub fn stream(&self) -> impl Stream<Item = T> + Send + 'static {
        let mut receiver = self.sender.subscribe();
        stream! {
            // Clone out of the read guard before yielding; the guard must never
            // be held across the yield point.
            let value = receiver.borrow_and_update().clone();
            yield value;
            while receiver.changed().await.is_ok() {
                let value = receiver.borrow_and_update().clone();
                yield value;
            }
        }
    }
}

impl<T: Default> Default for Published<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
