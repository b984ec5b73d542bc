use std::{collections::VecDeque, pin::Pin, sync::{Arc, Mutex}, task::{Context, Poll, Waker}};

use futures::Stream;

use crate::{error::HubError, sync::MutexExt};

struct State<T> {
    items: VecDeque<Result<T, HubError>>,
    closed: bool,
    waker: Option<Waker>,
}

impl<T> State<T> {
    fn wake(&mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
}

/// A stream fed by hand through its [`ManualStreamCompleter`].
///
/// Items queue up until polled. After `close` or `fail` the remaining
/// items are still yielded, then the stream ends.
pub struct ManualStream<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> ManualStream<T> {
    pub fn create() -> (Self, ManualStreamCompleter<T>) {
        let state = Arc::new(Mutex::new(State {
            items: VecDeque::new(),
            closed: false,
            waker: None,
        }));

        (Self { state: state.clone() }, ManualStreamCompleter { state })
    }

    /// True once the stream was closed and everything queued was consumed.
    pub fn is_terminated(&self) -> bool {
        let state = self.state.locked();
        state.closed && state.items.is_empty()
    }
}

pub struct ManualStreamCompleter<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> ManualStreamCompleter<T> {
    pub fn push(&self, item: T) {
        let mut state = self.state.locked();
        if state.closed {
            return;
        }

        state.items.push_back(Ok(item));
        state.wake();
    }

    /// Yields `error` as the last item and ends the stream.
    pub fn fail(&self, error: HubError) {
        let mut state = self.state.locked();
        if state.closed {
            return;
        }

        state.items.push_back(Err(error));
        state.closed = true;
        state.wake();
    }

    pub fn close(&self) {
        let mut state = self.state.locked();
        state.closed = true;
        state.wake();
    }

    pub fn is_closed(&self) -> bool {
        self.state.locked().closed
    }
}

impl<T> Drop for ManualStreamCompleter<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> Stream for ManualStream<T> {
    type Item = Result<T, HubError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut state = self.state.locked();

        if let Some(item) = state.items.pop_front() {
            return Poll::Ready(Some(item));
        }

        if state.closed {
            return Poll::Ready(None);
        }

        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_queued_items_survive_failure() {
        let (mut stream, completer) = ManualStream::<i32>::create();

        completer.push(1);
        completer.fail(HubError::Timeout);
        completer.push(2);

        assert_eq!(stream.next().await, Some(Ok(1)));
        assert_eq!(stream.next().await, Some(Err(HubError::Timeout)));
        assert_eq!(stream.next().await, None);
        assert!(stream.is_terminated());
    }

    #[test_log::test(tokio::test)]
    async fn test_dropped_completer_ends_stream() {
        let (mut stream, completer) = ManualStream::<i32>::create();

        let reader = tokio::spawn(async move { stream.next().await });
        tokio::task::yield_now().await;
        drop(completer);

        assert_eq!(reader.await.unwrap(), None);
    }
}
