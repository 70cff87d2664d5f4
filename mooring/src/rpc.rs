//! The reply future returned by every request primitive.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use mooring_core::Value;

use crate::error::{LinkError, LinkResult};

/// Resolves when the matching `Return*` reply arrives, the request fails
/// locally, or the endpoint disconnects.
///
/// Await it from async code, or call [`ReplyFuture::wait`] from synchronous
/// code (never from inside an async task).
pub struct ReplyFuture {
    rx: oneshot::Receiver<LinkResult<Value>>,
}

impl ReplyFuture {
    pub(crate) fn new(rx: oneshot::Receiver<LinkResult<Value>>) -> Self {
        Self { rx }
    }

    /// A future that is already completed with `outcome`.
    pub(crate) fn ready(outcome: LinkResult<Value>) -> Self {
        let (tx, rx) = oneshot::channel();
        // The receiver is held right here; the send cannot fail.
        let _ = tx.send(outcome);
        Self { rx }
    }

    /// A future that is already failed with `error`.
    pub(crate) fn failed(error: LinkError) -> Self {
        Self::ready(Err(error))
    }

    /// Block the current thread until the reply arrives.
    ///
    /// This is the blocking convenience over the awaitable form, for callers
    /// that live outside the async runtime (proxy-generated synchronous
    /// members, plain threads).
    ///
    /// # Panics
    ///
    /// Panics if called from within an async runtime context, like every
    /// blocking receive.
    pub fn wait(self) -> LinkResult<Value> {
        self.rx
            .blocking_recv()
            .unwrap_or_else(|_| Err(LinkError::Disconnected))
    }
}

impl Future for ReplyFuture {
    type Output = LinkResult<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // Sender dropped without completing: the endpoint tore down.
            Poll::Ready(Err(_)) => Poll::Ready(Err(LinkError::Disconnected)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ready_future_resolves_immediately() {
        let fut = ReplyFuture::ready(Ok(Value::from(5)));
        assert_eq!(fut.await.expect("value"), Value::from(5));
    }

    #[tokio::test]
    async fn failed_future_carries_the_error() {
        let fut = ReplyFuture::failed(LinkError::Disconnected);
        assert!(matches!(fut.await, Err(LinkError::Disconnected)));
    }

    #[tokio::test]
    async fn dropped_sender_reads_as_disconnected() {
        let (tx, rx) = oneshot::channel();
        drop(tx);
        let fut = ReplyFuture::new(rx);
        assert!(matches!(fut.await, Err(LinkError::Disconnected)));
    }

    #[test]
    fn wait_blocks_until_completion() {
        let (tx, rx) = oneshot::channel();
        let fut = ReplyFuture::new(rx);
        let handle = std::thread::spawn(move || fut.wait());
        tx.send(Ok(Value::from("done"))).expect("send");
        let outcome = handle.join().expect("join").expect("value");
        assert_eq!(outcome, Value::from("done"));
    }
}
