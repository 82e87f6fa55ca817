//! Cancellable push subscriptions.
//!
//! A [`Subscription`] is the consumer end of a snapshot feed. It yields
//! values as a [`Stream`]; dropping it (or calling
//! [`unsubscribe`](Subscription::unsubscribe)) stops the producer. When the
//! feed is driven by a background task the task is aborted on drop, so
//! nothing outlives its subscriber.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    task: Option<JoinHandle<()>>,
}

impl<T> Subscription<T> {
    /// Subscription fed directly through `rx`'s sender.
    pub fn new(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self { rx, task: None }
    }

    /// Subscription fed by `task`, which is aborted when the subscription goes away.
    pub fn with_task(rx: mpsc::UnboundedReceiver<T>, task: JoinHandle<()>) -> Self {
        Self {
            rx,
            task: Some(task),
        }
    }

    /// Create a linked sender/subscription pair.
    pub fn channel() -> (mpsc::UnboundedSender<T>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(rx))
    }

    /// Wait for the next snapshot. `None` once the producer has stopped.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Next snapshot if one is already queued.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Explicit teardown. Equivalent to dropping.
    pub fn unsubscribe(self) {}
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.rx.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
