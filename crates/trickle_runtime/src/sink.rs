//! Single-subscriber result sink.
//!
//! The producer side ([`ResultSink`]) pushes items into a bounded channel and
//! waits for capacity when the subscriber falls behind. The consumer side
//! ([`ResultStream`]) is a [`futures::Stream`] that ends after exactly one
//! terminal event: normal completion or a [`StreamError`].

use crate::error::{SinkError, StreamError};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

enum SinkEvent<T> {
    Item(T),
    Error(StreamError),
}

/// Producer half of a single-subscriber ordered channel
pub struct ResultSink<T> {
    /// `None` once the terminal event was issued
    sender: Option<mpsc::Sender<SinkEvent<T>>>,
    /// Held until the one subscriber attaches
    receiver: Option<mpsc::Receiver<SinkEvent<T>>>,
    /// Channel capacity
    capacity: usize,
    /// Items accepted so far
    offered: usize,
}

impl<T: Send> ResultSink<T> {
    /// Create a sink buffering at most `capacity` items (minimum 1)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender: Some(sender),
            receiver: Some(receiver),
            capacity,
            offered: 0,
        }
    }

    /// Create a sink together with its subscription
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, ResultStream<T>) {
        let mut sink = Self::new(capacity);
        let receiver = sink.receiver.take();
        (sink, ResultStream { receiver, finished: false })
    }

    /// Take the single subscription
    ///
    /// # Errors
    ///
    /// Returns `SinkError::AlreadySubscribed` on every call after the first
    pub fn subscribe(&mut self) -> Result<ResultStream<T>, SinkError> {
        let receiver = self.receiver.take().ok_or(SinkError::AlreadySubscribed)?;
        Ok(ResultStream {
            receiver: Some(receiver),
            finished: false,
        })
    }

    /// Push an item, waiting while the buffer is full
    ///
    /// # Errors
    ///
    /// Returns `SinkError::Closed` after the terminal event or once the
    /// subscriber has been dropped
    pub async fn offer(&mut self, item: T) -> Result<(), SinkError> {
        let sender = self.sender.as_ref().ok_or(SinkError::Closed)?;
        if sender.send(SinkEvent::Item(item)).await.is_err() {
            self.sender = None;
            return Err(SinkError::Closed);
        }
        self.offered += 1;
        Ok(())
    }

    /// Deliver a terminal error; nothing can be offered afterwards
    ///
    /// # Errors
    ///
    /// Returns `SinkError::Closed` if a terminal event was already issued or
    /// the subscriber is gone
    pub async fn offer_error(&mut self, error: StreamError) -> Result<(), SinkError> {
        let sender = self.sender.take().ok_or(SinkError::Closed)?;
        sender
            .send(SinkEvent::Error(error))
            .await
            .map_err(|_| SinkError::Closed)
    }

    /// Complete the stream after the items already offered
    pub fn no_more_data(&mut self) {
        self.sender = None;
    }

    /// Whether the terminal event was issued
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.sender.is_none()
    }

    /// Items currently buffered and not yet taken by the subscriber
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.sender
            .as_ref()
            .map_or(0, |s| self.capacity.saturating_sub(s.capacity()))
    }

    /// Buffer fill ratio (0.0 - 1.0)
    #[must_use]
    pub fn fill_ratio(&self) -> f64 {
        (self.buffered() as f64 / self.capacity as f64).min(1.0)
    }

    /// Items accepted so far
    #[must_use]
    pub const fn offered(&self) -> usize {
        self.offered
    }
}

/// Consumer half of a [`ResultSink`]
pub struct ResultStream<T> {
    receiver: Option<mpsc::Receiver<SinkEvent<T>>>,
    finished: bool,
}

impl<T> ResultStream<T> {
    /// Whether the terminal event has been observed
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    fn finish(&mut self) {
        self.finished = true;
        self.receiver = None;
    }
}

impl<T> Stream for ResultStream<T> {
    type Item = Result<T, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        let Some(receiver) = this.receiver.as_mut() else {
            this.finished = true;
            return Poll::Ready(None);
        };

        match receiver.poll_recv(cx) {
            Poll::Ready(Some(SinkEvent::Item(item))) => Poll::Ready(Some(Ok(item))),
            Poll::Ready(Some(SinkEvent::Error(error))) => {
                this.finish();
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
