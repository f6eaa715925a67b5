use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Stream;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::info;

/// Default spacing between keep-alive comments on an open stream.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

/// The only two things a stream ever carries.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Sent once, first, when the stream opens.
    Connected,
    /// Comment-only frame that keeps intermediaries from timing the stream out.
    KeepAlive,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StreamState {
    Opening,
    Open,
    Closed,
}

/// Counts open streams. Shared between the HTTP layer and its tests.
#[derive(Debug, Clone, Default)]
pub struct StreamTracker {
    active: Arc<AtomicUsize>,
    next_id: Arc<AtomicU64>,
}

impl StreamTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Streams that have been opened and not yet closed or dropped.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Open a new stream whose keep-alive fires every `keepalive`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(&self, keepalive: Duration) -> EventStream {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.active.fetch_add(1, Ordering::SeqCst);
        readwise_otel::metrics().record_sse_connection();
        info!(stream_id = id, keepalive_secs = keepalive.as_secs(), "event stream opened");

        let mut ticker = tokio::time::interval_at(Instant::now() + keepalive, keepalive);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        EventStream {
            id,
            state: StreamState::Opening,
            ticker: Some(ticker),
            tracker: self.clone(),
        }
    }
}

/// One client's event stream.
///
/// Yields [`StreamEvent::Connected`] exactly once, then a
/// [`StreamEvent::KeepAlive`] per tick until closed. Dropping the stream (which
/// is what happens when the client goes away) closes it and releases the timer.
pub struct EventStream {
    id: u64,
    state: StreamState,
    ticker: Option<Interval>,
    tracker: StreamTracker,
}

impl EventStream {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn close(&mut self) {
        if self.state == StreamState::Closed {
            return;
        }
        self.state = StreamState::Closed;
        self.ticker = None;
        self.tracker.active.fetch_sub(1, Ordering::SeqCst);
        info!(stream_id = self.id, "event stream closed");
    }
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        let this = self.get_mut();
        match this.state {
            StreamState::Opening => {
                this.state = StreamState::Open;
                Poll::Ready(Some(StreamEvent::Connected))
            }
            StreamState::Open => match this.ticker.as_mut() {
                Some(ticker) => ticker
                    .poll_tick(cx)
                    .map(|_| Some(StreamEvent::KeepAlive)),
                None => Poll::Ready(None),
            },
            StreamState::Closed => Poll::Ready(None),
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.close();
    }
}
