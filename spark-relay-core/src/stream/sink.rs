//! Downstream sinks
//!
//! A sink is the push side of one subscriber connection. [`ChannelSink`] is
//! the in-process implementation: a bounded channel whose receiving half
//! ([`SinkReceiver`]) is handed to whatever serves the subscriber.

use async_trait::async_trait;
use futures::stream::{self, Stream};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::events::RelayEvent;

/// Push-capable output channel for one stream
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Push an event. May wait on downstream backpressure.
    async fn emit(&self, event: RelayEvent) -> crate::Result<()>;

    /// Finish the stream normally
    fn complete(&self);

    /// Finish the stream with an error
    fn fail(&self, error: &str);

    /// Resolves once the sink has terminated for any reason: completion,
    /// failure, timeout or subscriber disconnect.
    async fn closed(&self);

    fn is_closed(&self) -> bool;
}

/// Shared handle to a sink
pub type SinkHandle = Arc<dyn EventSink>;

/// Channel-backed sink
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<RelayEvent>,
    done: CancellationToken,
}

impl ChannelSink {
    /// Create a sink and its receiving half with room for `buffer` pending events
    pub fn new(buffer: usize) -> (Self, SinkReceiver) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let done = CancellationToken::new();
        (
            Self {
                tx,
                done: done.clone(),
            },
            SinkReceiver { rx, done },
        )
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: RelayEvent) -> crate::Result<()> {
        if self.done.is_cancelled() {
            return Err(crate::Error::Sink("sink already terminated".to_string()));
        }
        tokio::select! {
            sent = self.tx.send(event) => {
                sent.map_err(|_| crate::Error::Sink("subscriber disconnected".to_string()))
            }
            _ = self.done.cancelled() => {
                Err(crate::Error::Sink("sink terminated while sending".to_string()))
            }
        }
    }

    fn complete(&self) {
        self.done.cancel();
    }

    fn fail(&self, error: &str) {
        debug!(error, "Sink failed");
        self.done.cancel();
    }

    async fn closed(&self) {
        tokio::select! {
            _ = self.tx.closed() => {}
            _ = self.done.cancelled() => {}
        }
    }

    fn is_closed(&self) -> bool {
        self.done.is_cancelled() || self.tx.is_closed()
    }
}

/// Receiving half of a [`ChannelSink`]
///
/// Dropping the receiver signals a subscriber disconnect to the sink.
#[derive(Debug)]
pub struct SinkReceiver {
    rx: mpsc::Receiver<RelayEvent>,
    done: CancellationToken,
}

impl SinkReceiver {
    /// Next event, or `None` once the sink has terminated and the buffer is drained
    pub async fn recv(&mut self) -> Option<RelayEvent> {
        tokio::select! {
            biased;
            event = self.rx.recv() => event,
            _ = self.done.cancelled() => self.rx.try_recv().ok(),
        }
    }

    /// Terminate the sink from the subscriber side (timeout or explicit close)
    pub fn terminate(&self) {
        self.done.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Turn the receiver into a stream that ends after `idle_timeout` without
    /// an event, terminating the sink when that happens.
    pub fn into_stream(self, idle_timeout: Duration) -> impl Stream<Item = RelayEvent> + Send {
        stream::unfold(self, move |mut receiver| async move {
            match tokio::time::timeout(idle_timeout, receiver.recv()).await {
                Ok(Some(event)) => Some((event, receiver)),
                Ok(None) => None,
                Err(_) => {
                    debug!(?idle_timeout, "Sink idle timeout elapsed");
                    receiver.terminate();
                    None
                }
            }
        })
    }
}

impl Drop for SinkReceiver {
    fn drop(&mut self) {
        self.done.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_events_drain_after_complete() {
        let (sink, mut receiver) = ChannelSink::new(8);
        sink.emit(RelayEvent::message("a")).await.unwrap();
        sink.emit(RelayEvent::Complete).await.unwrap();
        sink.complete();

        assert_eq!(receiver.recv().await, Some(RelayEvent::message("a")));
        assert_eq!(receiver.recv().await, Some(RelayEvent::Complete));
        assert_eq!(receiver.recv().await, None);
    }

    #[tokio::test]
    async fn test_emit_after_termination_fails() {
        let (sink, receiver) = ChannelSink::new(8);
        receiver.terminate();

        assert!(sink.is_closed());
        assert!(sink.emit(RelayEvent::message("late")).await.is_err());
    }

    #[tokio::test]
    async fn test_receiver_drop_resolves_closed() {
        let (sink, receiver) = ChannelSink::new(8);
        assert!(!sink.is_closed());

        drop(receiver);
        tokio::time::timeout(Duration::from_secs(1), sink.closed())
            .await
            .expect("closed should resolve after receiver drop");
        assert!(sink.is_closed());
    }

    #[tokio::test]
    async fn test_fail_resolves_closed() {
        let (sink, _receiver) = ChannelSink::new(8);
        sink.fail("boom");
        tokio::time::timeout(Duration::from_secs(1), sink.closed())
            .await
            .expect("closed should resolve after fail");
    }

    #[tokio::test]
    async fn test_emit_unblocks_when_terminated_under_backpressure() {
        let (sink, receiver) = ChannelSink::new(1);
        sink.emit(RelayEvent::message("fills buffer")).await.unwrap();

        let pending = {
            let sink = sink.clone();
            tokio::spawn(async move { sink.emit(RelayEvent::message("blocked")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        receiver.terminate();

        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_idle_timeout_terminates_sink() {
        let (sink, receiver) = ChannelSink::new(8);
        let mut stream = Box::pin(receiver.into_stream(Duration::from_secs(60)));

        sink.emit(RelayEvent::message("first")).await.unwrap();
        assert_eq!(stream.next().await, Some(RelayEvent::message("first")));

        assert_eq!(stream.next().await, None);
        assert!(sink.is_closed());
    }
}
