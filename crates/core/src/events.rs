//! Event plumbing for the assistant facade.
//!
//! - [`AssistantEvent`] - Everything the facade publishes to its listeners
//! - [`EventBus`] - Internal fan-out dispatcher, one unbounded queue per subscriber
//! - [`EventStream`] - Lossless, ordered view of the events published after subscribing
//! - [`Subscription`] - RAII handle for callback-style listeners
//!
//! Listeners either poll a stream from [`crate::Assistant::subscribe`] or
//! register a callback with [`crate::Assistant::on`]. Dropping the returned
//! [`Subscription`] cancels the callback.

use crate::{
    client::{Conversation, Transcription},
    error::AssistantError,
};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

/// Events re-emitted by the facade. Conversation events keep the payload
/// they arrived with.
#[derive(Debug, Clone)]
pub enum AssistantEvent {
    /// The client reported readiness. Published on every occurrence.
    Ready,
    Error(AssistantError),
    /// A conversation was wired and is now forwarding its events.
    Started(Conversation),
    AudioData(Bytes),
    EndOfUtterance,
    Transcription(Transcription),
    Response(String),
    VolumePercent(u8),
    DeviceAction(serde_json::Value),
    /// A conversation ended cleanly and no follow-up was started.
    Ended,
}

impl AssistantEvent {
    /// The event name used in logs, matching the client's naming.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Error(_) => "error",
            Self::Started(_) => "started",
            Self::AudioData(_) => "audio-data",
            Self::EndOfUtterance => "end-of-utterance",
            Self::Transcription(_) => "transcription",
            Self::Response(_) => "response",
            Self::VolumePercent(_) => "volume-percent",
            Self::DeviceAction(_) => "device-action",
            Self::Ended => "ended",
        }
    }
}

/// RAII handle that cancels a callback listener when dropped.
pub struct Subscription {
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl Subscription {
    pub(crate) fn new(cancel_tx: oneshot::Sender<()>) -> Self {
        Self {
            cancel_tx: Some(cancel_tx),
        }
    }

    /// Explicitly cancels the subscription, equivalent to dropping it.
    pub fn unsubscribe(mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel_tx.is_some())
            .finish()
    }
}

/// Internal fan-out dispatcher.
///
/// Every subscriber owns an unbounded queue, so a slow listener never loses
/// events; it only delays its own view of them. Emitting with no subscribers
/// is not an error.
pub(crate) struct EventBus<E: Clone + Send + 'static> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<E>>>,
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Queues `event` for every live subscriber and forgets the ones that
    /// have gone away.
    pub fn emit(&self, event: E) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Subscribes to events emitted after this call.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of a facade subscription. Delivers every event published
/// after it was created, in order.
pub struct EventStream<E: Clone + Send + 'static> {
    rx: mpsc::UnboundedReceiver<E>,
}

impl<E: Clone + Send + 'static> EventStream<E> {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<E>) -> Self {
        Self { rx }
    }

    /// Receives the next event. Returns `None` once the source is gone.
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    /// Returns an event if one is immediately available.
    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }

    /// Number of events queued and not yet received.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Spawns a task that feeds every event from `stream` to `handler` until the
/// returned subscription is dropped or the stream closes.
pub(crate) fn spawn_listener<E, F>(mut stream: EventStream<E>, handler: F) -> Subscription
where
    E: Clone + Send + 'static,
    F: Fn(E) + Send + Sync + 'static,
{
    let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = stream.recv() => match event {
                    Some(event) => handler(event),
                    None => break,
                },
                _ = &mut cancel_rx => break,
            }
        }
    });

    Subscription::new(cancel_tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };
    use std::time::Duration;

    #[derive(Clone, Debug, PartialEq)]
    struct TestEvent {
        id: u32,
    }

    #[tokio::test]
    async fn event_bus_broadcast() {
        let bus: EventBus<TestEvent> = EventBus::new();

        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(TestEvent { id: 1 });

        assert_eq!(rx1.recv().await.unwrap().id, 1);
        assert_eq!(rx2.recv().await.unwrap().id, 1);
    }

    #[tokio::test]
    async fn event_bus_emit_without_subscribers() {
        let bus: EventBus<TestEvent> = EventBus::default();
        bus.emit(TestEvent { id: 7 });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn event_stream_keeps_everything_for_a_slow_reader() {
        let bus: EventBus<TestEvent> = EventBus::new();
        let mut stream = EventStream::new(bus.subscribe());

        for id in 0..10_000 {
            bus.emit(TestEvent { id });
        }
        assert_eq!(stream.len(), 10_000);

        for id in 0..10_000 {
            assert_eq!(stream.try_recv(), Some(TestEvent { id }));
        }
        assert!(stream.is_empty());
        assert_eq!(stream.try_recv(), None);
    }

    #[tokio::test]
    async fn event_bus_forgets_dropped_subscribers() {
        let bus: EventBus<TestEvent> = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit(TestEvent { id: 1 });
        assert_eq!(bus.subscribers.lock().len(), 1);
        drop(kept);
    }

    #[tokio::test]
    async fn event_stream_ends_when_bus_dropped() {
        let bus: EventBus<TestEvent> = EventBus::new();
        let mut stream = EventStream::new(bus.subscribe());
        drop(bus);
        assert_eq!(stream.recv().await, None);
    }

    #[tokio::test]
    async fn listener_stops_after_unsubscribe() {
        let bus: EventBus<TestEvent> = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let sub = spawn_listener(EventStream::new(bus.subscribe()), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(TestEvent { id: 1 });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        sub.unsubscribe();
        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.emit(TestEvent { id: 2 });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
