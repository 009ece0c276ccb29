//! Assistant Session Facade
//!
//! [`Assistant`] wraps one [`AssistantClient`], merges caller configuration
//! over the defaults, and republishes everything the client and its
//! conversations report as [`AssistantEvent`]s.
//!
//! Collaborator events are consumed by a single pump task in the order the
//! client published them. If the client's channel overwrites events before
//! the pump reads them, listeners get an [`AssistantError::Lagged`]. Each
//! started conversation gets its own forwarding task that lives until the
//! conversation ends. Both only hold a weak reference to the facade, so
//! dropping the [`Assistant`] stops them.
//!
//! Listeners never lose events: every subscription has its own unbounded
//! queue.

use crate::{
    client::{AssistantClient, ClientEvent, Conversation, ConversationEvent},
    config::{AssistantConfig, AssistantOverrides, AuthConfig, ConversationOptions},
    error::{AssistantError, SharedError},
    events::{AssistantEvent, EventBus, EventStream, Subscription, spawn_listener},
};
use parking_lot::Mutex;
use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
};
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        oneshot,
    },
    task::JoinHandle,
};
use tracing::{Instrument, debug, error, info, info_span, warn};

type StartResult = Result<Conversation, AssistantError>;

/// A start request waiting for the client's `started` or `error`.
///
/// The request is registered when [`Assistant::start`] is called, not when
/// this future is first polled. It has no timeout: if the client never
/// answers, it stays pending.
#[must_use = "dropping a PendingStart discards the conversation handle"]
pub struct PendingStart {
    rx: oneshot::Receiver<StartResult>,
}

impl Future for PendingStart {
    type Output = StartResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(AssistantError::Closed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Mutable facade state. Guarded by one lock so readiness and the
/// registries always change together.
#[derive(Default)]
struct SessionState {
    /// Set once on the first `ready`, never reset.
    ready: bool,
    /// One-shot start listeners. The whole list is taken by whichever of
    /// `started` or `error` arrives first.
    pending: Vec<oneshot::Sender<StartResult>>,
    /// Starts requested before readiness with autostart disabled.
    deferred_starts: usize,
    /// The client's event stream ended; nothing can complete a start anymore.
    closed: bool,
}

struct Inner {
    config: AssistantConfig,
    client: Arc<dyn AssistantClient>,
    state: Mutex<SessionState>,
    events: EventBus<AssistantEvent>,
    conversations: AtomicU64,
}

/// The session facade.
///
/// Must be created inside a Tokio runtime.
pub struct Assistant {
    inner: Arc<Inner>,
    pump: JoinHandle<()>,
}

impl Assistant {
    /// Merges `overrides` over [`AssistantConfig::defaults`] and connects a
    /// client with the resulting credentials.
    pub fn new<C, F>(overrides: AssistantOverrides, connect: F) -> Result<Self, AssistantError>
    where
        C: AssistantClient,
        F: FnOnce(&AuthConfig) -> anyhow::Result<C>,
    {
        let config = AssistantConfig::defaults().merged(overrides)?;
        Self::from_config(config, connect)
    }

    /// Builds the facade from an already merged configuration.
    pub fn from_config<C, F>(config: AssistantConfig, connect: F) -> Result<Self, AssistantError>
    where
        C: AssistantClient,
        F: FnOnce(&AuthConfig) -> anyhow::Result<C>,
    {
        config.validate()?;
        let client: Arc<dyn AssistantClient> =
            Arc::new(connect(&config.auth).map_err(AssistantError::client)?);

        // Subscribe before anything can be published.
        let client_rx = client.subscribe();

        info!(
            key_file = %config.auth.key_file_path.display(),
            lang = %config.conversation.lang,
            autostart = config.autostart,
            always_continue = config.always_continue,
            "Assistant client connected"
        );

        let inner = Arc::new(Inner {
            config,
            client,
            state: Mutex::new(SessionState::default()),
            events: EventBus::default(),
            conversations: AtomicU64::new(0),
        });
        let pump = tokio::spawn(
            pump_client_events(Arc::downgrade(&inner), client_rx)
                .instrument(info_span!("assistant")),
        );

        Ok(Self { inner, pump })
    }

    /// Starts a conversation.
    ///
    /// `options` are applied shallowly over the stored conversation settings.
    /// If the client is not ready yet and autostart is disabled, the start is
    /// deferred until readiness and then uses the stored settings only; the
    /// options given here are not carried over.
    pub fn start(&self, options: Option<ConversationOptions>) -> PendingStart {
        self.inner.request_start(options)
    }

    /// Subscribes to every event published after this call.
    pub fn subscribe(&self) -> EventStream<AssistantEvent> {
        EventStream::new(self.inner.events.subscribe())
    }

    /// Calls `handler` for every event until the subscription is dropped.
    pub fn on<F>(&self, handler: F) -> Subscription
    where
        F: Fn(AssistantEvent) + Send + Sync + 'static,
    {
        spawn_listener(self.subscribe(), handler)
    }

    pub fn is_ready(&self) -> bool {
        self.inner.state.lock().ready
    }

    pub fn config(&self) -> &AssistantConfig {
        &self.inner.config
    }
}

impl Drop for Assistant {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

impl std::fmt::Debug for Assistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assistant")
            .field("config", &self.inner.config)
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl Inner {
    fn request_start(&self, options: Option<ConversationOptions>) -> PendingStart {
        let (tx, rx) = oneshot::channel();

        let resolved = match options {
            Some(options) => self.config.conversation.with_options(options),
            None => Ok(self.config.conversation.clone()),
        };
        let resolved = match resolved {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(error = %e, "Rejected conversation start options");
                let _ = tx.send(Err(e.into()));
                return PendingStart { rx };
            }
        };

        let issue_now = {
            let mut state = self.state.lock();
            if state.closed {
                let _ = tx.send(Err(AssistantError::Closed));
                return PendingStart { rx };
            }
            state.pending.push(tx);
            if state.ready {
                true
            } else if !self.config.autostart {
                state.deferred_starts += 1;
                debug!(
                    deferred = state.deferred_starts,
                    "Client not ready, deferring start until it is"
                );
                false
            } else {
                debug!("Client not ready, autostart will start the conversation");
                false
            }
        };

        if issue_now {
            debug!(lang = %resolved.lang, "Requesting conversation start");
            self.client.start(resolved);
        }
        PendingStart { rx }
    }

    /// A start whose outcome nobody awaits, used on readiness.
    fn start_with_defaults(&self) {
        drop(self.request_start(None));
    }

    fn on_ready(&self) {
        let deferred = {
            let mut state = self.state.lock();
            if state.ready {
                debug!("Assistant client reported ready again");
            } else {
                state.ready = true;
                info!("Assistant client is ready");
            }
            // Deferred starts run on the first readiness only; a later
            // `ready` republishes the event and autostarts, nothing more.
            std::mem::take(&mut state.deferred_starts)
        };

        self.events.emit(AssistantEvent::Ready);

        if self.config.autostart {
            self.start_with_defaults();
        }
        for _ in 0..deferred {
            self.start_with_defaults();
        }
    }

    fn on_started(self: &Arc<Self>, conversation: Conversation) {
        let pending = std::mem::take(&mut self.state.lock().pending);
        self.wire_conversation(conversation.clone());
        for tx in pending {
            let _ = tx.send(Ok(conversation.clone()));
        }
    }

    fn on_client_error(&self, error: SharedError) {
        let pending = std::mem::take(&mut self.state.lock().pending);
        let error = AssistantError::Client(error);
        self.report(error.clone());
        for tx in pending {
            let _ = tx.send(Err(error.clone()));
        }
    }

    fn on_client_closed(&self) {
        let pending = {
            let mut state = self.state.lock();
            state.closed = true;
            std::mem::take(&mut state.pending)
        };
        warn!(
            pending = pending.len(),
            "Assistant client event stream closed"
        );
    }

    /// Subscribes to the conversation, announces it, then forwards its
    /// events from a dedicated task.
    fn wire_conversation(self: &Arc<Self>, conversation: Conversation) {
        let generation = self.conversations.fetch_add(1, Ordering::Relaxed) + 1;
        let span = info_span!("conversation", id = conversation.id(), generation);
        let rx = conversation.subscribe();

        span.in_scope(|| info!("Conversation started"));
        self.events.emit(AssistantEvent::Started(conversation));

        tokio::spawn(forward_conversation(Arc::downgrade(self), rx).instrument(span));
    }

    fn on_conversation_ended(&self, error: Option<SharedError>, continue_conversation: bool) {
        if let Some(error) = error {
            self.report(AssistantError::Conversation(error));
            return;
        }

        if continue_conversation || self.config.always_continue {
            info!(
                continue_conversation,
                always_continue = self.config.always_continue,
                "Conversation ended, starting a follow-up"
            );
            self.client.start(self.config.conversation.clone());
        } else {
            info!("Conversation ended");
            self.events.emit(AssistantEvent::Ended);
        }
    }

    fn report(&self, error: AssistantError) {
        error!(error = %error, "Assistant error");
        self.events.emit(AssistantEvent::Error(error));
    }
}

async fn pump_client_events(inner: Weak<Inner>, mut rx: broadcast::Receiver<ClientEvent>) {
    loop {
        let received = rx.recv().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match received {
            Ok(ClientEvent::Ready) => inner.on_ready(),
            Ok(ClientEvent::Error(error)) => inner.on_client_error(error),
            Ok(ClientEvent::Started(conversation)) => inner.on_started(conversation),
            Err(RecvError::Lagged(missed)) => inner.report(AssistantError::Lagged(missed)),
            Err(RecvError::Closed) => {
                inner.on_client_closed();
                return;
            }
        }
    }
}

async fn forward_conversation(inner: Weak<Inner>, mut rx: broadcast::Receiver<ConversationEvent>) {
    loop {
        let received = rx.recv().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let event = match received {
            Ok(event) => event,
            Err(RecvError::Lagged(missed)) => {
                inner.report(AssistantError::Lagged(missed));
                continue;
            }
            Err(RecvError::Closed) => {
                debug!("Conversation closed without an end event");
                return;
            }
        };
        let forwarded = match event {
            ConversationEvent::AudioData(data) => AssistantEvent::AudioData(data),
            ConversationEvent::EndOfUtterance => AssistantEvent::EndOfUtterance,
            ConversationEvent::Transcription(t) => AssistantEvent::Transcription(t),
            ConversationEvent::Response(text) => AssistantEvent::Response(text),
            ConversationEvent::VolumePercent(percent) => AssistantEvent::VolumePercent(percent),
            ConversationEvent::DeviceAction(action) => AssistantEvent::DeviceAction(action),
            ConversationEvent::Error(error) => {
                inner.report(AssistantError::Conversation(error));
                continue;
            }
            ConversationEvent::Ended {
                error,
                continue_conversation,
            } => {
                inner.on_conversation_ended(error, continue_conversation);
                return;
            }
        };
        inner.events.emit(forwarded);
    }
}
