//! Scripted Assistant Client
//!
//! A deterministic [`AssistantClient`] for development and integration
//! testing. It never touches the network: readiness is announced explicitly,
//! start requests are recorded, and each started conversation replays a
//! prepared list of steps.

use crate::{
    client::{
        AssistantClient, ClientEvent, ConversationEvent, ConversationHandle, Transcription,
    },
    config::{AuthConfig, ConversationConfig},
};
use anyhow::{Context, Result, anyhow};
use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer};
use std::{
    collections::VecDeque,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const CHANNEL_CAPACITY: usize = 1024;

/// One step of a scripted conversation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptStep {
    AudioData {
        /// Base64 encoded audio.
        #[serde(deserialize_with = "decode_base64")]
        data: Bytes,
    },
    EndOfUtterance,
    Transcription {
        text: String,
        #[serde(default)]
        done: bool,
    },
    Response {
        text: String,
    },
    VolumePercent {
        percent: u8,
    },
    DeviceAction {
        action: serde_json::Value,
    },
    Error {
        message: String,
    },
    Ended {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        continue_conversation: bool,
    },
}

fn decode_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD
        .decode(encoded.as_bytes())
        .map(Bytes::from)
        .map_err(serde::de::Error::custom)
}

impl ScriptStep {
    fn into_event(self) -> ConversationEvent {
        match self {
            Self::AudioData { data } => ConversationEvent::AudioData(data),
            Self::EndOfUtterance => ConversationEvent::EndOfUtterance,
            Self::Transcription { text, done } => ConversationEvent::Transcription(Transcription {
                transcription: text,
                done,
            }),
            Self::Response { text } => ConversationEvent::Response(text),
            Self::VolumePercent { percent } => ConversationEvent::VolumePercent(percent),
            Self::DeviceAction { action } => ConversationEvent::DeviceAction(action),
            Self::Error { message } => ConversationEvent::Error(Arc::new(anyhow!(message))),
            Self::Ended {
                error,
                continue_conversation,
            } => ConversationEvent::Ended {
                error: error.map(|message| Arc::new(anyhow!(message))),
                continue_conversation,
            },
        }
    }
}

/// The conversations a [`ScriptedClient`] plays, in order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    pub conversations: Vec<Vec<ScriptStep>>,
}

impl Script {
    pub fn from_json(json: &str) -> Result<Self> {
        let script: Script = serde_json::from_str(json).context("Invalid conversation script")?;
        for (index, steps) in script.conversations.iter().enumerate() {
            for step in steps {
                if let ScriptStep::VolumePercent { percent } = step {
                    if !(1..=100).contains(percent) {
                        return Err(anyhow!(
                            "Conversation {index}: volume percent {percent} is outside 1-100"
                        ));
                    }
                }
            }
        }
        Ok(script)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display()))?;
        Self::from_json(&json)
    }
}

struct ScriptedInner {
    auth: AuthConfig,
    autoplay: bool,
    events: broadcast::Sender<ClientEvent>,
    script: Mutex<VecDeque<Vec<ScriptStep>>>,
    requests: Mutex<Vec<ConversationConfig>>,
    next_id: AtomicU64,
}

/// An [`AssistantClient`] driven by a [`Script`] or by hand.
///
/// Clones share the same client, so a caller can keep a handle after giving
/// one to the facade.
#[derive(Clone)]
pub struct ScriptedClient {
    inner: Arc<ScriptedInner>,
}

impl ScriptedClient {
    /// A client that answers each start request with the next scripted
    /// conversation, and with an error once the script is exhausted.
    pub fn new(auth: &AuthConfig, script: Script) -> Self {
        Self::build(auth, script, true)
    }

    /// A client that only records start requests. Everything else is
    /// published through [`emit`](Self::emit).
    pub fn manual(auth: &AuthConfig) -> Self {
        Self::build(auth, Script::default(), false)
    }

    fn build(auth: &AuthConfig, script: Script, autoplay: bool) -> Self {
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ScriptedInner {
                auth: auth.clone(),
                autoplay,
                events,
                script: Mutex::new(script.conversations.into()),
                requests: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// The credentials this client was constructed with.
    pub fn auth(&self) -> &AuthConfig {
        &self.inner.auth
    }

    /// Publishes `Ready`, as a real client does once authentication completes.
    pub fn announce_ready(&self) {
        debug!("Scripted client announcing readiness");
        self.emit(ClientEvent::Ready);
    }

    pub fn emit(&self, event: ClientEvent) {
        let _ = self.inner.events.send(event);
    }

    /// Every start request received so far, oldest first.
    pub fn start_requests(&self) -> Vec<ConversationConfig> {
        self.inner.requests.lock().clone()
    }

    /// Scripted conversations not yet played.
    pub fn remaining(&self) -> usize {
        self.inner.script.lock().len()
    }
}

impl AssistantClient for ScriptedClient {
    fn start(&self, options: ConversationConfig) {
        let lang = options.lang.clone();
        self.inner.requests.lock().push(options);
        if !self.inner.autoplay {
            return;
        }

        let next = self.inner.script.lock().pop_front();
        match next {
            Some(steps) => {
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                info!(id, %lang, steps = steps.len(), "Scripted conversation started");
                let conversation = ScriptedConversation::replaying(id, steps);
                self.emit(ClientEvent::Started(Arc::new(conversation)));
            }
            None => {
                warn!("Start requested but the script has no conversations left");
                self.emit(ClientEvent::Error(Arc::new(anyhow!(
                    "No scripted conversations left"
                ))));
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }
}

/// A conversation that replays scripted steps, or is driven by hand.
pub struct ScriptedConversation {
    id: u64,
    events: broadcast::Sender<ConversationEvent>,
    // Taken by the first subscriber, so nothing is replayed into the void.
    pending_steps: Mutex<Option<Vec<ScriptStep>>>,
    audio_written: AtomicUsize,
}

impl ScriptedConversation {
    pub fn manual(id: u64) -> Self {
        Self::build(id, None)
    }

    fn replaying(id: u64, steps: Vec<ScriptStep>) -> Self {
        Self::build(id, Some(steps))
    }

    fn build(id: u64, steps: Option<Vec<ScriptStep>>) -> Self {
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            id,
            events,
            pending_steps: Mutex::new(steps),
            audio_written: AtomicUsize::new(0),
        }
    }

    pub fn emit(&self, event: ConversationEvent) {
        let _ = self.events.send(event);
    }

    /// Total bytes of caller audio written into this conversation.
    pub fn audio_written(&self) -> usize {
        self.audio_written.load(Ordering::Relaxed)
    }
}

impl ConversationHandle for ScriptedConversation {
    fn id(&self) -> u64 {
        self.id
    }

    fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        let rx = self.events.subscribe();
        if let Some(steps) = self.pending_steps.lock().take() {
            let tx = self.events.clone();
            tokio::spawn(async move {
                for step in steps {
                    let _ = tx.send(step.into_event());
                    tokio::task::yield_now().await;
                }
            });
        }
        rx
    }

    fn write_audio(&self, chunk: Bytes) {
        self.audio_written.fetch_add(chunk.len(), Ordering::Relaxed);
    }

    fn end(&self) {
        self.emit(ConversationEvent::Ended {
            error: None,
            continue_conversation: false,
        });
    }
}
