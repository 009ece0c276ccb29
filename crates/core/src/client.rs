//! Assistant Client Contract
//!
//! The facade never talks to the assistant service directly. It drives an
//! [`AssistantClient`], which owns authentication, token storage and the wire
//! protocol, and reacts to the events that client publishes. Each started
//! exchange is represented by a [`ConversationHandle`] with its own event
//! stream.

use crate::{config::ConversationConfig, error::SharedError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tokio::sync::broadcast;

/// A live conversation, shared between the client, the facade and callers.
pub type Conversation = Arc<dyn ConversationHandle>;

/// Events published by the assistant client itself.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The client finished its own initialization and accepts start requests.
    Ready,
    Error(SharedError),
    /// A start request produced a new conversation.
    Started(Conversation),
}

/// What the user said, as recognized so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcription {
    pub transcription: String,
    /// True once recognition for the utterance is final.
    #[serde(default)]
    pub done: bool,
}

/// Events published by a single conversation.
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    /// Encoded audio of the assistant's reply.
    AudioData(Bytes),
    /// The assistant stopped listening to the user.
    EndOfUtterance,
    Transcription(Transcription),
    /// Text of the assistant's reply.
    Response(String),
    /// Requested output volume, 1 to 100.
    VolumePercent(u8),
    /// A device action for registered devices, passed through untouched.
    DeviceAction(serde_json::Value),
    /// The exchange is over. `continue_conversation` is set when the assistant
    /// expects a follow-up from the user.
    Ended {
        error: Option<SharedError>,
        continue_conversation: bool,
    },
    Error(SharedError),
}

/// The capability set the facade requires from an assistant client.
///
/// `start` only issues the request; its outcome is reported through
/// [`ClientEvent::Started`] or [`ClientEvent::Error`].
pub trait AssistantClient: Send + Sync + 'static {
    /// Requests a new conversation with the given settings.
    fn start(&self, options: ConversationConfig);

    /// Subscribes to the client's events. Events published before the call are not received.
    fn subscribe(&self) -> broadcast::Receiver<ClientEvent>;
}

/// One exchange with the assistant.
#[cfg_attr(test, mockall::automock)]
pub trait ConversationHandle: Send + Sync {
    /// Identifier assigned by the client, unique per client instance.
    fn id(&self) -> u64;

    fn subscribe(&self) -> broadcast::Receiver<ConversationEvent>;

    /// Feeds caller audio, encoded as configured, into the exchange.
    fn write_audio(&self, chunk: Bytes);

    /// Asks the client to finish the exchange. `Ended` is still published.
    fn end(&self);
}

impl fmt::Debug for dyn ConversationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conversation").field("id", &self.id()).finish()
    }
}
