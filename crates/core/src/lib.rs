//! Assistant Core
//!
//! A session facade over a conversational-assistant client. The facade
//! configures authentication and audio, starts conversations, and re-emits
//! the client's events to its own listeners, continuing conversations
//! automatically when asked to.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod facade;
pub mod scripted;

pub use client::{
    AssistantClient, ClientEvent, Conversation, ConversationEvent, ConversationHandle,
    Transcription,
};
pub use config::{AssistantConfig, AssistantOverrides, ConfigError, ConversationOptions};
pub use error::{AssistantError, SharedError};
pub use events::{AssistantEvent, EventStream, Subscription};
pub use facade::{Assistant, PendingStart};
