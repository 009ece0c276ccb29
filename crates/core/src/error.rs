use crate::config::ConfigError;
use std::sync::Arc;

/// An error value reported by the collaborator, shared so it can be fanned out
/// to every listener and every pending start.
pub type SharedError = Arc<anyhow::Error>;

/// Errors surfaced by the assistant facade.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AssistantError {
    /// The assistant client reported a failure (authentication, network, protocol).
    #[error("Assistant client error: {0}")]
    Client(SharedError),
    /// A live conversation reported a failure.
    #[error("Conversation error: {0}")]
    Conversation(SharedError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The client or a conversation published events faster than the facade
    /// consumed them and the oldest ones were overwritten.
    #[error("Missed {0} events from the assistant client")]
    Lagged(u64),
    /// The client stopped delivering events before the start request completed.
    #[error("Assistant client closed before the conversation started")]
    Closed,
}

impl AssistantError {
    /// Wraps an arbitrary error as a client-level failure.
    pub fn client(error: impl Into<anyhow::Error>) -> Self {
        Self::Client(Arc::new(error.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_error_display() {
        let err = AssistantError::client(anyhow!("token expired"));
        assert_eq!(err.to_string(), "Assistant client error: token expired");

        let err = AssistantError::Conversation(Arc::new(anyhow!("stream reset")));
        assert_eq!(err.to_string(), "Conversation error: stream reset");

        let err: AssistantError =
            ConfigError::InvalidValue("conversation.lang".into(), "must not be empty".into())
                .into();
        assert_eq!(
            err.to_string(),
            "Invalid value for conversation.lang: must not be empty"
        );

        let err = AssistantError::Lagged(12);
        assert_eq!(err.to_string(), "Missed 12 events from the assistant client");
    }

    #[test]
    fn test_clones_share_the_source() {
        let err = AssistantError::client(anyhow!("offline"));
        let cloned = err.clone();
        match (err, cloned) {
            (AssistantError::Client(a), AssistantError::Client(b)) => {
                assert!(Arc::ptr_eq(&a, &b))
            }
            _ => panic!("Expected two client errors"),
        }
    }
}
