//! Runs the assistant facade over the scripted client and logs what it says.

use crate::config::Config;
use anyhow::{Context, Result};
use assistant_core::{
    Assistant, AssistantError, AssistantEvent,
    scripted::{Script, ScriptedClient},
};
use std::future::Future;
use tracing::{debug, info, warn};

/// Counts of what happened during a relay run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelaySummary {
    pub conversations: usize,
    pub errors: usize,
}

/// Plays the configured script until it is exhausted or `shutdown` resolves.
///
/// A conversation is started on every `ready` unless autostart already takes
/// care of it.
pub async fn run(config: Config, shutdown: impl Future<Output = ()>) -> Result<RelaySummary> {
    let script = Script::load(&config.script_path)?;
    info!(
        path = %config.script_path.display(),
        conversations = script.conversations.len(),
        "Loaded conversation script"
    );

    let mut client = None;
    let assistant = Assistant::new(config.overrides, |auth| {
        let scripted = ScriptedClient::new(auth, script);
        client = Some(scripted.clone());
        Ok(scripted)
    })
    .context("Failed to create the assistant")?;
    let client = client.context("Assistant did not construct its client")?;

    let mut events = assistant.subscribe();
    client.announce_ready();

    let mut summary = RelaySummary::default();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                log_event(&event);
                match event {
                    AssistantEvent::Ready if !assistant.config().autostart => {
                        let pending = assistant.start(None);
                        tokio::spawn(async move {
                            match pending.await {
                                Ok(conversation) => debug!(id = conversation.id(), "Start request completed"),
                                Err(e) => warn!(error = %e, "Start request failed"),
                            }
                        });
                    }
                    AssistantEvent::Started(_) => summary.conversations += 1,
                    AssistantEvent::Error(AssistantError::Client(_)) if client.remaining() == 0 => {
                        summary.errors += 1;
                        info!("Script exhausted");
                        break;
                    }
                    AssistantEvent::Error(_) => summary.errors += 1,
                    AssistantEvent::Ended if client.remaining() == 0 => {
                        info!("Script finished");
                        break;
                    }
                    _ => {}
                }
            },
            _ = &mut shutdown => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    info!(
        conversations = summary.conversations,
        errors = summary.errors,
        "Relay stopped"
    );
    Ok(summary)
}

fn log_event(event: &AssistantEvent) {
    match event {
        AssistantEvent::Started(conversation) => info!(id = conversation.id(), "started"),
        AssistantEvent::AudioData(data) => debug!(bytes = data.len(), "audio-data"),
        AssistantEvent::Transcription(t) => {
            info!(text = %t.transcription, done = t.done, "transcription")
        }
        AssistantEvent::Response(text) => info!(%text, "response"),
        AssistantEvent::VolumePercent(percent) => info!(percent, "volume-percent"),
        AssistantEvent::DeviceAction(action) => info!(%action, "device-action"),
        // Already logged by the facade.
        AssistantEvent::Error(_) => {}
        other => info!("{}", other.name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assistant_core::AssistantOverrides;
    use std::{io::Write, time::Duration};
    use tracing::Level;

    fn script_file(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    fn config(script: &tempfile::NamedTempFile, overrides: AssistantOverrides) -> Config {
        Config {
            overrides,
            script_path: script.path().to_path_buf(),
            log_level: Level::INFO,
        }
    }

    async fn run_to_completion(config: Config) -> RelaySummary {
        tokio::time::timeout(Duration::from_secs(2), run(config, std::future::pending()))
            .await
            .expect("Relay did not finish")
            .expect("Relay failed")
    }

    const TWO_TURNS: &str = r#"{ "conversations": [
        [
            { "type": "transcription", "text": "turn on the lights", "done": true },
            { "type": "response", "text": "Which room?" },
            { "type": "ended", "continue_conversation": true }
        ],
        [
            { "type": "transcription", "text": "kitchen", "done": true },
            { "type": "response", "text": "Done." },
            { "type": "ended" }
        ]
    ] }"#;

    #[tokio::test]
    async fn test_follow_up_runs_until_script_finishes() {
        let script = script_file(TWO_TURNS);
        let overrides = AssistantOverrides {
            always_continue: Some(false),
            ..Default::default()
        };

        let summary = run_to_completion(config(&script, overrides)).await;
        assert_eq!(
            summary,
            RelaySummary {
                conversations: 2,
                errors: 0
            }
        );
    }

    #[tokio::test]
    async fn test_always_continue_stops_when_script_is_exhausted() {
        let script = script_file(TWO_TURNS);

        let summary = run_to_completion(config(&script, AssistantOverrides::default())).await;
        assert_eq!(
            summary,
            RelaySummary {
                conversations: 2,
                errors: 1
            }
        );
    }

    #[tokio::test]
    async fn test_autostart_starts_without_relay_help() {
        let script = script_file(
            r#"{ "conversations": [[ { "type": "response", "text": "Hi" }, { "type": "ended" } ]] }"#,
        );
        let overrides = AssistantOverrides {
            autostart: Some(true),
            always_continue: Some(false),
            ..Default::default()
        };

        let summary = run_to_completion(config(&script, overrides)).await;
        assert_eq!(summary.conversations, 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_the_relay() {
        let script = script_file(r#"{ "conversations": [[ { "type": "response", "text": "Hi" } ]] }"#);

        let summary = tokio::time::timeout(
            Duration::from_secs(2),
            run(
                config(&script, AssistantOverrides::default()),
                tokio::time::sleep(Duration::from_millis(50)),
            ),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(summary.conversations, 1);
    }

    #[tokio::test]
    async fn test_missing_script_fails() {
        let config = Config {
            overrides: AssistantOverrides::default(),
            script_path: "/definitely/not/here.json".into(),
            log_level: Level::INFO,
        };
        let err = run(config, std::future::pending()).await.unwrap_err();
        assert!(err.to_string().contains("Failed to read script"));
    }
}
