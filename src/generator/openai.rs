// Chat-completions generator
// Asks for strict JSON and decodes it; everything else about the model is config

use super::{parse_generated, strip_code_fences, GeneratedPlaylist, TrackListGenerator};
use crate::config::GeneratorConfig;
use crate::error::{TallyError, TallyResult};
use crate::playlists::TrackCandidate;
use crate::spotify::retry_after_secs;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const FORMAT_RULES: &str = "You build music playlists. Respond with a single JSON object and nothing else. \
Use exactly this shape: {\"playlist_title\": string, \"description\": string, \
\"track_list\": [{\"track_name\": string, \"artist_name\": string}]}. \
Only suggest songs that really exist on Spotify. Aim for 15 to 25 tracks.";

const REPLACEMENT_RULES: &str = "You repair music playlists. Respond with a single JSON object and nothing else. \
Use exactly this shape: {\"track_list\": [{\"track_name\": string, \"artist_name\": string}]}. \
Suggest exactly one real, different song for every unavailable track, and never repeat a song already in the playlist.";

pub struct OpenAiGenerator {
    client: Client,
    api_key: String,
    api_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Replacements {
    #[serde(default)]
    track_list: Vec<TrackCandidate>,
}

impl OpenAiGenerator {
    pub fn new(config: &GeneratorConfig, timeout: Duration) -> TallyResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| TallyError::InvalidInput("generator.api_key is not set".to_string()))?;

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_key,
            api_url: config.api_url.clone(),
            model: config.model.clone(),
        })
    }

    async fn complete(&self, system: &str, user: String) -> TallyResult<String> {
        let body = json!({
            "model": self.model,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED => {
                return Err(TallyError::TransientAuth("generator rejected the api key".to_string()))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(TallyError::RateLimited {
                    retry_after: retry_after_secs(response.headers()),
                })
            }
            s if !s.is_success() => {
                let message = response.text().await.unwrap_or_default();
                return Err(TallyError::Http {
                    status: s.as_u16(),
                    message,
                });
            }
            _ => {}
        }

        let chat: ChatResponse = response.json().await?;
        first_message(chat)
    }
}

fn first_message(chat: ChatResponse) -> TallyResult<String> {
    chat.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| TallyError::NotFound("generator returned an empty answer".to_string()))
}

fn bullet_list(tracks: &[TrackCandidate]) -> String {
    tracks
        .iter()
        .map(|t| format!("- {}", t))
        .collect::<Vec<_>>()
        .join("\n")
}

fn replacement_request(prompt: &str, unresolved: &[TrackCandidate], kept: &[TrackCandidate]) -> String {
    format!(
        "Original request: {}\n\nAlready in the playlist:\n{}\n\nNot available on Spotify, replace each of these:\n{}",
        prompt,
        bullet_list(kept),
        bullet_list(unresolved)
    )
}

fn parse_replacements(text: &str) -> TallyResult<Vec<TrackCandidate>> {
    let parsed: Replacements = serde_json::from_str(strip_code_fences(text))?;
    Ok(parsed.track_list)
}

#[async_trait]
impl TrackListGenerator for OpenAiGenerator {
    async fn generate(&self, prompt: &str) -> TallyResult<GeneratedPlaylist> {
        let answer = self.complete(FORMAT_RULES, prompt.to_string()).await?;
        debug!("Generator answer: {}", answer);
        parse_generated(&answer)
    }

    async fn replace(
        &self,
        prompt: &str,
        unresolved: &[TrackCandidate],
        kept: &[TrackCandidate],
    ) -> TallyResult<Vec<TrackCandidate>> {
        let answer = self
            .complete(REPLACEMENT_RULES, replacement_request(prompt, unresolved, kept))
            .await?;
        debug!("Replacement answer: {}", answer);
        parse_replacements(&answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::candidate;

    #[test]
    fn missing_api_key_is_rejected() {
        let config = GeneratorConfig {
            api_key: Some("   ".to_string()),
            ..crate::config::Config::default().generator
        };
        let err = OpenAiGenerator::new(&config, Duration::from_secs(5)).err().unwrap();
        assert!(matches!(err, TallyError::InvalidInput(_)));
    }

    #[test]
    fn answer_is_taken_from_first_choice() {
        let chat: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": "{\"playlist_title\": \"x\"}"}}]}"#,
        )
        .unwrap();
        assert_eq!(first_message(chat).unwrap(), "{\"playlist_title\": \"x\"}");

        let empty: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(first_message(empty), Err(TallyError::NotFound(_))));
    }

    #[test]
    fn replacement_request_lists_both_sides() {
        let text = replacement_request(
            "late night drive",
            &[candidate("Ghost", "Nobody")],
            &[candidate("Nightcall", "Kavinsky")],
        );
        assert!(text.contains("late night drive"));
        assert!(text.contains("- Nightcall - Kavinsky"));
        assert!(text.ends_with("- Ghost - Nobody"));
    }

    #[test]
    fn replacements_survive_fences() {
        let raw = "```\n{\"track_list\": [{\"track_name\": \"Midnight City\", \"artist_name\": \"M83\"}]}\n```";
        assert_eq!(parse_replacements(raw).unwrap(), vec![candidate("Midnight City", "M83")]);
        assert!(parse_replacements("not json").is_err());
    }
}
