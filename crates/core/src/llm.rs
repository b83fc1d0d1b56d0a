//! LLM completion capability using an OpenAI-compatible chat API
//!
//! The engine only needs `complete(system, user) -> text`. Callers treat any
//! error as "unavailable" and take their non-LLM path.

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;

/// Text completion capability
pub trait Completion {
    fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

// ============================================================================
// OpenRouter / chat completions client
// ============================================================================

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Blocking chat-completions client (OpenRouter by default)
pub struct OpenRouterClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
}

impl OpenRouterClient {
    /// Build from config; fails when no API key is configured
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow!("OPENROUTER_API_KEY is not set"))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
        })
    }
}

impl Completion for OpenRouterClient {
    fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: self.temperature,
        };

        debug!(url = %format!("{}/chat/completions", self.base_url), model = %self.model, "calling LLM");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .map_err(|e| anyhow!("LLM request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(anyhow!("LLM error {}: {}", status, body));
        }

        let resp: ChatResponse = response
            .json()
            .map_err(|e| anyhow!("Failed to parse LLM response: {}", e))?;

        extract_text_from_response(&resp)
    }
}

/// Extract text content from a chat-completions response
fn extract_text_from_response(resp: &ChatResponse) -> Result<String> {
    let chunks: Vec<&str> = resp
        .choices
        .iter()
        .filter_map(|c| c.message.content.as_deref())
        .filter(|t| !t.trim().is_empty())
        .collect();

    if chunks.is_empty() {
        return Err(anyhow!("No text found in LLM response"));
    }

    Ok(chunks.join("\n").trim().to_string())
}

// ============================================================================
// JSON extraction from free text
// ============================================================================

/// End (exclusive) of the brace-balanced object starting at `start`
fn balanced_object_end(s: &str, start: usize) -> Option<usize> {
    let mut in_str = false;
    let mut escape = false;
    let mut depth = 0usize;

    for (i, ch) in s[start..].char_indices() {
        if in_str {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_str = false;
            }
            continue;
        }

        match ch {
            '"' => in_str = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(start + i + 1);
                }
            }
            _ => {}
        }
    }

    None
}

/// Every brace-balanced `{...}` span, in order of its opening brace
pub fn json_object_spans(text: &str) -> Vec<&str> {
    text.char_indices()
        .filter(|(_, ch)| *ch == '{')
        .filter_map(|(start, _)| balanced_object_end(text, start).map(|end| &text[start..end]))
        .collect()
}

/// First span that deserializes as `T`. Prose around the JSON is expected;
/// malformed JSON is a normal `None`.
pub fn parse_first_json<T: DeserializeOwned>(text: &str) -> Option<T> {
    let s = text.trim();

    // Fast path: the whole reply is the object
    if s.starts_with('{') {
        if let Ok(parsed) = serde_json::from_str(s) {
            return Some(parsed);
        }
    }

    json_object_spans(s)
        .into_iter()
        .find_map(|span| serde_json::from_str(span).ok())
}

// ============================================================================
// Test doubles
// ============================================================================


// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[derive(Deserialize, Debug, PartialEq)]
    struct Payload {
        action: String,
    }

    #[test]
    fn test_whole_reply_is_json() {
        let p: Option<Payload> = parse_first_json(r#"  {"action": "ADD"}  "#);
        assert_eq!(p.unwrap().action, "ADD");
    }

    #[test]
    fn test_json_inside_prose() {
        let text = "了解しました。\n{\"action\": \"DELETE\", \"task_name\": \"買い物\"}\n以上です。";
        let p: Option<Payload> = parse_first_json(text);
        assert_eq!(p.unwrap().action, "DELETE");
    }

    #[test]
    fn test_second_span_used_when_first_invalid() {
        let text = "例: {action: ADD} 実際: {\"action\": \"SHOW\"}";
        let p: Option<Payload> = parse_first_json(text);
        assert_eq!(p.unwrap().action, "SHOW");
    }

    #[test]
    fn test_span_without_required_field_skipped() {
        let text = r#"{"note": "x"} {"action": "COMPLETE"}"#;
        let p: Option<Payload> = parse_first_json(text);
        assert_eq!(p.unwrap().action, "COMPLETE");
    }

    #[test]
    fn test_braces_inside_strings() {
        let text = r#"{"action": "ADD", "task_name": "fix {bug}"}"#;
        let spans = json_object_spans(text);
        assert_eq!(spans[0], text);
        let v: Value = parse_first_json(text).unwrap();
        assert_eq!(v["task_name"], "fix {bug}");
    }

    #[test]
    fn test_nested_object_spans() {
        let spans = json_object_spans(r#"x {"a": {"b": 1}} y"#);
        assert_eq!(spans, vec![r#"{"a": {"b": 1}}"#, r#"{"b": 1}"#]);
    }

    #[test]
    fn test_no_json() {
        assert!(parse_first_json::<Value>("no braces here").is_none());
        assert!(parse_first_json::<Value>("{ unterminated").is_none());
    }

    #[test]
    fn test_extract_text_from_response() {
        let resp: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": " hello "}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text_from_response(&resp).unwrap(), "hello");

        let empty: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(extract_text_from_response(&empty).is_err());
    }

    #[test]
    fn test_client_requires_key() {
        let config = LlmConfig::default();
        assert!(OpenRouterClient::from_config(&config).is_err());

        let config = LlmConfig {
            api_key: Some("sk-test".to_string()),
            base_url: "http://localhost:9/v1/".to_string(),
            ..Default::default()
        };
        let client = OpenRouterClient::from_config(&config).unwrap();
        assert_eq!(client.base_url, "http://localhost:9/v1");
    }
}
