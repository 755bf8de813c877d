//! Optional vision collaborator for last-resort selector recovery.
//!
//! The resolver only depends on the [`SelectorSuggester`] capability; when
//! none is configured, recovery is simply unavailable and the core stays
//! testable without any LLM dependency. Malformed model output is treated
//! as "no suggestion", never a crash.

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use std::path::Path;
use tracing::{debug, info};
use webpilot_core::config::VisionConfig;
use webpilot_core::{Error, Result};

#[async_trait]
pub trait SelectorSuggester: Send + Sync {
    /// Propose a selector for the described element given a screenshot.
    /// `Ok(None)` means the collaborator had no usable answer.
    async fn suggest_selector(
        &self,
        image_path: &Path,
        description: &str,
    ) -> Result<Option<String>>;
}

/// Chat-completions vision client (OpenAI-compatible endpoints).
pub struct OpenAiSuggester {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl OpenAiSuggester {
    pub fn new(config: &VisionConfig, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl SelectorSuggester for OpenAiSuggester {
    async fn suggest_selector(
        &self,
        image_path: &Path,
        description: &str,
    ) -> Result<Option<String>> {
        let bytes = std::fs::read(image_path)
            .map_err(|e| Error::Vision(format!("failed to read {}: {}", image_path.display(), e)))?;
        let data_url = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&bytes)
        );

        let prompt = format!(
            "You are a CSS selector expert. Based on the screenshot, return a JSON object \
             with the most likely CSS selector for: \"{}\". \
             Respond with JSON in the format: {{\"selector\": \"your-best-guess-selector\"}}",
            description
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": self.model,
                "messages": [{
                    "role": "user",
                    "content": [
                        {"type": "text", "text": prompt},
                        {"type": "image_url", "image_url": {"url": data_url}}
                    ]
                }],
                "max_tokens": 256
            }))
            .send()
            .await
            .map_err(|e| Error::Vision(format!("vision request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Vision(format!("vision API error {}: {}", status, text)));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| Error::Vision(format!("failed to parse vision response: {}", e)))?;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("");

        let suggestion = parse_suggestion(content);
        match &suggestion {
            Some(selector) => info!(selector, description, "vision suggested a selector"),
            None => debug!(description, "vision returned no usable selector"),
        }
        Ok(suggestion)
    }
}

/// Pull `{"selector": "..."}` out of the model's reply, which may be wrapped
/// in prose or code fences.
fn parse_suggestion(content: &str) -> Option<String> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end < start {
        return None;
    }
    let parsed: Value = serde_json::from_str(&content[start..=end]).ok()?;
    parsed
        .get("selector")
        .and_then(|s| s.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        assert_eq!(
            parse_suggestion("{\"selector\": \"a[href*='nfl']\"}").as_deref(),
            Some("a[href*='nfl']")
        );
    }

    #[test]
    fn test_parse_fenced_json() {
        let content = "Here you go:\n```json\n{\"selector\": \"#search\"}\n```";
        assert_eq!(parse_suggestion(content).as_deref(), Some("#search"));
    }

    #[test]
    fn test_malformed_output_is_no_suggestion() {
        assert!(parse_suggestion("I could not find the element.").is_none());
        assert!(parse_suggestion("{\"selector\": \"\"}").is_none());
        assert!(parse_suggestion("{not json}").is_none());
    }
}
