use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use docrag_core::config::GenerationSettings;
use docrag_core::{Error, GenerationError, Generator, Result};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Google Gemini `generateContent` client.
pub struct GeminiGenerator {
    client: reqwest::Client,
    settings: GenerationSettings,
    api_key: String,
}

impl GeminiGenerator {
    /// `generation.api_key` wins over the `GEMINI_API_KEY` environment variable.
    pub fn from_settings(settings: &GenerationSettings) -> Result<Self> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.trim().is_empty()))
            .ok_or_else(|| Error::InvalidConfig("generation.api_key or GEMINI_API_KEY is required for answering queries".to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, settings: settings.clone(), api_key })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.settings.base_url.trim_end_matches('/'), self.settings.model)
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": self.settings.temperature,
                "topP": self.settings.top_p,
                "topK": self.settings.top_k,
                "maxOutputTokens": self.settings.max_output_tokens,
            }
        })
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn name(&self) -> &str { "gemini" }

    async fn generate(&self, prompt: &str, timeout: Duration) -> std::result::Result<String, GenerationError> {
        let resp = self
            .client
            .post(self.endpoint())
            .header(API_KEY_HEADER, self.api_key.as_str())
            .timeout(timeout)
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| map_error(e, timeout))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| map_error(e, timeout))?;
        if !status.is_success() {
            return Err(GenerationError::Upstream(format!("HTTP {}: {}", status.as_u16(), truncate(&body, 500))));
        }
        let text = extract_text(&body)?;
        debug!(model = %self.settings.model, chars = text.len(), "gemini responded");
        Ok(text)
    }
}

/// Transport errors never carry the request URL into the message.
fn map_error(err: reqwest::Error, timeout: Duration) -> GenerationError {
    if err.is_timeout() {
        GenerationError::Timeout(timeout)
    } else {
        GenerationError::Upstream(err.without_url().to_string())
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

/// Concatenated text parts of the first candidate that has any.
fn extract_text(body: &str) -> std::result::Result<String, GenerationError> {
    let parsed: GeminiResponse = serde_json::from_str(body).map_err(|e| GenerationError::Upstream(format!("invalid response body: {e}")))?;
    parsed
        .candidates
        .into_iter()
        .filter_map(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect::<String>())
        .find(|t| !t.trim().is_empty())
        .ok_or(GenerationError::EmptyResponse)
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((cut, _)) => &s[..cut],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_candidate_text() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"ENCUT is "},{"text":"the cutoff [1]."}],"role":"model"}}]}"#;
        assert_eq!(extract_text(body).unwrap(), "ENCUT is the cutoff [1].");
    }

    #[test]
    fn empty_candidates_are_empty_response() {
        assert_eq!(extract_text(r#"{"candidates":[]}"#), Err(GenerationError::EmptyResponse));
        assert_eq!(extract_text(r#"{"candidates":[{"content":{"parts":[{"text":"  "}]}}]}"#), Err(GenerationError::EmptyResponse));
        assert_eq!(extract_text(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#), Err(GenerationError::EmptyResponse));
    }

    #[test]
    fn malformed_body_is_upstream_error() {
        assert!(matches!(extract_text("<html>"), Err(GenerationError::Upstream(_))));
    }

    #[test]
    fn request_uses_configured_generation_parameters() {
        let settings = GenerationSettings { api_key: Some("k".to_string()), base_url: "https://example.test/".to_string(), ..GenerationSettings::default() };
        let generator = GeminiGenerator::from_settings(&settings).unwrap();
        assert_eq!(generator.endpoint(), "https://example.test/v1beta/models/gemini-2.5-flash:generateContent");
        let body = generator.request_body("hi");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(body["generationConfig"]["topK"], 40);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 2048);
    }

    #[tokio::test]
    async fn api_key_stays_out_of_transport_errors() {
        let settings = GenerationSettings {
            api_key: Some("SECRET-KEY-123".to_string()),
            base_url: "http://127.0.0.1:1".to_string(),
            ..GenerationSettings::default()
        };
        let generator = GeminiGenerator::from_settings(&settings).unwrap();
        let err = generator.generate("hi", Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, GenerationError::Upstream(_) | GenerationError::Timeout(_)));
        assert!(!err.to_string().contains("SECRET-KEY-123"), "{err}");
        assert!(!format!("{err:?}").contains("SECRET-KEY-123"));
    }
}
