//! Collaborators backed by the Anthropic Messages API.

use super::{ConsistencyVerifier, ServiceError, ShowTellAnalyzer, TextGenerator};
use crate::consistency::Verdict;
use crate::show_tell::Suggestion;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_BASE: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

const WRITER_SYSTEM: &str = "You are a skilled fiction co-writer. Match the author's voice, \
tense and point of view. Reply with prose only: no preamble, no commentary, no markdown.";

const VERIFIER_SYSTEM: &str = "You check fiction manuscripts for continuity errors. \
Compare a paragraph against the established description of one story entity and decide \
whether the paragraph contradicts it. Differences that the description does not settle are \
not contradictions. Respond with JSON only.";

const ANALYZER_SYSTEM: &str = "You are a developmental editor focused on \"show, don't tell\". \
Find phrases where the prose tells the reader an emotion or trait instead of showing it, and \
propose vivid alternatives. Respond with JSON only.";

/// Model settings shared by every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaudeConfig {
    pub model: String,
    pub max_tokens: usize,
    pub temperature: Option<f32>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 2048,
            temperature: Some(0.7),
            timeout_secs: 120,
        }
    }
}

impl ClaudeConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Text generation, consistency verification and show/tell analysis through Claude.
#[derive(Clone)]
pub struct ClaudeServices {
    client: reqwest::Client,
    api_key: String,
    config: ClaudeConfig,
}

impl ClaudeServices {
    /// Create services with the given API key and default settings.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ServiceError> {
        Self::with_config(api_key, ClaudeConfig::default())
    }

    /// Create services with explicit model settings.
    pub fn with_config(
        api_key: impl Into<String>,
        config: ClaudeConfig,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ServiceError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            config,
        })
    }

    /// Create services from the ANTHROPIC_API_KEY environment variable.
    pub fn from_env() -> Result<Self, ServiceError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| ServiceError::NoApiKey)?;
        Self::new(api_key)
    }

    pub fn config(&self) -> &ClaudeConfig {
        &self.config
    }

    fn build_headers(&self) -> Result<HeaderMap, ServiceError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| ServiceError::Config(format!("Invalid API key: {e}")))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        Ok(headers)
    }

    /// Send one user turn and return the concatenated text of the reply.
    #[tracing::instrument(skip_all, fields(model = %self.config.model))]
    async fn complete(&self, system: &str, prompt: String) -> Result<String, ServiceError> {
        let request = ApiRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            system: Some(system.to_string()),
            messages: vec![ApiMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(format!("{API_BASE}/messages"))
            .headers(self.build_headers()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Api {
                status,
                message: body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))?;

        tracing::debug!(
            input_tokens = api_response.usage.input_tokens,
            output_tokens = api_response.usage.output_tokens,
            "completion received"
        );

        Ok(api_response.text())
    }
}

#[async_trait]
impl TextGenerator for ClaudeServices {
    async fn continue_text(&self, text: &str) -> Result<String, ServiceError> {
        let prompt = format!(
            "Continue this story from exactly where it stops. Write one or two paragraphs. \
             Do not repeat any of the existing text.\n\n<story>\n{text}\n</story>"
        );
        self.complete(WRITER_SYSTEM, prompt).await
    }

    async fn modify(
        &self,
        text: &str,
        context: &str,
        instruction: &str,
    ) -> Result<String, ServiceError> {
        let prompt = format!(
            "Rewrite the selected passage following the instruction. Return only the \
             rewritten passage, which will replace the selection verbatim.\n\n\
             <instruction>{instruction}</instruction>\n\n\
             <context>\n{context}\n</context>\n\n\
             <selection>{text}</selection>"
        );
        self.complete(WRITER_SYSTEM, prompt).await
    }

    async fn format_rich(&self, text: &str) -> Result<String, ServiceError> {
        let prompt = format!(
            "Clean up the following notes into finished prose. Fix punctuation and \
             paragraphing. Put each paragraph on its own line with no blank lines between \
             them.\n\n<notes>\n{text}\n</notes>"
        );
        let formatted = self.complete(WRITER_SYSTEM, prompt).await?;
        Ok(collapse_blank_lines(&formatted))
    }
}

#[async_trait]
impl ConsistencyVerifier for ClaudeServices {
    async fn verify(
        &self,
        paragraph: &str,
        entity_name: &str,
        entity_description: &str,
    ) -> Result<Verdict, ServiceError> {
        let prompt = format!(
            "Established lore for {entity_name}:\n{entity_description}\n\n\
             Paragraph:\n{paragraph}\n\n\
             Does the paragraph contradict the established lore for {entity_name}? \
             Respond with a JSON object: \
             {{\"isContradictory\": true|false, \"explanation\": \"one sentence\"}}"
        );
        let response = self.complete(VERIFIER_SYSTEM, prompt).await?;
        parse_verdict(&response)
    }
}

#[async_trait]
impl ShowTellAnalyzer for ClaudeServices {
    async fn analyze(&self, full_text: &str) -> Result<Vec<Suggestion>, ServiceError> {
        let prompt = format!(
            "Find up to 10 telling phrases in the manuscript below, most important first. \
             Quote each phrase exactly as it appears. Respond with a JSON array of objects: \
             [{{\"originalText\": \"...\", \"explanation\": \"...\", \
             \"alternatives\": [\"...\", \"...\", \"...\"]}}]\n\n\
             <manuscript>\n{full_text}\n</manuscript>"
        );
        let response = self.complete(ANALYZER_SYSTEM, prompt).await?;
        parse_suggestions(&response)
    }
}

/// Parse a verifier reply.
fn parse_verdict(response: &str) -> Result<Verdict, ServiceError> {
    serde_json::from_str(extract_json(response))
        .map_err(|e| ServiceError::Parse(format!("verdict: {e}")))
}

/// Parse an analyzer reply: a bare array or an object with a `suggestions` array.
fn parse_suggestions(response: &str) -> Result<Vec<Suggestion>, ServiceError> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Reply {
        List(Vec<Suggestion>),
        Wrapped { suggestions: Vec<Suggestion> },
    }

    let reply: Reply = serde_json::from_str(extract_json(response))
        .map_err(|e| ServiceError::Parse(format!("suggestions: {e}")))?;
    let suggestions = match reply {
        Reply::List(list) => list,
        Reply::Wrapped { suggestions } => suggestions,
    };
    Ok(suggestions
        .into_iter()
        .filter(|s| !s.original_text.trim().is_empty())
        .collect())
}

/// Extract JSON from a response that might be wrapped in markdown code blocks.
fn extract_json(text: &str) -> &str {
    let text = text.trim();

    // ```json ... ```
    if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    // ``` ... ``` without a language tag
    if let Some(start) = text.find("```") {
        let content_start = start + 3;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    // Prose around a bare object or array
    let open = text.find(['{', '[']);
    let close = text.rfind(['}', ']']);
    match (open, close) {
        (Some(open), Some(close)) if open < close => &text[open..=close],
        _ => text,
    }
}

fn collapse_blank_lines(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ApiContent>,
    usage: ApiUsage,
}

impl ApiResponse {
    fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ApiContent::Text { text } => Some(text.as_str()),
                ApiContent::Other => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContent {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: usize,
    output_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_plain() {
        let text = r#"{"isContradictory": false}"#;
        assert_eq!(extract_json(text), text);
    }

    #[test]
    fn test_extract_json_code_block() {
        let text = "Here you go:\n```json\n{\"isContradictory\": true}\n```";
        assert_eq!(extract_json(text), r#"{"isContradictory": true}"#);
    }

    #[test]
    fn test_extract_json_bare_fence() {
        let text = "```\n[]\n```";
        assert_eq!(extract_json(text), "[]");
    }

    #[test]
    fn test_extract_json_surrounding_prose() {
        let text = "Sure. [{\"originalText\": \"was sad\"}] Hope that helps.";
        assert_eq!(extract_json(text), r#"[{"originalText": "was sad"}]"#);
    }

    #[test]
    fn test_parse_verdict() {
        let verdict = parse_verdict(
            "```json\n{\"isContradictory\": true, \"explanation\": \"Her eyes are green.\"}\n```",
        )
        .unwrap();
        assert_eq!(verdict, Verdict::contradiction("Her eyes are green."));

        let missing = parse_verdict(r#"{"isContradictory": true}"#).unwrap();
        assert!(missing.is_contradictory);
        assert!(missing.explanation.is_none());

        assert!(matches!(
            parse_verdict("I think it is fine."),
            Err(ServiceError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_suggestions_both_shapes() {
        let bare = parse_suggestions(
            r#"[{"originalText": "was angry", "explanation": "tells", "alternatives": ["fists clenched"]}]"#,
        )
        .unwrap();
        assert_eq!(bare.len(), 1);
        assert_eq!(bare[0].original_text, "was angry");

        let wrapped = parse_suggestions(
            r#"{"suggestions": [{"originalText": "felt sad"}, {"originalText": "  "}]}"#,
        )
        .unwrap();
        assert_eq!(wrapped.len(), 1);
        assert!(wrapped[0].alternatives.is_empty());
        assert_ne!(bare[0].id, wrapped[0].id);
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(
            collapse_blank_lines("First.\n\n  \nSecond.  \n"),
            "First.\nSecond."
        );
    }

    #[test]
    fn test_response_text_skips_other_blocks() {
        let response: ApiResponse = serde_json::from_str(
            r#"{"content": [{"type": "thinking", "thinking": "hmm"}, {"type": "text", "text": "Hello"}],
                "usage": {"input_tokens": 3, "output_tokens": 1}}"#,
        )
        .unwrap();
        assert_eq!(response.text(), "Hello");
    }

    #[test]
    fn test_config_defaults() {
        let config: ClaudeConfig = serde_json::from_str(r#"{"max_tokens": 512}"#).unwrap();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.max_tokens, 512);
    }
}
