//! Chat clients for vision and text models.
//!
//! [`VlmClient`] speaks the Anthropic messages wire format: image blocks as
//! base64 with an explicit media type, followed by a text block. The
//! response is expected to be a single text block which callers hand to the
//! recovery parser.
//!
//! Authentication, quota and network failures surface as distinct
//! [`VlmError`] kinds so pipelines can decide between text-only fallback
//! and aborting.

use std::path::Path;
use std::time::{Duration, Instant};

use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const GEMINI_API_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";

/// Default vision model.
pub const DEFAULT_VISION_MODEL: &str = "claude-sonnet-4-5-20250929";

/// Per-call timeout. Vision calls routinely take tens of seconds.
const CALL_TIMEOUT: Duration = Duration::from_secs(180);

/// Minimum gap between paced calls.
const MIN_CALL_GAP: Duration = Duration::from_millis(500);

/// Returned when every text-chat provider failed.
pub const TEXT_CHAT_APOLOGY: &str =
    "The AI service is unavailable. Please check the configured API keys.";

/// Model-call failures, keyed so the pipeline can triage.
#[derive(Debug, Error)]
pub enum VlmError {
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("quota exhausted: {0}")]
    Quota(String),
    #[error("provider error ({status}): {detail}")]
    Http { status: u16, detail: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("model returned no text content")]
    Empty,
    #[error("no API key configured for {0}")]
    MissingKey(&'static str),
    #[error("failed to read image {path}: {source}")]
    Image {
        path: String,
        source: std::io::Error,
    },
}

impl From<VlmError> for pipedoc_core::Error {
    fn from(e: VlmError) -> Self {
        let kind = match &e {
            VlmError::Auth(_) => "auth",
            VlmError::Quota(_) => "quota",
            VlmError::Network(_) => "network",
            VlmError::Http { .. } => "http",
            VlmError::Empty => "empty",
            VlmError::MissingKey(_) => "auth",
            VlmError::Image { .. } => "network",
        };
        Self::ModelUnavailable {
            kind,
            detail: e.to_string(),
        }
    }
}

// ── Anthropic wire format ──

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Image { source: ImageSource },
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(default)]
    text: Option<String>,
}

fn triage_status(status: u16, detail: String) -> VlmError {
    match status {
        401 | 403 => VlmError::Auth(detail),
        429 => VlmError::Quota(detail),
        _ => VlmError::Http { status, detail },
    }
}

fn triage_transport(e: &reqwest::Error) -> VlmError {
    VlmError::Network(e.to_string())
}

/// Vision chat client.
#[derive(Debug, Clone)]
pub struct VlmClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl VlmClient {
    #[must_use]
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        }
    }

    /// Build from `ANTHROPIC_API_KEY` with the default vision model.
    ///
    /// # Errors
    ///
    /// Fails when the key is unset or empty.
    pub fn from_env() -> Result<Self, VlmError> {
        let key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();
        if key.is_empty() {
            return Err(VlmError::MissingKey("anthropic"));
        }
        Ok(Self::new(key, DEFAULT_VISION_MODEL.to_string()))
    }

    /// Model identifier used for calls.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send an ordered list of images plus a prompt; returns the model's
    /// text.
    ///
    /// # Errors
    ///
    /// Returns a [`VlmError`] keyed by failure class.
    pub async fn chat(
        &self,
        images: &[(&Path, &str)],
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, VlmError> {
        let start = Instant::now();
        let mut content = Vec::with_capacity(images.len() + 1);
        for (path, media_type) in images {
            let bytes = std::fs::read(path).map_err(|source| VlmError::Image {
                path: path.display().to_string(),
                source,
            })?;
            content.push(ContentBlock::Image {
                source: ImageSource {
                    kind: "base64",
                    media_type: (*media_type).to_string(),
                    data: base64::engine::general_purpose::STANDARD.encode(bytes),
                },
            });
        }
        content.push(ContentBlock::Text {
            text: prompt.to_string(),
        });

        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens,
            system: None,
            messages: vec![Message {
                role: "user",
                content,
            }],
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .timeout(CALL_TIMEOUT)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| triage_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(triage_status(status.as_u16(), detail));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| VlmError::Network(format!("response decode: {e}")))?;

        let text = parsed
            .content
            .iter()
            .find_map(|b| b.text.clone())
            .ok_or(VlmError::Empty)?;

        debug!(
            model = %self.model,
            chars = text.len(),
            stop_reason = parsed.stop_reason.as_deref().unwrap_or(""),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "vision call complete"
        );
        Ok(text)
    }
}

/// [`VlmClient`] behind a minimum inter-call gap.
///
/// The provider is a remote rate-limited resource; the gap is a coarse
/// admission control. Provider-side 429/5xx still fail the page rather than
/// being retried here.
#[derive(Debug)]
pub struct PacedVlm {
    inner: VlmClient,
    last_call: Mutex<Option<Instant>>,
}

impl PacedVlm {
    #[must_use]
    pub fn new(inner: VlmClient) -> Self {
        Self {
            inner,
            last_call: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn model(&self) -> &str {
        self.inner.model()
    }

    /// As [`VlmClient::chat`], after waiting out the remainder of the
    /// 0.5-second gap since the previous call.
    ///
    /// # Errors
    ///
    /// Propagates the inner client's errors.
    pub async fn chat(
        &self,
        images: &[(&Path, &str)],
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, VlmError> {
        {
            let mut last = self.last_call.lock().await;
            if let Some(prev) = *last {
                let since = prev.elapsed();
                if since < MIN_CALL_GAP {
                    tokio::time::sleep(MIN_CALL_GAP - since).await;
                }
            }
            *last = Some(Instant::now());
        }
        self.inner.chat(images, prompt, max_tokens).await
    }
}

// ── Text chat with provider fallback ──

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: &'static str,
    messages: Vec<OpenAiMessage>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: String,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiCandidateContent,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiCandidatePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidatePart {
    #[serde(default)]
    text: String,
}

/// Text-only chat across a declared provider preference order: OpenAI
/// gpt-4o, then Anthropic, then Gemini. The first non-error response wins;
/// total failure yields [`TEXT_CHAT_APOLOGY`].
#[derive(Debug, Clone)]
pub struct TextChat {
    client: reqwest::Client,
    openai_key: String,
    anthropic_key: String,
    google_key: String,
}

impl TextChat {
    #[must_use]
    pub fn new(openai_key: String, anthropic_key: String, google_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            openai_key,
            anthropic_key,
            google_key,
        }
    }

    /// Build from `OPENAI_API_KEY` / `ANTHROPIC_API_KEY` / `GOOGLE_API_KEY`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("OPENAI_API_KEY").unwrap_or_default(),
            std::env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            std::env::var("GOOGLE_API_KEY").unwrap_or_default(),
        )
    }

    /// Run one system+user exchange through the fallback chain.
    pub async fn chat(&self, system: &str, user: &str, max_tokens: u32) -> String {
        if !self.openai_key.is_empty() {
            match self.openai(system, user, max_tokens).await {
                Ok(text) => return text,
                Err(e) => warn!(error = %e, "openai text chat failed; trying next provider"),
            }
        }
        if !self.anthropic_key.is_empty() {
            match self.anthropic(system, user, max_tokens).await {
                Ok(text) => return text,
                Err(e) => warn!(error = %e, "anthropic text chat failed; trying next provider"),
            }
        }
        if !self.google_key.is_empty() {
            match self.gemini(system, user).await {
                Ok(text) => return text,
                Err(e) => warn!(error = %e, "gemini text chat failed"),
            }
        }
        TEXT_CHAT_APOLOGY.to_string()
    }

    async fn openai(&self, system: &str, user: &str, max_tokens: u32) -> Result<String, VlmError> {
        let request = OpenAiRequest {
            model: "gpt-4o",
            messages: vec![
                OpenAiMessage {
                    role: "system",
                    content: system.to_string(),
                },
                OpenAiMessage {
                    role: "user",
                    content: user.to_string(),
                },
            ],
            max_tokens,
        };
        let response = self
            .client
            .post(OPENAI_API_URL)
            .timeout(CALL_TIMEOUT)
            .bearer_auth(&self.openai_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| triage_transport(&e))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(triage_status(status.as_u16(), detail));
        }
        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| VlmError::Network(format!("response decode: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(VlmError::Empty)
    }

    async fn anthropic(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, VlmError> {
        let request = MessagesRequest {
            model: DEFAULT_VISION_MODEL.to_string(),
            max_tokens,
            system: Some(system.to_string()),
            messages: vec![Message {
                role: "user",
                content: vec![ContentBlock::Text {
                    text: user.to_string(),
                }],
            }],
        };
        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .timeout(CALL_TIMEOUT)
            .header("x-api-key", &self.anthropic_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| triage_transport(&e))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(triage_status(status.as_u16(), detail));
        }
        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| VlmError::Network(format!("response decode: {e}")))?;
        parsed
            .content
            .iter()
            .find_map(|b| b.text.clone())
            .ok_or(VlmError::Empty)
    }

    async fn gemini(&self, system: &str, user: &str) -> Result<String, VlmError> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: format!("{system}\n\n{user}"),
                }],
            }],
        };
        let response = self
            .client
            .post(format!("{GEMINI_API_URL}?key={}", self.google_key))
            .timeout(CALL_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| triage_transport(&e))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(triage_status(status.as_u16(), detail));
        }
        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|e| VlmError::Network(format!("response decode: {e}")))?;
        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or(VlmError::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_triage() {
        assert!(matches!(triage_status(401, String::new()), VlmError::Auth(_)));
        assert!(matches!(triage_status(403, String::new()), VlmError::Auth(_)));
        assert!(matches!(triage_status(429, String::new()), VlmError::Quota(_)));
        assert!(matches!(
            triage_status(500, String::new()),
            VlmError::Http { status: 500, .. }
        ));
    }

    #[test]
    fn errors_map_to_model_unavailable_kinds() {
        let err: pipedoc_core::Error = VlmError::Quota("429".into()).into();
        match err {
            pipedoc_core::Error::ModelUnavailable { kind, .. } => assert_eq!(kind, "quota"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn image_blocks_serialize_in_anthropic_shape() {
        let block = ContentBlock::Image {
            source: ImageSource {
                kind: "base64",
                media_type: "image/png".into(),
                data: "AAAA".into(),
            },
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "image");
        assert_eq!(json["source"]["type"], "base64");
        assert_eq!(json["source"]["media_type"], "image/png");
    }

    #[tokio::test]
    async fn text_chat_without_keys_returns_apology() {
        let chat = TextChat::new(String::new(), String::new(), String::new());
        assert_eq!(chat.chat("system", "user", 64).await, TEXT_CHAT_APOLOGY);
    }
}
