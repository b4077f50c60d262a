//! Gemini `generateContent` clients for the two hosted backends.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::AiConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiBackend {
    /// Google AI Studio, authenticated with an API key.
    Studio,
    /// Vertex AI, authenticated with an OAuth bearer token.
    Vertex,
}

impl fmt::Display for AiBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AiBackend::Studio => f.write_str("STUDIO"),
            AiBackend::Vertex => f.write_str("VERTEX"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("response carried no text ({0})")]
    EmptyResponse(String),
}

/// A multimodal model that answers a text prompt about one JPEG image.
#[async_trait]
pub trait VisionClient: Send + Sync {
    fn backend(&self) -> AiBackend;

    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &str, jpeg: &[u8]) -> Result<String, UpstreamError>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [RequestPart<'a>; 2],
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text {
        text: &'a str,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: &'static str,
    data: String,
}

impl<'a> GenerateRequest<'a> {
    fn new(prompt: &'a str, jpeg: &[u8]) -> Self {
        Self {
            contents: [Content {
                role: "user",
                parts: [
                    RequestPart::Text { text: prompt },
                    RequestPart::Inline {
                        inline_data: InlineData {
                            mime_type: "image/jpeg",
                            data: STANDARD.encode(jpeg),
                        },
                    },
                ],
            }],
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate.
    fn text(self) -> Result<String, UpstreamError> {
        let Some(candidate) = self.candidates.into_iter().next() else {
            let reason = self
                .prompt_feedback
                .map(|f| f.to_string())
                .unwrap_or_else(|| "no candidates".into());
            return Err(UpstreamError::EmptyResponse(reason));
        };

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.is_empty() {
            let reason = candidate.finish_reason.unwrap_or_else(|| "empty content".into());
            return Err(UpstreamError::EmptyResponse(reason));
        }
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// Map a non-success reply onto [`UpstreamError`].
fn classify(status: reqwest::StatusCode, body: &str) -> UpstreamError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let message = parsed
        .as_ref()
        .map(|e| e.error.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.trim().to_string());
    let exhausted = parsed.is_some_and(|e| e.error.status == "RESOURCE_EXHAUSTED");

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || exhausted {
        UpstreamError::QuotaExhausted(format!("{} {}", status.as_u16(), message))
    } else {
        UpstreamError::Status {
            status: status.as_u16(),
            message,
        }
    }
}

async fn post_generate(
    request: reqwest::RequestBuilder,
    prompt: &str,
    jpeg: &[u8],
) -> Result<String, UpstreamError> {
    let resp = request.json(&GenerateRequest::new(prompt, jpeg)).send().await?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(classify(status, &body));
    }

    let body: GenerateResponse = resp.json().await?;
    body.text()
}

fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(timeout).build()
}

/// Google AI Studio (`generativelanguage.googleapis.com`).
pub struct StudioClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl StudioClient {
    pub const BASE_URL: &'static str = "https://generativelanguage.googleapis.com/v1beta";

    pub fn new(api_key: String, model: String, timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: Self::BASE_URL.to_string(),
            api_key,
            model,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl VisionClient for StudioClient {
    fn backend(&self) -> AiBackend {
        AiBackend::Studio
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, jpeg: &[u8]) -> Result<String, UpstreamError> {
        debug!(bytes = jpeg.len(), model = %self.model, "Sending AI Studio request");
        let request = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())]);
        post_generate(request, prompt, jpeg).await
    }
}

/// Vertex AI (`<location>-aiplatform.googleapis.com`).
pub struct VertexClient {
    client: reqwest::Client,
    base_url: String,
    project: String,
    location: String,
    access_token: String,
    model: String,
}

impl VertexClient {
    pub fn new(
        project: String,
        location: String,
        access_token: String,
        model: String,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: format!("https://{location}-aiplatform.googleapis.com/v1"),
            project,
            location,
            access_token,
            model,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
            self.base_url, self.project, self.location, self.model
        )
    }
}

#[async_trait]
impl VisionClient for VertexClient {
    fn backend(&self) -> AiBackend {
        AiBackend::Vertex
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, jpeg: &[u8]) -> Result<String, UpstreamError> {
        debug!(bytes = jpeg.len(), model = %self.model, "Sending Vertex AI request");
        let request = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.access_token);
        post_generate(request, prompt, jpeg).await
    }
}

/// Select the configured backend. Analysis stays disabled (`None`) when the
/// backend is unknown or its credentials are missing.
pub fn build_client(config: &AiConfig) -> Option<Arc<dyn VisionClient>> {
    let client: Arc<dyn VisionClient> = match config.backend.as_str() {
        "STUDIO" => {
            let Some(key) = config.api_key.clone().filter(|k| !k.is_empty()) else {
                warn!("AI_BACKEND is STUDIO but GOOGLE_API_KEY is not set, analysis disabled");
                return None;
            };
            match StudioClient::new(key, config.studio_model.clone(), config.timeout()) {
                Ok(client) => Arc::new(client),
                Err(e) => {
                    warn!("Failed to initialise AI Studio client: {}", e);
                    return None;
                }
            }
        }
        "VERTEX" => {
            let Some(project) = config.project.clone().filter(|p| !p.is_empty()) else {
                warn!("AI_BACKEND is VERTEX but GOOGLE_CLOUD_PROJECT is not set, analysis disabled");
                return None;
            };
            let Some(token) = config.access_token.clone().filter(|t| !t.is_empty()) else {
                warn!("AI_BACKEND is VERTEX but GOOGLE_CLOUD_ACCESS_TOKEN is not set, analysis disabled");
                return None;
            };
            match VertexClient::new(
                project,
                config.location.clone(),
                token,
                config.vertex_model.clone(),
                config.timeout(),
            ) {
                Ok(client) => Arc::new(client),
                Err(e) => {
                    warn!("Failed to initialise Vertex AI client: {}", e);
                    return None;
                }
            }
        }
        other => {
            warn!("Unknown AI_BACKEND '{}', analysis disabled", other);
            return None;
        }
    };

    info!(backend = %client.backend(), model = client.model_name(), "AI backend ready");
    Some(client)
}
