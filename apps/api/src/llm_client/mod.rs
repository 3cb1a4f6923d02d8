//! LLM Client — the single point of entry for every model call in the autofill service.
//!
//! ARCHITECTURAL RULE: No other module may talk to the Generative Language API directly.
//! Matchers depend on the `EmbeddingProvider` / `TextGenerationProvider` traits only,
//! which is also what lets tests swap in fakes.
//!
//! One provider call = one HTTP attempt. Retries belong to the call site (see `retry`).
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub mod retry;

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
/// Text model used for generative field completion.
pub const MODEL: &str = "gemini-flash-lite-latest";
/// Embedding model used for the constant-key index and label queries.
pub const EMBEDDING_MODEL: &str = "text-embedding-004";
const EMBEDDING_TASK_TYPE: &str = "RETRIEVAL_QUERY";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Provider call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("Embedding response carried no vector")]
    MissingEmbedding,
}

impl LlmError {
    /// Network failures, timeouts, rate limits, 5xx and empty completions are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Http(_) | LlmError::Timeout(_) | LlmError::EmptyContent => true,
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            LlmError::Parse(_) | LlmError::MissingEmbedding => false,
        }
    }
}

/// Token accounting for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A finished text completion plus its usage.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

/// Computes embedding vectors for free text.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds many texts in one request. May return fewer vectors than inputs;
    /// vectors are positional (vector `i` belongs to text `i`).
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}

/// Produces a free-text completion for a prompt.
#[async_trait]
pub trait TextGenerationProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<Completion, LlmError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    model: String,
    content: Content<'a>,
    task_type: &'a str,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedRequest<'a>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    #[serde(default)]
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Option<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorBody,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    message: String,
}

impl GenerateResponse {
    /// Extracts the text of the first part of the first candidate.
    fn text(&self) -> Option<&str> {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .and_then(|c| c.parts.first())
            .and_then(|p| p.text.as_deref())
    }

    fn usage(&self) -> Usage {
        self.usage_metadata
            .as_ref()
            .map(|u| Usage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
            })
            .unwrap_or_default()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Client
// ────────────────────────────────────────────────────────────────────────────

/// Gemini REST client implementing both provider traits.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()?,
            api_key,
            base_url: GEMINI_API_URL.to_string(),
        })
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!("{}/{model}:{method}", self.base_url)
    }

    /// Posts a JSON body and decodes the response, mapping non-2xx to `LlmError::Api`.
    async fn post<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, LlmError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<GeminiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn embed_request<'a>(text: &'a str) -> EmbedRequest<'a> {
        EmbedRequest {
            model: format!("models/{EMBEDDING_MODEL}"),
            content: Content {
                role: None,
                parts: vec![Part { text }],
            },
            task_type: EMBEDDING_TASK_TYPE,
        }
    }
}

#[async_trait]
impl TextGenerationProvider for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<Completion, LlmError> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.7,
                top_p: 0.95,
                top_k: 40,
            },
        };

        let response: GenerateResponse = self
            .post(&self.model_url(MODEL, "generateContent"), &request)
            .await?;

        let text = response.text().ok_or(LlmError::EmptyContent)?.to_string();
        let usage = response.usage();

        debug!(
            "LLM call succeeded: input_tokens={}, output_tokens={}",
            usage.input_tokens, usage.output_tokens
        );

        Ok(Completion { text, usage })
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiClient {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let request = BatchEmbedRequest {
            requests: texts.iter().map(|t| Self::embed_request(t)).collect(),
        };

        let response: BatchEmbedResponse = self
            .post(
                &self.model_url(EMBEDDING_MODEL, "batchEmbedContents"),
                &request,
            )
            .await?;

        debug!(
            "Batch embedding returned {}/{} vectors",
            response.embeddings.len(),
            texts.len()
        );

        Ok(response.embeddings.into_iter().map(|e| e.values).collect())
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let response: EmbedResponse = self
            .post(
                &self.model_url(EMBEDDING_MODEL, "embedContent"),
                &Self::embed_request(text),
            )
            .await?;

        response
            .embedding
            .map(|e| e.values)
            .filter(|v| !v.is_empty())
            .ok_or(LlmError::MissingEmbedding)
    }
}
