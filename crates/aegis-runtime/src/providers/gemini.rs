//! Google Gemini backend over the `generateContent` REST API, in JSON mode.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::{JsonAnswer, JsonPrompt, LlmProvider, ProviderError};
use crate::config::ProviderSettings;

pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

// Analysis answers are short structured documents; keep sampling tight.
const TEMPERATURE: f32 = 0.3;
const MAX_OUTPUT_TOKENS: u32 = 1024;

/// Gemini API key. Never printed by `Debug` or `Display`.
pub struct ApiKey(SecretString);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    /// Read `GEMINI_API_KEY`. Blank values count as unset.
    pub fn from_env() -> Result<Self, ProviderError> {
        std::env::var(GEMINI_API_KEY_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(Self::new)
            .ok_or_else(|| {
                ProviderError::MissingCredential(format!("{GEMINI_API_KEY_ENV} is not set"))
            })
    }

    fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[derive(Debug)]
pub struct GeminiProvider {
    key: ApiKey,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(key: ApiKey, settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?;

        Ok(Self {
            key,
            base_url: DEFAULT_BASE_URL.to_string(),
            client,
        })
    }

    pub fn from_env(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        Self::new(ApiKey::from_env()?, settings)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: [TextPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

fn build_request(prompt: &JsonPrompt) -> GenerateRequest<'_> {
    GenerateRequest {
        system_instruction: Content {
            role: None,
            parts: [TextPart {
                text: prompt.instructions,
            }],
        },
        contents: [Content {
            role: Some("user"),
            parts: [TextPart { text: &prompt.task }],
        }],
        generation_config: GenerationConfig {
            temperature: TEMPERATURE,
            max_output_tokens: MAX_OUTPUT_TOKENS,
            response_mime_type: "application/json",
        },
    }
}

fn read_answer(body: GenerateResponse, model: &str) -> Result<JsonAnswer, ProviderError> {
    let candidate = body
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::NoAnswer("no candidates".to_string()))?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".to_string());
        return Err(ProviderError::NoAnswer(format!("empty candidate, finish reason {reason}")));
    }

    Ok(JsonAnswer {
        text,
        model: body.model_version.unwrap_or_else(|| model.to_string()),
        tokens: body.usage_metadata.map_or(0, |u| u.total_token_count),
    })
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete_json(
        &self,
        prompt: &JsonPrompt,
        settings: &ProviderSettings,
    ) -> Result<JsonAnswer, ProviderError> {
        let response = self
            .client
            .post(format!("{}/models/{}:generateContent", self.base_url, settings.model))
            .header("x-goog-api-key", self.key.expose())
            .timeout(settings.timeout)
            .json(&build_request(prompt))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::TimedOut(settings.timeout)
                } else {
                    ProviderError::Unreachable(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .map(|body| body.error.message)
                .unwrap_or_else(|_| status.canonical_reason().unwrap_or("unknown").to_string());
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::NoAnswer(e.to_string()))?;
        read_answer(body, &settings.model)
    }
}
