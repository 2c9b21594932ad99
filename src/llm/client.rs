use super::fallback::{with_key_fallback, KeySource};
use super::models::ChatMessage;
use super::normalize::strip_code_fences;
use crate::credentials::CredentialProvider;
use crate::gateway::{GatewayError, GatewayFuture};
use crate::util::{sanitize_error_body, truncate_str};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// OpenRouter chat completions endpoint
pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

const SITE_URL: &str = "https://github.com/forge-agent/forge";
const SITE_NAME: &str = "Forge";

/// Lower temperature for code
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Chat-completion gateway consumed by the coordinator.
///
/// Implementations return normalized text (outer markdown fences removed) and
/// classify failures by [`GatewayErrorKind`](crate::gateway::GatewayErrorKind).
pub trait ChatGateway: Send + Sync {
    fn complete<'a>(
        &'a self,
        model_id: &'a str,
        messages: &'a [ChatMessage],
    ) -> GatewayFuture<'a, String>;
}

/// A single authenticated request against the completion API.
pub trait CompletionTransport: Send + Sync {
    fn send<'a>(&'a self, api_key: &'a str, request: &'a ChatRequest) -> GatewayFuture<'a, String>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    /// Content can be null in some API responses (e.g., when refusal or error occurs)
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

/// OpenRouter error response (can come with 200 status for upstream errors)
#[derive(Deserialize)]
struct OpenRouterError {
    error: OpenRouterApiError,
}

#[derive(Deserialize)]
struct OpenRouterApiError {
    message: String,
    #[serde(default)]
    code: Option<i32>,
}

fn is_unknown_model_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("not a valid model")
        || lower.contains("model not found")
        || lower.contains("no endpoints found")
}

/// Classify a non-success HTTP response.
pub(crate) fn classify_status(status: u16, body: &str) -> GatewayError {
    let api_message = serde_json::from_str::<OpenRouterError>(body)
        .map(|e| e.error.message)
        .unwrap_or_default();

    match status {
        401 | 403 => GatewayError::auth_failed(format!(
            "API key rejected ({}). Run 'forge --setup' to update it.",
            status
        )),
        404 => GatewayError::not_found(format!("Model not found: {}", truncate_str(&api_message, 200))),
        400 if is_unknown_model_message(&api_message) || is_unknown_model_message(body) => {
            GatewayError::not_found(truncate_str(&api_message, 200).to_string())
        }
        429 => GatewayError::generic("Rate limited by OpenRouter. Try again in a few minutes."),
        500..=599 => GatewayError::generic(format!(
            "OpenRouter server error ({}). The service may be temporarily unavailable.",
            status
        )),
        _ => GatewayError::generic(format!(
            "API error {}: {}",
            status,
            sanitize_error_body(body)
        )),
    }
}

/// Extract the assistant content from a successful response body.
pub(crate) fn extract_content(text: &str) -> Result<String, GatewayError> {
    if let Ok(err_resp) = serde_json::from_str::<OpenRouterError>(text) {
        let message = truncate_str(&err_resp.error.message, 200).to_string();
        return Err(match err_resp.error.code {
            Some(401) => GatewayError::auth_failed(message),
            Some(404) => GatewayError::not_found(message),
            _ if is_unknown_model_message(&message) => GatewayError::not_found(message),
            _ => GatewayError::generic(format!("OpenRouter error: {}", message)),
        });
    }

    let parsed: ChatResponse = serde_json::from_str(text).map_err(|e| {
        GatewayError::generic(format!(
            "Failed to parse OpenRouter response: {} ({})",
            e,
            sanitize_error_body(text)
        ))
    })?;

    let Some(choice) = parsed.choices.into_iter().next() else {
        return Err(GatewayError::generic("API returned no choices"));
    };

    if let Some(refusal) = choice.message.refusal {
        return Err(GatewayError::generic(format!(
            "Request was refused: {}",
            truncate_str(&refusal, 200)
        )));
    }

    let content = choice.message.content.unwrap_or_default();
    if content.trim().is_empty() {
        return Err(GatewayError::generic(
            "API returned empty response. The model may have been rate limited or failed to generate content. Please try again.",
        ));
    }
    Ok(content)
}

/// Create a configured HTTP client
pub fn create_http_client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))
}

/// HTTP transport for OpenRouter
pub struct OpenRouterTransport {
    client: reqwest::Client,
    url: String,
}

impl OpenRouterTransport {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl CompletionTransport for OpenRouterTransport {
    fn send<'a>(&'a self, api_key: &'a str, request: &'a ChatRequest) -> GatewayFuture<'a, String> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.url)
                .header("Content-Type", "application/json")
                .header("HTTP-Referer", SITE_URL)
                .header("X-Title", SITE_NAME)
                .header("Authorization", format!("Bearer {}", api_key))
                .json(request)
                .send()
                .await?;

            let status = response.status();
            let text = response.text().await?;
            if !status.is_success() {
                return Err(classify_status(status.as_u16(), &text));
            }
            extract_content(&text)
        })
    }
}

/// Chat gateway with key fallback and output normalization.
pub struct OpenRouterGateway<T: CompletionTransport = OpenRouterTransport> {
    transport: T,
    credentials: Arc<dyn CredentialProvider>,
    temperature: f32,
}

impl<T: CompletionTransport> OpenRouterGateway<T> {
    pub fn new(transport: T, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            transport,
            credentials,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

impl<T: CompletionTransport> ChatGateway for OpenRouterGateway<T> {
    fn complete<'a>(
        &'a self,
        model_id: &'a str,
        messages: &'a [ChatMessage],
    ) -> GatewayFuture<'a, String> {
        Box::pin(async move {
            let request = ChatRequest {
                model: model_id.to_string(),
                messages: messages.to_vec(),
                temperature: self.temperature,
                stream: false,
            };
            tracing::debug!(model = model_id, messages = messages.len(), "chat completion");

            let transport = &self.transport;
            let request = &request;
            let text = with_key_fallback(
                self.credentials.model_api_key(),
                self.credentials.default_model_api_key(),
                move |key, source| async move {
                    if source == KeySource::Default {
                        tracing::debug!(model = model_id, "using default API key");
                    }
                    transport.send(&key, request).await
                },
            )
            .await
            .inspect_err(|err| tracing::warn!(model = model_id, "completion failed: {}", err))?;

            Ok(strip_code_fences(&text))
        })
    }
}
