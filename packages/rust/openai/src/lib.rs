//! OpenAI REST client for embeddings and chat completions.
//!
//! Every failure (transport, HTTP status, quota, malformed body) surfaces as
//! [`RelayError::Upstream`]. Nothing is retried here; retry policy belongs to
//! the caller.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use jobrelay_shared::{ChatMessage, ChatModel, Embedder, OpenAiSettings, RelayError, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("jobrelay/", env!("CARGO_PKG_VERSION"));

/// Client bound to one API key and model configuration.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: Client,
    base: String,
    api_key: String,
    chat_model: String,
    embedding_model: String,
    embedding_dimensions: usize,
    max_tokens: u32,
    temperature: f32,
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

impl OpenAiClient {
    pub fn new(settings: &OpenAiSettings) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| RelayError::Upstream(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base: settings.base_url.as_str().trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            chat_model: settings.chat_model.clone(),
            embedding_model: settings.embedding_model.clone(),
            embedding_dimensions: settings.embedding_dimensions,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        })
    }

    async fn post<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = format!("{}/{path}", self.base);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| RelayError::Upstream(format!("{path}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Upstream(describe_failure(path, status, &body)));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| RelayError::Upstream(format!("{path}: invalid response body: {e}")))
    }
}

/// Human-readable description of a failed API call.
fn describe_failure(path: &str, status: StatusCode, body: &str) -> String {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(String::from)
        })
        .unwrap_or_else(|| body.chars().take(200).collect());

    if status == StatusCode::TOO_MANY_REQUESTS {
        format!("{path}: rate limited or quota exceeded (HTTP 429): {message}")
    } else {
        format!("{path}: HTTP {status}: {message}")
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    #[instrument(skip_all, fields(model = %self.embedding_model, chars = text.len()))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input: text,
        };
        let response: EmbeddingResponse = self.post("embeddings", &request).await?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| RelayError::Upstream("embeddings: empty data".into()))?;

        if embedding.len() != self.embedding_dimensions {
            return Err(RelayError::Upstream(format!(
                "embeddings: expected {} dimensions, got {}",
                self.embedding_dimensions,
                embedding.len()
            )));
        }
        Ok(embedding)
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    #[instrument(skip_all, fields(model = %self.chat_model, messages = messages.len()))]
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let start = Instant::now();
        let request = ChatRequest {
            model: &self.chat_model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let response: ChatResponse = self.post("chat/completions", &request).await?;

        if let Some(usage) = &response.usage {
            debug!(
                tokens_in = usage.prompt_tokens,
                tokens_out = usage.completion_tokens,
                latency_ms = start.elapsed().as_millis() as u64,
                "completion finished"
            );
        }

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| RelayError::Upstream("chat/completions: no content returned".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(server: &MockServer, dims: usize) -> OpenAiSettings {
        OpenAiSettings {
            api_key: "sk-test".into(),
            base_url: Url::parse(&format!("{}/v1", server.uri())).unwrap(),
            chat_model: "gpt-4o".into(),
            embedding_model: "text-embedding-3-small".into(),
            embedding_dimensions: dims,
            max_tokens: 500,
            temperature: 0.0,
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn embed_returns_vector() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "text-embedding-3-small"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"embedding": [0.1, 0.2, 0.3], "index": 0}]
            })))
            .mount(&server)
            .await;

        let client = OpenAiClient::new(&settings(&server, 3)).unwrap();
        let v = client.embed("backend engineer").await.unwrap();
        assert_eq!(v.len(), 3);
    }

    #[tokio::test]
    async fn embed_rejects_wrong_dimension() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"embedding": [0.1, 0.2]}]
            })))
            .mount(&server)
            .await;

        let client = OpenAiClient::new(&settings(&server, 1536)).unwrap();
        let err = client.embed("x").await.unwrap_err();
        assert!(err.to_string().contains("1536"));
    }

    #[tokio::test]
    async fn complete_sends_bounded_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({
                "model": "gpt-4o",
                "max_tokens": 500,
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "hello"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "hi there"}}],
                "usage": {"prompt_tokens": 10, "completion_tokens": 3}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiClient::new(&settings(&server, 3)).unwrap();
        let text = client
            .complete(&[ChatMessage::system("sys"), ChatMessage::user("hello")])
            .await
            .unwrap();
        assert_eq!(text, "hi there");
    }

    #[tokio::test]
    async fn quota_error_is_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"message": "You exceeded your current quota", "type": "insufficient_quota"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiClient::new(&settings(&server, 3)).unwrap();
        let err = client.complete(&[ChatMessage::user("q")]).await.unwrap_err();
        assert!(matches!(err, RelayError::Upstream(_)));
        let msg = err.to_string();
        assert!(msg.contains("quota"));
        assert!(msg.contains("429"));
    }

    #[tokio::test]
    async fn empty_choices_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let client = OpenAiClient::new(&settings(&server, 3)).unwrap();
        let err = client.complete(&[ChatMessage::user("q")]).await.unwrap_err();
        assert!(err.to_string().contains("no content"));
    }

    #[test]
    fn failure_description_uses_error_message() {
        let msg = describe_failure(
            "embeddings",
            StatusCode::UNAUTHORIZED,
            r#"{"error":{"message":"Incorrect API key"}}"#,
        );
        assert_eq!(msg, "embeddings: HTTP 401 Unauthorized: Incorrect API key");
    }
}
