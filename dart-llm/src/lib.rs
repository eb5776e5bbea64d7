// Copyright 2022 Xayn AG
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Client for the (opaque, stateless) LLM completion endpoint.
//!
//! Every component that uses an [`LlmClient`] must have a deterministic
//! fallback for when it is absent or fails; nothing in this crate is a hard
//! prerequisite for the pipeline.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use dart_shared::RateLimiter;

const CHAT_COMPLETIONS_ENDPOINT: &str = "chat/completions";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A single message in a chat-completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

/// A chat-completion request. Mirrors the subset of the OpenAI-compatible wire
/// shape the source exercises (`model`, `messages`, `temperature`, `max_tokens`).
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct RawChatResponse {
    choices: Vec<RawChoice>,
}

#[derive(Debug, Deserialize)]
struct RawChoice {
    message: RawMessage,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    content: String,
}

/// A chat-completion response, reduced to the text every caller actually uses.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
}

/// Errors specific to talking to the LLM endpoint. Callers at the component
/// boundary (parser, mapper, filter, synthesizer) convert all of these into
/// `dart_shared::Error::LLMUnavailable` or `LLMMalformed`.
#[derive(Debug, Error, displaydoc::Display)]
pub enum Error {
    /// no LLM client is configured
    NotConfigured,
    /// failed to execute the HTTP request: {0}
    RequestExecution(#[source] reqwest::Error),
    /// server returned a non-successful status code: {0}
    StatusCode(#[source] reqwest::Error),
    /// failed to fetch the response body: {0}
    Fetching(#[source] reqwest::Error),
    /// failed to decode the response at JSON path {1}: {0}
    DecodingAtPath(String, #[source] serde_path_to_error::Error<serde_json::Error>),
    /// the response contained no choices
    NoChoices,
}

impl From<Error> for dart_shared::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::NotConfigured => {
                dart_shared::Error::llm_unavailable("no LLM client is configured")
            }
            Error::RequestExecution(_) | Error::StatusCode(_) | Error::Fetching(_) => {
                dart_shared::Error::llm_unavailable(error.to_string())
            }
            Error::DecodingAtPath(..) | Error::NoChoices => {
                dart_shared::Error::llm_malformed(error.to_string())
            }
        }
    }
}

/// The interface every LLM-assisted component programs against.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, Error>;
}

/// Which vendor the base url speaks to, mirroring the source's
/// `LLM_PROVIDER` branching (`openai` vs `vllm`) in `config_loader.py`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Vllm,
}

/// Default [`LlmClient`] implementation: a bearer-authenticated POST to an
/// OpenAI-compatible `/chat/completions` endpoint, built in the same shape as
/// `dart-gateway`'s upstream client.
pub struct ReqwestLlmClient {
    api_key: Secret<String>,
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestLlmClient {
    pub fn new(provider: Provider, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let api_key = if provider == Provider::Vllm && api_key.is_empty() {
            "EMPTY".to_owned()
        } else {
            api_key
        };
        Self {
            api_key: Secret::new(api_key),
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use = "dropped changed client"]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl LlmClient for ReqwestLlmClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, Error> {
        let url = format!(
            "{}/{CHAT_COMPLETIONS_ENDPOINT}",
            self.base_url.trim_end_matches('/')
        );

        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(Error::RequestExecution)?
            .error_for_status()
            .map_err(Error::StatusCode)?;

        let raw = response.bytes().await.map_err(Error::Fetching)?;
        let deserializer = &mut serde_json::Deserializer::from_slice(&raw);
        let parsed: RawChatResponse = serde_path_to_error::deserialize(deserializer)
            .map_err(|error| Error::DecodingAtPath(error.path().to_string(), error))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(Error::NoChoices)?
            .message
            .content;

        Ok(ChatResponse { content })
    }
}

/// Wraps any [`LlmClient`] with the shared per-service rate limiter
/// (`spec.md` §4.1's `llm` service, `{N=60, W=60, K=10}` by default). Mirrors
/// `dart-gateway`'s own `get_json`/`get_bytes`: the concurrency permit is
/// held for the full duration of the wrapped call, not dropped on
/// acquisition.
pub struct RateLimitedLlmClient<C> {
    inner: C,
    rate_limiter: Arc<RateLimiter>,
}

impl<C: LlmClient> RateLimitedLlmClient<C> {
    pub fn new(inner: C, rate_limiter: Arc<RateLimiter>) -> Self {
        Self { inner, rate_limiter }
    }
}

#[async_trait]
impl<C: LlmClient> LlmClient for RateLimitedLlmClient<C> {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, Error> {
        let _permit = self
            .rate_limiter
            .acquire(None)
            .await
            .expect("acquire without a cancellation token never returns Err");
        self.inner.complete(request).await
    }
}

/// Forwarding impl so an `Arc<dyn LlmClient>` (the shape every `dart-core`
/// component is handed) can itself be passed anywhere a concrete
/// `C: LlmClient` type parameter is expected, e.g. [`LlmQueryParser`] in
/// `dart-core`.
#[async_trait]
impl LlmClient for std::sync::Arc<dyn LlmClient> {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, Error> {
        self.as_ref().complete(request).await
    }
}

/// Always-unavailable test double: every LLM-assisted component's deterministic
/// fallback path can be exercised against this without network I/O.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLlmClient;

#[async_trait]
impl LlmClient for NullLlmClient {
    async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, Error> {
        Err(Error::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{header, method, path},
        Mock,
        MockServer,
        ResponseTemplate,
    };

    #[tokio::test]
    async fn complete_parses_first_choice_content() {
        let mock_server = MockServer::start().await;
        let client = ReqwestLlmClient::new(Provider::OpenAi, "test-key", mock_server.uri());

        let body = serde_json::json!({
            "choices": [
                {"message": {"role": "assistant", "content": "hello from the model"}}
            ]
        });

        Mock::given(method("POST"))
            .and(path(CHAT_COMPLETIONS_ENDPOINT))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(&mock_server)
            .await;

        let request = ChatRequest {
            model: "gpt-3.5-turbo".to_owned(),
            messages: vec![ChatMessage::user("hi")],
            temperature: 0.0,
            max_tokens: 16,
        };

        let response = client.complete(request).await.unwrap();
        assert_eq!(response.content, "hello from the model");
    }

    #[tokio::test]
    async fn null_client_is_always_unavailable() {
        let client = NullLlmClient;
        let request = ChatRequest {
            model: "gpt-3.5-turbo".to_owned(),
            messages: vec![],
            temperature: 0.0,
            max_tokens: 1,
        };
        let error = client.complete(request).await.unwrap_err();
        assert!(matches!(error, Error::NotConfigured));
    }

    #[tokio::test]
    async fn rate_limited_client_still_delegates_to_inner() {
        use dart_shared::RateLimiterConfig;

        let mock_server = MockServer::start().await;
        let inner = ReqwestLlmClient::new(Provider::OpenAi, "test-key", mock_server.uri());
        let rate_limiter = Arc::new(RateLimiter::new(RateLimiterConfig::new(60, 60, 10)));
        let client = RateLimitedLlmClient::new(inner, rate_limiter);

        let body = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "ok"}}]
        });
        Mock::given(method("POST"))
            .and(path(CHAT_COMPLETIONS_ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(&mock_server)
            .await;

        let request = ChatRequest {
            model: "gpt-3.5-turbo".to_owned(),
            messages: vec![ChatMessage::user("hi")],
            temperature: 0.0,
            max_tokens: 16,
        };
        let response = client.complete(request).await.unwrap();
        assert_eq!(response.content, "ok");
    }
}
