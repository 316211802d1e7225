//! Structured LLM interface
//!
//! A thin `generate_json` primitive over an OpenAI-compatible chat API.
//! Groq serves both the track classifier and the hybrid query planner; both
//! constrain the model to JSON output and validate the shape themselves.

use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs, ResponseFormat,
    },
    Client,
};
use async_trait::async_trait;

use crate::errors::{Result, SourcingError};

const GROQ_API_BASE: &str = "https://api.groq.com/openai/v1";
const DEFAULT_GROQ_MODEL: &str = "llama-3.1-8b-instant";

/// A single structured-output request.
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl StructuredRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: DEFAULT_GROQ_MODEL.to_string(),
            system: system.into(),
            prompt: prompt.into(),
            max_tokens: Some(512),
            temperature: Some(0.0),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// Provider returning a validated JSON object for a prompt.
#[async_trait]
pub trait StructuredLlm: Send + Sync {
    fn name(&self) -> &str;

    async fn generate_json(&self, request: &StructuredRequest) -> Result<serde_json::Value>;
}

/// Groq provider. Groq exposes the OpenAI chat API, so the client is the
/// stock OpenAI one pointed at Groq's base URL.
pub struct GroqClient {
    client: Client<OpenAIConfig>,
}

impl GroqClient {
    pub fn new(api_key: &str) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(GROQ_API_BASE);
        Self {
            client: Client::with_config(config),
        }
    }
}

#[async_trait]
impl StructuredLlm for GroqClient {
    fn name(&self) -> &str {
        "groq"
    }

    async fn generate_json(&self, request: &StructuredRequest) -> Result<serde_json::Value> {
        let messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: ChatCompletionRequestSystemMessageContent::Text(request.system.clone()),
                name: None,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(request.prompt.clone()),
                name: None,
            }),
        ];

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&request.model)
            .messages(messages)
            .response_format(ResponseFormat::JsonObject);
        if let Some(temp) = request.temperature {
            builder.temperature(temp);
        }
        if let Some(max) = request.max_tokens {
            builder.max_completion_tokens(max);
        }
        let req = builder
            .build()
            .map_err(|e| SourcingError::Llm(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(req)
            .await
            .map_err(|e| SourcingError::Llm(e.to_string()))?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| SourcingError::Llm("no completion choices returned".to_string()))?;

        serde_json::from_str(&content)
            .map_err(|e| SourcingError::Llm(format!("non-JSON completion: {e}")))
    }
}

/// Run one attempt plus up to `max_retries` retries, each wrapped in a hard
/// timeout. Timeouts are terminal: a model that is slow once will be slow
/// again inside the same request's latency budget.
pub async fn generate_with_policy(
    llm: &dyn StructuredLlm,
    request: &StructuredRequest,
    timeout_ms: u64,
    max_retries: u32,
) -> Result<serde_json::Value> {
    let mut attempt: u32 = 0;
    loop {
        match tokio::time::timeout(Duration::from_millis(timeout_ms), llm.generate_json(request))
            .await
        {
            Err(_) => return Err(SourcingError::LlmTimeout(timeout_ms)),
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => {
                if attempt >= max_retries {
                    return Err(err);
                }
                attempt += 1;
                tracing::debug!(provider = llm.name(), attempt, error = %err, "Retrying LLM call");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Scripted fake provider for classifier and planner tests.
    pub struct FakeLlm {
        pub calls: AtomicU32,
        responses: Mutex<Vec<Result<serde_json::Value>>>,
        pub delay: Option<Duration>,
    }

    impl FakeLlm {
        pub fn returning(values: Vec<Result<serde_json::Value>>) -> Self {
            Self {
                calls: AtomicU32::new(0),
                responses: Mutex::new(values),
                delay: None,
            }
        }

        pub fn slow(value: serde_json::Value, delay: Duration) -> Self {
            Self {
                calls: AtomicU32::new(0),
                responses: Mutex::new(vec![Ok(value)]),
                delay: Some(delay),
            }
        }
    }

    #[async_trait]
    impl StructuredLlm for FakeLlm {
        fn name(&self) -> &str {
            "fake"
        }

        async fn generate_json(&self, _request: &StructuredRequest) -> Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(SourcingError::Llm("fake exhausted".to_string()));
            }
            responses.remove(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeLlm;
    use super::*;

    #[tokio::test]
    async fn test_policy_returns_first_success() {
        let llm = FakeLlm::returning(vec![Ok(serde_json::json!({"ok": true}))]);
        let req = StructuredRequest::new("sys", "prompt");
        let value = generate_with_policy(&llm, &req, 1000, 2).await.unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(llm.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_policy_retries_non_timeout_errors() {
        let llm = FakeLlm::returning(vec![
            Err(SourcingError::Llm("boom".to_string())),
            Ok(serde_json::json!({"ok": 1})),
        ]);
        let req = StructuredRequest::new("sys", "prompt");
        let value = generate_with_policy(&llm, &req, 1000, 1).await.unwrap();
        assert_eq!(value["ok"], 1);
        assert_eq!(llm.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_policy_never_retries_timeouts() {
        let llm = FakeLlm::slow(serde_json::json!({}), Duration::from_millis(200));
        let req = StructuredRequest::new("sys", "prompt");
        let err = generate_with_policy(&llm, &req, 10, 3).await.unwrap_err();
        assert!(matches!(err, SourcingError::LlmTimeout(10)));
        assert_eq!(llm.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_policy_exhausts_retries() {
        let llm = FakeLlm::returning(vec![
            Err(SourcingError::Llm("a".to_string())),
            Err(SourcingError::Llm("b".to_string())),
        ]);
        let req = StructuredRequest::new("sys", "prompt");
        let err = generate_with_policy(&llm, &req, 1000, 1).await.unwrap_err();
        assert!(matches!(err, SourcingError::Llm(_)));
    }
}
