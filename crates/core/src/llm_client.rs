use anyhow::{Context, Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
        CreateChatCompletionResponse, ResponseFormat,
    },
};
use async_trait::async_trait;
use serde_json::Value;

/// A single completion request: a system prompt, a user prompt and sampling settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    /// Overrides the client's default model for this request.
    pub model: Option<String>,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>, temperature: f32) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature,
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// A generic client for interacting with an LLM.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Makes a single call and returns the trimmed text answer.
    async fn complete_text(&self, request: CompletionRequest) -> Result<String>;

    /// Makes a single call in JSON mode and returns the parsed object.
    async fn complete_json(&self, request: CompletionRequest) -> Result<Value>;
}

/// An implementation of `LLMClient` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The default model identifier to use for chat completions (e.g., "gpt-4o").
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }

    fn messages(request: &CompletionRequest) -> Result<Vec<ChatCompletionRequestMessage>> {
        Ok(vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(request.system.clone())
                .build()?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.user.clone())
                .build()?
                .into(),
        ])
    }

    async fn create(
        &self,
        request: &CompletionRequest,
        response_format: Option<ResponseFormat>,
    ) -> Result<String> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(model)
            .messages(Self::messages(request)?)
            .temperature(request.temperature);
        if let Some(format) = response_format {
            args.response_format(format);
        }

        let response: CreateChatCompletionResponse =
            self.client.chat().create(args.build()?).await?;
        let content = response
            .choices
            .first()
            .context("No response choice from LLM")?
            .message
            .content
            .as_ref()
            .context("No content in LLM response")?;
        Ok(content.trim().to_string())
    }
}

#[async_trait]
impl LLMClient for OpenAICompatibleClient {
    async fn complete_text(&self, request: CompletionRequest) -> Result<String> {
        let text = self.create(&request, None).await?;
        if text.is_empty() {
            return Err(anyhow!("LLM returned an empty answer"));
        }
        Ok(text)
    }

    async fn complete_json(&self, request: CompletionRequest) -> Result<Value> {
        let text = self.create(&request, Some(ResponseFormat::JsonObject)).await?;
        let value: Value =
            serde_json::from_str(&text).context("LLM answer in JSON mode was not valid JSON")?;
        if !value.is_object() {
            return Err(anyhow!("LLM answer in JSON mode was not an object"));
        }
        Ok(value)
    }
}
