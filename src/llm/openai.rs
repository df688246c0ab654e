//! OpenAI 兼容 API 客户端
//!
//! 纯文本提示通过 async_openai 调用；含图片的提示按 OpenAiChat 模型族组装 JSON，用 reqwest 直接 POST。

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;

use crate::llm::{CompletionModel, LlmError, ParsedCompletion, RawCompletion};
use crate::prompt::{ChatMessage, Role};

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    http: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, api_key: Option<&str>, timeout_secs: u64) -> Result<Self, LlmError> {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());
        let api_base = base_url.unwrap_or(OPENAI_API_BASE).trim_end_matches('/').to_string();

        let config = OpenAIConfig::new()
            .with_api_base(api_base.clone())
            .with_api_key(api_key.clone());
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client: Client::with_config(config),
            http,
            api_base,
            api_key,
        })
    }

    pub async fn complete(
        &self,
        model: &CompletionModel,
        prompt: &[ChatMessage],
        max_response_tokens: u32,
    ) -> Result<ParsedCompletion, LlmError> {
        if prompt.iter().any(ChatMessage::has_images) {
            self.complete_with_images(model, prompt, max_response_tokens).await
        } else {
            self.complete_text(model, prompt, max_response_tokens).await
        }
    }

    async fn complete_text(
        &self,
        model: &CompletionModel,
        prompt: &[ChatMessage],
        max_response_tokens: u32,
    ) -> Result<ParsedCompletion, LlmError> {
        tracing::info!(model = %model.llm_id, "Generating OpenAI ChatCompletion");
        let messages = prompt
            .iter()
            .map(to_openai_message)
            .collect::<Result<Vec<_>, _>>()?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(&model.llm_id)
            .messages(messages)
            .max_completion_tokens(max_response_tokens)
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let (input_tokens, output_tokens) = response
            .usage
            .as_ref()
            .map(|u| (u.prompt_tokens as u64, u.completion_tokens as u64))
            .unwrap_or_default();
        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(ParsedCompletion {
            content,
            input_tokens,
            output_tokens,
        })
    }

    async fn complete_with_images(
        &self,
        model: &CompletionModel,
        prompt: &[ChatMessage],
        max_response_tokens: u32,
    ) -> Result<ParsedCompletion, LlmError> {
        tracing::info!(model = %model.llm_id, "Generating OpenAI ChatCompletion with images");
        let payload = model.family.prepare_request(model, prompt, max_response_tokens)?;
        let response = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }
        let body: serde_json::Value = response.json().await?;
        model.family.parse_response(&RawCompletion {
            body,
            ..Default::default()
        })
    }
}

fn to_openai_message(msg: &ChatMessage) -> Result<ChatCompletionRequestMessage, LlmError> {
    let content = msg.content().to_string();
    let built = match msg.role() {
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(content)
            .build()
            .map(ChatCompletionRequestMessage::System),
        Role::User => ChatCompletionRequestUserMessageArgs::default()
            .content(content)
            .build()
            .map(ChatCompletionRequestMessage::User),
        Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(content)
            .build()
            .map(ChatCompletionRequestMessage::Assistant),
    };
    built.map_err(|e| LlmError::Request(e.to_string()))
}
