//! 补全处理器：按模型提供方分发到 OpenAI / Bedrock，并统一计时、统计 token
//!
//! 可用模型默认为内置目录中已启用提供方的全部模型；两个提供方都未启用时构造失败。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;

use crate::config::LlmSection;
use crate::llm::{
    all_models, ensure_prompt_supported, find_model, BedrockClient, CompletionModel,
    CompletionPort, CompletionResponse, LlmError, OpenAiClient, Provider,
};
use crate::prompt::ChatMessage;

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// 多后端补全处理器
pub struct CompletionHandler {
    openai: Option<OpenAiClient>,
    bedrock: Option<BedrockClient>,
    available_models: Vec<CompletionModel>,
    max_response_tokens: u32,
    debug_output_prompt_and_response: bool,
    usage: TokenUsage,
}

impl CompletionHandler {
    pub fn new(openai: Option<OpenAiClient>, bedrock: Option<BedrockClient>) -> Result<Self, LlmError> {
        let available_models: Vec<CompletionModel> = all_models()
            .into_iter()
            .filter(|m| match m.provider {
                Provider::OpenAi => openai.is_some(),
                Provider::AwsBedrock => bedrock.is_some(),
            })
            .collect();
        if available_models.is_empty() {
            return Err(LlmError::NoBackend);
        }
        Ok(Self {
            openai,
            bedrock,
            available_models,
            max_response_tokens: 1000,
            debug_output_prompt_and_response: false,
            usage: TokenUsage::new(),
        })
    }

    /// 从 [llm] 配置段构造
    pub fn from_config(cfg: &LlmSection) -> Result<Self, LlmError> {
        let openai = if cfg.enable_openai {
            let key = std::env::var(&cfg.openai.api_key_env).ok();
            Some(OpenAiClient::new(
                cfg.openai.base_url.as_deref(),
                key.as_deref(),
                cfg.request_timeout_secs,
            )?)
        } else {
            None
        };
        let bedrock = if cfg.enable_bedrock {
            let key = std::env::var(&cfg.bedrock.api_key_env).ok();
            Some(BedrockClient::new(
                Some(cfg.bedrock.region.as_str()),
                key.as_deref(),
                cfg.request_timeout_secs,
            )?)
        } else {
            None
        };
        Ok(Self::new(openai, bedrock)?
            .with_max_response_tokens(cfg.max_response_tokens)
            .with_debug_output(cfg.debug_output_prompt_and_response))
    }

    /// 限定可用模型
    pub fn with_available_models(mut self, models: Vec<CompletionModel>) -> Self {
        self.available_models = models;
        self
    }

    pub fn with_max_response_tokens(mut self, max_response_tokens: u32) -> Self {
        self.max_response_tokens = max_response_tokens;
        self
    }

    /// 以 debug 级别输出完整提示与响应
    pub fn with_debug_output(mut self, enabled: bool) -> Self {
        self.debug_output_prompt_and_response = enabled;
        self
    }

    pub fn available_models(&self) -> &[CompletionModel] {
        &self.available_models
    }

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    /// 单条纯文本提示的便捷入口
    pub async fn get_text_completion(
        &self,
        model: &CompletionModel,
        prompt: &str,
    ) -> Result<CompletionResponse, LlmError> {
        self.get_completion(model, &[ChatMessage::user(prompt)]).await
    }
}

#[async_trait]
impl CompletionPort for CompletionHandler {
    fn get_model_by_name_or_id(&self, name_or_id: &str) -> Result<CompletionModel, LlmError> {
        find_model(&self.available_models, name_or_id)
    }

    async fn get_completion(
        &self,
        model: &CompletionModel,
        prompt: &[ChatMessage],
    ) -> Result<CompletionResponse, LlmError> {
        ensure_prompt_supported(model, prompt)?;
        if self.debug_output_prompt_and_response {
            tracing::debug!(prompt = ?prompt, "LLM input");
        }

        let started = Instant::now();
        let parsed = match model.provider {
            Provider::OpenAi => {
                let client = self
                    .openai
                    .as_ref()
                    .ok_or_else(|| LlmError::ProviderDisabled(Provider::OpenAi.as_str().into()))?;
                client.complete(model, prompt, self.max_response_tokens).await?
            }
            Provider::AwsBedrock => {
                let client = self
                    .bedrock
                    .as_ref()
                    .ok_or_else(|| LlmError::ProviderDisabled(Provider::AwsBedrock.as_str().into()))?;
                client.complete(model, prompt, self.max_response_tokens).await?
            }
        };
        let completion_time_ms = started.elapsed().as_millis() as i64;

        if self.debug_output_prompt_and_response {
            tracing::debug!(response = %parsed.content, "LLM response");
        }
        self.usage.add(parsed.input_tokens, parsed.output_tokens);

        Ok(CompletionResponse {
            content: parsed.content,
            input_tokens: parsed.input_tokens,
            output_tokens: parsed.output_tokens,
            llm_metadata: model.clone(),
            generated_at: Utc::now(),
            completion_time_ms,
        })
    }
}
