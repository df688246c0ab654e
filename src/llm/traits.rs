//! 补全端口抽象
//!
//! 状态机只依赖 CompletionPort：按名称或 ID 解析模型、对一组消息请求一次补全。
//! 具体后端（OpenAI / Bedrock / Mock）各自实现；超时与重试由后端负责，状态机不重试后端错误。

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::{CompletionModel, CompletionResponse};
use crate::prompt::ChatMessage;

/// 后端错误
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("No model found: {0}")]
    UnknownModel(String),

    /// 模型不支持图片等能力；在发起网络请求之前返回
    #[error("Model {model} does not support {capability}")]
    UnsupportedCapability { model: String, capability: String },

    #[error("Unsupported prompt for {model}: {reason}")]
    UnsupportedPrompt { model: String, reason: String },

    #[error("{0} completions disabled")]
    ProviderDisabled(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("No completion backend enabled")]
    NoBackend,
}

/// 补全端口：模型解析 + 单次请求/响应
#[async_trait]
pub trait CompletionPort: Send + Sync {
    /// 先按展示名（如 "GPT 4 Omni Mini"）匹配，再按 ID（如 "gpt-4o-mini"）匹配
    fn get_model_by_name_or_id(&self, name_or_id: &str) -> Result<CompletionModel, LlmError>;

    /// 对有序消息列表请求一次补全
    async fn get_completion(
        &self,
        model: &CompletionModel,
        prompt: &[ChatMessage],
    ) -> Result<CompletionResponse, LlmError>;
}

/// 发送前的能力检查：含图片的消息要求模型声明支持图片
pub fn ensure_prompt_supported(
    model: &CompletionModel,
    prompt: &[ChatMessage],
) -> Result<(), LlmError> {
    if !model.supports_images && prompt.iter().any(ChatMessage::has_images) {
        return Err(LlmError::UnsupportedCapability {
            model: model.llm.clone(),
            capability: "image prompts".to_string(),
        });
    }
    Ok(())
}
