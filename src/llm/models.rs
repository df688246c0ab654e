//! 模型目录与各模型族的请求/响应格式
//!
//! CompletionModel 描述一个可用模型（提供方、价格、是否支持图片）；ModelFamily 是封闭的模型族集合，
//! 统一暴露 prepare_request / parse_response，后端只按模型族组装请求体、解析响应体。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::llm::LlmError;
use crate::prompt::{ChatMessage, Role};

/// 模型提供方
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "OpenAI")]
    OpenAi,
    #[serde(rename = "AWS Bedrock")]
    AwsBedrock,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OpenAI",
            Provider::AwsBedrock => "AWS Bedrock",
        }
    }
}

/// 模型族：决定请求体与响应体的形状
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    OpenAiChat,
    MetaLlama,
    AnthropicClaude,
    MistralInstruct,
}

/// 后端返回的原始响应：JSON 体 + Bedrock 响应头中的 token 计数（若有）
#[derive(Clone, Debug, Default)]
pub struct RawCompletion {
    pub body: Value,
    pub input_token_header: Option<u64>,
    pub output_token_header: Option<u64>,
}

/// 解析后的补全内容与 token 统计
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedCompletion {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl ModelFamily {
    pub fn provider(&self) -> Provider {
        match self {
            ModelFamily::OpenAiChat => Provider::OpenAi,
            _ => Provider::AwsBedrock,
        }
    }

    /// 组装请求体
    pub fn prepare_request(
        &self,
        model: &CompletionModel,
        prompt: &[ChatMessage],
        max_response_tokens: u32,
    ) -> Result<Value, LlmError> {
        match self {
            ModelFamily::OpenAiChat => {
                let messages: Vec<Value> = prompt.iter().map(openai_message).collect();
                Ok(json!({
                    "model": model.llm_id,
                    "messages": messages,
                    "max_tokens": max_response_tokens,
                }))
            }
            ModelFamily::AnthropicClaude => {
                let mut messages = Vec::with_capacity(prompt.len());
                for msg in prompt {
                    if msg.has_images() && !model.supports_images {
                        return Err(LlmError::UnsupportedCapability {
                            model: model.llm.clone(),
                            capability: "image prompts".to_string(),
                        });
                    }
                    messages.push(claude_message(msg));
                }
                Ok(json!({
                    "messages": messages,
                    "anthropic_version": "bedrock-2023-05-31",
                    "max_tokens": max_response_tokens,
                }))
            }
            ModelFamily::MetaLlama => {
                let text = plain_prompt(model, prompt)?;
                Ok(json!({
                    "prompt": text,
                    "max_gen_len": max_response_tokens,
                }))
            }
            ModelFamily::MistralInstruct => {
                let text = plain_prompt(model, prompt)?;
                Ok(json!({
                    "prompt": format!("<s>[INST]{text}[/INST]"),
                    "max_tokens": max_response_tokens,
                }))
            }
        }
    }

    /// 解析响应体
    pub fn parse_response(&self, raw: &RawCompletion) -> Result<ParsedCompletion, LlmError> {
        let body = &raw.body;
        match self {
            ModelFamily::OpenAiChat => Ok(ParsedCompletion {
                content: str_at(body, "/choices/0/message/content")?.to_string(),
                input_tokens: u64_at(body, "/usage/prompt_tokens")?,
                output_tokens: u64_at(body, "/usage/completion_tokens")?,
            }),
            ModelFamily::MetaLlama => Ok(ParsedCompletion {
                content: str_at(body, "/generation")?.to_string(),
                input_tokens: u64_at(body, "/prompt_token_count")?,
                output_tokens: u64_at(body, "/generation_token_count")?,
            }),
            ModelFamily::AnthropicClaude => Ok(ParsedCompletion {
                content: str_at(body, "/content/0/text")?.trim().to_string(),
                input_tokens: header_count(raw.input_token_header, "input")?,
                output_tokens: header_count(raw.output_token_header, "output")?,
            }),
            ModelFamily::MistralInstruct => Ok(ParsedCompletion {
                content: str_at(body, "/outputs/0/text")?.trim().to_string(),
                input_tokens: header_count(raw.input_token_header, "input")?,
                output_tokens: header_count(raw.output_token_header, "output")?,
            }),
        }
    }
}

fn openai_message(msg: &ChatMessage) -> Value {
    match msg {
        ChatMessage::Text(m) => json!({"role": m.role.as_str(), "content": m.content}),
        ChatMessage::Image(m) => {
            let mut content = vec![json!({"type": "text", "text": m.content()})];
            for (data, fmt) in m.iter_images() {
                content.push(json!({
                    "type": "image_url",
                    "image_url": {
                        "url": format!("data:image/{};base64,{}", fmt.as_str(), data),
                        "detail": "high",
                    },
                }));
            }
            json!({"role": m.role().as_str(), "content": content})
        }
    }
}

fn claude_message(msg: &ChatMessage) -> Value {
    match msg {
        ChatMessage::Text(m) => json!({"role": m.role.as_str(), "content": m.content}),
        ChatMessage::Image(m) => {
            let mut content = vec![json!({"type": "text", "text": m.content()})];
            for (data, fmt) in m.iter_images() {
                content.push(json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": fmt.media_type(),
                        "data": data,
                    },
                }));
            }
            json!({"role": m.role().as_str(), "content": content})
        }
    }
}

/// Llama / Mistral 只接受单条纯文本 user 提示
fn plain_prompt<'a>(model: &CompletionModel, prompt: &'a [ChatMessage]) -> Result<&'a str, LlmError> {
    match prompt {
        [ChatMessage::Text(m)] if m.role == Role::User => Ok(&m.content),
        _ => Err(LlmError::UnsupportedPrompt {
            model: model.llm.clone(),
            reason: "only a single plain-text user prompt is supported".to_string(),
        }),
    }
}

fn str_at<'a>(body: &'a Value, pointer: &str) -> Result<&'a str, LlmError> {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .ok_or_else(|| LlmError::Parse(format!("missing string at {pointer}")))
}

fn u64_at(body: &Value, pointer: &str) -> Result<u64, LlmError> {
    body.pointer(pointer)
        .and_then(Value::as_u64)
        .ok_or_else(|| LlmError::Parse(format!("missing integer at {pointer}")))
}

fn header_count(value: Option<u64>, which: &str) -> Result<u64, LlmError> {
    value.ok_or_else(|| {
        LlmError::Parse(format!("missing x-amzn-bedrock-{which}-token-count header"))
    })
}

/// 模型元数据（含价格，单位：美元 / 1k tokens）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionModel {
    pub provider: Provider,
    pub family: ModelFamily,
    pub make: String,
    pub llm: String,
    pub llm_id: String,
    pub input_price_per_1k: f64,
    pub output_price_per_1k: f64,
    pub supports_images: bool,
}

impl CompletionModel {
    fn entry(
        family: ModelFamily,
        make: &str,
        llm: &str,
        llm_id: &str,
        prices: (f64, f64),
        supports_images: bool,
    ) -> Self {
        Self {
            provider: family.provider(),
            family,
            make: make.to_string(),
            llm: llm.to_string(),
            llm_id: llm_id.to_string(),
            input_price_per_1k: prices.0,
            output_price_per_1k: prices.1,
            supports_images,
        }
    }
}

/// 一次补全的结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub llm_metadata: CompletionModel,
    pub generated_at: DateTime<Utc>,
    pub completion_time_ms: i64,
}

impl CompletionResponse {
    /// 本次调用成本（美元，保留 4 位小数）
    pub fn completion_cost(&self) -> f64 {
        let input_cost = self.input_tokens as f64 / 1000.0 * self.llm_metadata.input_price_per_1k;
        let output_cost = self.output_tokens as f64 / 1000.0 * self.llm_metadata.output_price_per_1k;
        ((input_cost + output_cost) * 10_000.0).round() / 10_000.0
    }
}

/// 内置模型目录
pub fn all_models() -> Vec<CompletionModel> {
    use ModelFamily::*;
    vec![
        CompletionModel::entry(OpenAiChat, "OpenAI", "GPT 3.5 Turbo", "gpt-3.5-turbo", (0.0005, 0.0015), false),
        CompletionModel::entry(OpenAiChat, "OpenAI", "GPT 4 Omni", "gpt-4o", (0.005, 0.015), true),
        CompletionModel::entry(OpenAiChat, "OpenAI", "GPT 4 Omni Mini", "gpt-4o-mini", (0.00015, 0.0006), true),
        CompletionModel::entry(OpenAiChat, "OpenAI", "GPT 4 Turbo", "gpt-4-turbo", (0.01, 0.03), true),
        CompletionModel::entry(MetaLlama, "Meta", "Llama 2 Chat 13B", "meta.llama2-13b-chat-v1", (0.00075, 0.001), false),
        CompletionModel::entry(MetaLlama, "Meta", "Llama 2 Chat 70B", "meta.llama2-70b-chat-v1", (0.00195, 0.00256), false),
        CompletionModel::entry(MetaLlama, "Meta", "Llama 3 Instruct 8B", "meta.llama3-8b-instruct-v1:0", (0.0004, 0.0006), false),
        CompletionModel::entry(MetaLlama, "Meta", "Llama 3 Instruct 70B", "meta.llama3-70b-instruct-v1:0", (0.00265, 0.0035), false),
        CompletionModel::entry(MistralInstruct, "Mistral AI", "Mistral 7B Instruct", "mistral.mistral-7b-instruct-v0:2", (0.00015, 0.0002), false),
        CompletionModel::entry(MistralInstruct, "Mistral AI", "Mixtral 8x7B Instruct", "mistral.mixtral-8x7b-instruct-v0:1", (0.00045, 0.0007), false),
        CompletionModel::entry(AnthropicClaude, "Anthropic", "Claude 3 Haiku", "anthropic.claude-3-haiku-20240307-v1:0", (0.00025, 0.00125), true),
        CompletionModel::entry(AnthropicClaude, "Anthropic", "Claude 3 Sonnet", "anthropic.claude-3-sonnet-20240229-v1:0", (0.003, 0.015), true),
        CompletionModel::entry(AnthropicClaude, "Anthropic", "Claude 3 Opus", "anthropic.claude-3-opus-20240229-v1:0", (0.015, 0.075), true),
    ]
}

/// 在模型列表中按展示名、再按 ID 查找
pub fn find_model(models: &[CompletionModel], name_or_id: &str) -> Result<CompletionModel, LlmError> {
    models
        .iter()
        .find(|m| m.llm == name_or_id)
        .or_else(|| models.iter().find(|m| m.llm_id == name_or_id))
        .cloned()
        .ok_or_else(|| LlmError::UnknownModel(name_or_id.to_string()))
}
