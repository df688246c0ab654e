//! LLM 层：模型目录、补全端口与多后端实现（OpenAI / AWS Bedrock / Mock）

pub mod bedrock;
pub mod handler;
pub mod mock;
pub mod models;
pub mod openai;
pub mod traits;

pub use bedrock::{BedrockClient, BEDROCK_API_KEY_ENV, DEFAULT_BEDROCK_REGION};
pub use handler::{CompletionHandler, TokenUsage};
pub use mock::MockCompletion;
pub use models::{
    all_models, find_model, CompletionModel, CompletionResponse, ModelFamily, ParsedCompletion,
    Provider, RawCompletion,
};
pub use openai::{OpenAiClient, OPENAI_API_BASE};
pub use traits::{ensure_prompt_supported, CompletionPort, LlmError};
