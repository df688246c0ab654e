//! Mock 补全后端（用于测试，无需 API）
//!
//! 按顺序返回预设回复；预设用完后回显最后一条 user 消息。每次调用收到的完整提示都会被记录，
//! 便于断言前导指令、临时上下文注入等行为。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::llm::{all_models, find_model, CompletionModel, CompletionPort, CompletionResponse, LlmError};
use crate::prompt::{ChatMessage, Role};

enum MockReply {
    Content(String),
    Fail(String),
}

/// Mock 客户端：预设回复队列 + 调用记录
#[derive(Default)]
pub struct MockCompletion {
    replies: Mutex<VecDeque<MockReply>>,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
    models: Vec<CompletionModel>,
}

impl MockCompletion {
    pub fn new() -> Self {
        Self {
            models: all_models(),
            ..Default::default()
        }
    }

    /// 以一组预设回复构造
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mock = Self::new();
        for reply in replies {
            mock.push_reply(reply);
        }
        mock
    }

    pub fn push_reply(&self, content: impl Into<String>) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(MockReply::Content(content.into()));
        }
    }

    /// 预设一次后端失败
    pub fn push_failure(&self, message: impl Into<String>) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(MockReply::Fail(message.into()));
        }
    }

    /// 已收到的提示（按调用顺序）
    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[async_trait]
impl CompletionPort for MockCompletion {
    fn get_model_by_name_or_id(&self, name_or_id: &str) -> Result<CompletionModel, LlmError> {
        find_model(&self.models, name_or_id)
    }

    async fn get_completion(
        &self,
        model: &CompletionModel,
        prompt: &[ChatMessage],
    ) -> Result<CompletionResponse, LlmError> {
        crate::llm::ensure_prompt_supported(model, prompt)?;
        if let Ok(mut p) = self.prompts.lock() {
            p.push(prompt.to_vec());
        }

        let next = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        let content = match next {
            Some(MockReply::Content(c)) => c,
            Some(MockReply::Fail(msg)) => return Err(LlmError::Request(msg)),
            None => {
                let last_user = prompt
                    .iter()
                    .rev()
                    .find(|m| m.role() == Role::User)
                    .map(|m| m.content())
                    .unwrap_or("(no input)");
                format!("Echo from Mock: {last_user}")
            }
        };

        Ok(CompletionResponse {
            input_tokens: prompt.iter().map(|m| m.content().len() as u64 / 4).sum(),
            output_tokens: content.len() as u64 / 4,
            content,
            llm_metadata: model.clone(),
            generated_at: Utc::now(),
            completion_time_ms: 0,
        })
    }
}
