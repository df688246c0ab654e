//! AWS Bedrock Runtime 客户端
//!
//! 直接调用 `POST https://bedrock-runtime.{region}.amazonaws.com/model/{model_id}/invoke`，
//! 使用 Bedrock API Key（Bearer Token）鉴权；请求体与响应体由模型族决定，
//! token 计数从 x-amzn-bedrock-*-token-count 响应头读取。

use std::time::Duration;

use reqwest::header::HeaderMap;

use crate::llm::{CompletionModel, LlmError, ParsedCompletion, RawCompletion};
use crate::prompt::ChatMessage;

pub const DEFAULT_BEDROCK_REGION: &str = "us-east-1";
pub const BEDROCK_API_KEY_ENV: &str = "AWS_BEARER_TOKEN_BEDROCK";

const INPUT_TOKEN_HEADER: &str = "x-amzn-bedrock-input-token-count";
const OUTPUT_TOKEN_HEADER: &str = "x-amzn-bedrock-output-token-count";

/// Bedrock Runtime 客户端：持有 reqwest 客户端、区域与 API Key
pub struct BedrockClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl BedrockClient {
    pub fn new(region: Option<&str>, api_key: Option<&str>, timeout_secs: u64) -> Result<Self, LlmError> {
        let region = region.unwrap_or(DEFAULT_BEDROCK_REGION);
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var(BEDROCK_API_KEY_ENV).ok())
            .unwrap_or_default();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("https://bedrock-runtime.{region}.amazonaws.com"),
            api_key,
        })
    }

    /// 自定义端点（如 VPC Endpoint 或本地代理）
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn invoke_url(&self, model: &CompletionModel) -> String {
        format!("{}/model/{}/invoke", self.endpoint, model.llm_id)
    }

    pub async fn complete(
        &self,
        model: &CompletionModel,
        prompt: &[ChatMessage],
        max_response_tokens: u32,
    ) -> Result<ParsedCompletion, LlmError> {
        let body = model.family.prepare_request(model, prompt, max_response_tokens)?;
        tracing::info!(model = %model.llm_id, "Generating Bedrock Completion");

        let response = self
            .http
            .post(self.invoke_url(model))
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }
        let body: serde_json::Value = response.json().await?;
        tracing::info!("Generation complete");

        model.family.parse_response(&RawCompletion {
            body,
            input_token_header: header_u64(&headers, INPUT_TOKEN_HEADER),
            output_token_header: header_u64(&headers, OUTPUT_TOKEN_HEADER),
        })
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
