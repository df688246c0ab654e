//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SULLY__*` 覆盖（双下划线表示嵌套，如 `SULLY__AGENT__TOOL_USE_MODE=manual`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::ToolUseMode;
use crate::llm::{BEDROCK_API_KEY_ENV, DEFAULT_BEDROCK_REGION};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub agent: AgentSection,
    pub llm: LlmSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    /// tracing 默认过滤指令，RUST_LOG 优先
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// [agent] 段：Agent 描述、默认模型、工具模式与初始化工具
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_description")]
    pub description: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default)]
    pub tool_use_mode: ToolUseMode,
    /// 未设置时使用第一个注册的工具配置
    pub initial_tool_profile: Option<String>,
    #[serde(default)]
    pub user_preferences: Vec<String>,
    /// 启动时按顺序手动调用的工具名
    #[serde(default)]
    pub init_tools: Vec<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// 注入上下文时使用的时区偏移（分钟）；未设置时用系统本地时间
    pub utc_offset_minutes: Option<i32>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            description: default_description(),
            default_model: default_model(),
            tool_use_mode: ToolUseMode::default(),
            initial_tool_profile: None,
            user_preferences: Vec::new(),
            init_tools: Vec::new(),
            max_attempts: default_max_attempts(),
            utc_offset_minutes: None,
        }
    }
}

fn default_description() -> String {
    "You are a helpful assistant.".to_string()
}

fn default_model() -> String {
    "GPT 4 Omni Mini".to_string()
}

fn default_max_attempts() -> usize {
    3
}

/// [llm] 段：后端开关、输出上限与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_true")]
    pub enable_openai: bool,
    #[serde(default = "default_true")]
    pub enable_bedrock: bool,
    #[serde(default = "default_max_response_tokens")]
    pub max_response_tokens: u32,
    #[serde(default)]
    pub debug_output_prompt_and_response: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub openai: LlmOpenAiSection,
    #[serde(default)]
    pub bedrock: LlmBedrockSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            enable_openai: true,
            enable_bedrock: true,
            max_response_tokens: default_max_response_tokens(),
            debug_output_prompt_and_response: false,
            request_timeout_secs: default_request_timeout(),
            openai: LlmOpenAiSection::default(),
            bedrock: LlmBedrockSection::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_response_tokens() -> u32 {
    1000
}

fn default_request_timeout() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmOpenAiSection {
    pub base_url: Option<String>,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
}

impl Default for LlmOpenAiSection {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key_env: default_openai_key_env(),
        }
    }
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmBedrockSection {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_bedrock_key_env")]
    pub api_key_env: String,
}

impl Default for LlmBedrockSection {
    fn default() -> Self {
        Self {
            region: default_region(),
            api_key_env: default_bedrock_key_env(),
        }
    }
}

fn default_region() -> String {
    DEFAULT_BEDROCK_REGION.to_string()
}

fn default_bedrock_key_env() -> String {
    BEDROCK_API_KEY_ENV.to_string()
}

/// 从 config 目录加载配置，环境变量 SULLY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SULLY__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path.filter(|p| p.exists()) {
        builder = builder.add_source(config::File::from(path).required(false));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SULLY")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("agent.user_preferences")
            .with_list_parse_key("agent.init_tools")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
