//! 工具注册表
//!
//! AgentTool 由名称、参数 schema、执行函数与 safe 标记组成；ToolProfile 是按名组织的不可变工具集合快照，
//! Agent 构造时选定一个 profile，此后按名解析工具。切换 profile 需要重建 Agent。

use std::fmt::{self, Display};
use std::sync::Arc;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tools::schema::{params_schema, parameter_properties, schema_description};

/// 工具层错误
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid parameters for tool {tool}: {message}")]
    InvalidParams { tool: String, message: String },

    #[error("{0}")]
    Execution(String),
}

// 无参数工具使用的参数类型；不加文档注释，避免其出现在导出的工具描述中
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct NoParams {}

type Mechanism = Arc<dyn Fn(Value) -> Result<Value, ToolError> + Send + Sync>;
type Validator = Arc<dyn Fn(&Value) -> Result<(), ToolError> + Send + Sync>;

/// 工具：名称（profile 内唯一）、描述、参数 schema、执行函数、是否免审批
#[derive(Clone)]
pub struct AgentTool {
    name: String,
    description: Option<String>,
    params_schema: Value,
    mechanism: Mechanism,
    validator: Validator,
    safe_tool: bool,
}

impl AgentTool {
    /// 以强类型参数与返回值构造工具：参数经 serde 校验后传入 `mechanism`，返回值序列化为 JSON
    pub fn new<P, R, E, F>(name: impl Into<String>, mechanism: F) -> Self
    where
        P: DeserializeOwned + JsonSchema + 'static,
        R: Serialize + 'static,
        E: Display + 'static,
        F: Fn(P) -> Result<R, E> + Send + Sync + 'static,
    {
        let name = name.into();
        let tool_name = name.clone();
        let mechanism: Mechanism = Arc::new(move |raw: Value| {
            let params = decode_params::<P>(&tool_name, raw)?;
            let result = mechanism(params).map_err(|e| ToolError::Execution(e.to_string()))?;
            serde_json::to_value(result).map_err(|e| ToolError::Execution(e.to_string()))
        });
        let validator_name = name.clone();
        let validator: Validator = Arc::new(move |raw: &Value| {
            decode_params::<P>(&validator_name, raw.clone()).map(|_| ())
        });

        Self {
            name,
            description: None,
            params_schema: params_schema::<P>(),
            mechanism,
            validator,
            safe_tool: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// 标记为 safe：automatic_safe_only 模式下无需审批
    pub fn safe(self) -> Self {
        self.with_safe_tool(true)
    }

    pub fn with_safe_tool(mut self, safe_tool: bool) -> Self {
        self.safe_tool = safe_tool;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn params_schema(&self) -> &Value {
        &self.params_schema
    }

    pub fn is_safe(&self) -> bool {
        self.safe_tool
    }

    /// 仅校验参数，不执行
    pub fn validate_params(&self, params: &Map<String, Value>) -> Result<(), ToolError> {
        (self.validator)(&Value::Object(params.clone()))
    }

    /// 校验参数并执行；字符串结果原样返回，其余结果序列化为紧凑 JSON
    pub fn invoke(&self, params: &Map<String, Value>) -> Result<String, ToolError> {
        let result = (self.mechanism)(Value::Object(params.clone()))?;
        Ok(render_result(result))
    }
}

impl fmt::Debug for AgentTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("safe_tool", &self.safe_tool)
            .finish_non_exhaustive()
    }
}

fn decode_params<P: DeserializeOwned>(tool: &str, raw: Value) -> Result<P, ToolError> {
    serde_json::from_value(raw).map_err(|e| ToolError::InvalidParams {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}

fn render_result(result: Value) -> String {
    match result {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// 导出给 LLM 的工具描述：{name, parameters, description?}
///
/// parameters 为参数 schema 的 properties（去掉各属性的 title）；description 优先取参数类型的文档注释，
/// 其次取工具自身描述，两者都为空时省略。
pub fn tool_description(tool: &AgentTool) -> Value {
    let mut out = Map::new();
    out.insert("name".into(), Value::String(tool.name.clone()));
    out.insert(
        "parameters".into(),
        Value::Object(parameter_properties(&tool.params_schema)),
    );
    let description = schema_description(&tool.params_schema)
        .or_else(|| tool.description.clone())
        .filter(|d| !d.is_empty());
    if let Some(d) = description {
        out.insert("description".into(), Value::String(d));
    }
    Value::Object(out)
}

/// 一次工具调用：标签 + 已解析的工具 + 原始参数
#[derive(Debug, Clone)]
pub struct ToolAndParams {
    pub label: String,
    pub tool: Arc<AgentTool>,
    pub params: Map<String, Value>,
}

impl ToolAndParams {
    pub fn new(label: impl Into<String>, tool: Arc<AgentTool>, params: Map<String, Value>) -> Self {
        Self {
            label: label.into(),
            tool,
            params,
        }
    }

    pub fn tool_name(&self) -> &str {
        self.tool.name()
    }

    pub fn validate_params(&self) -> Result<(), ToolError> {
        self.tool.validate_params(&self.params)
    }

    pub fn invoke(&self) -> Result<String, ToolError> {
        self.tool.invoke(&self.params)
    }
}

/// 工具配置：具名、有序的工具集合；同名工具后注册者替换先注册者
#[derive(Debug, Clone, Default)]
pub struct ToolProfile {
    name: String,
    tools: Vec<Arc<AgentTool>>,
}

impl ToolProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: Vec::new(),
        }
    }

    pub fn with_tool(mut self, tool: AgentTool) -> Self {
        self.register(tool);
        self
    }

    pub fn register(&mut self, tool: AgentTool) {
        let tool = Arc::new(tool);
        match self.tools.iter_mut().find(|t| t.name() == tool.name()) {
            Some(existing) => *existing = tool,
            None => self.tools.push(tool),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tools(&self) -> &[Arc<AgentTool>] {
        &self.tools
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 按名精确查找
    pub fn get(&self, name: &str) -> Result<Arc<AgentTool>, ToolError> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn descriptions(&self) -> Vec<Value> {
        self.tools.iter().map(|t| tool_description(t)).collect()
    }
}

/// 多个工具配置，按注册顺序保存；第一个为默认
#[derive(Debug, Clone, Default)]
pub struct ToolProfiles {
    profiles: Vec<ToolProfile>,
}

impl ToolProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, profile: ToolProfile) -> Self {
        match self.profiles.iter_mut().find(|p| p.name() == profile.name()) {
            Some(existing) => *existing = profile,
            None => self.profiles.push(profile),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&ToolProfile> {
        self.profiles.iter().find(|p| p.name() == name)
    }

    pub fn first(&self) -> Option<&ToolProfile> {
        self.profiles.first()
    }

    pub fn names(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
