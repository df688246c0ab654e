//! ChatAgent：对话 + 工具调用状态机
//!
//! 状态流转：
//!
//! ```text
//! ready_for_message -> received_message -> pending_tool_use -> awaiting_tool_approval -> using_tools -> received_message
//!                                       \-> ready_for_message                         \-> using_tools
//! ```
//!
//! 每次 `run_agent` 只推进一步；`drive` 连续推进直到被动状态（ready_for_message / awaiting_tool_approval / error）。
//! 同一实例只能由一个调用方串行使用。

use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::agent::instructions::{
    ephemeral_context_block, instruction_preamble, local_now, manual_invoke_label,
    manual_invoke_note, rejection_message, tool_results_message,
};
use crate::agent::protocol::{
    contains_tool_call, extract_tool_calls, format_tool_call, visible_text, ToolCallRequest,
};
use crate::agent::verifier::verify_response;
use crate::config::AgentSection;
use crate::core::{AgentError, AgentState, ToolUseMode};
use crate::llm::{CompletionModel, CompletionPort};
use crate::prompt::{ChatMessage, Role};
use crate::tools::{AgentTool, ToolAndParams, ToolError, ToolExecutor, ToolProfile, ToolProfiles};

/// drive 的最大推进步数
const MAX_DRIVE_STEPS: usize = 32;
const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// 助手占位回复，不展示给用户
const ASSISTANT_PLACEHOLDERS: [&str; 2] = ["CONTINUE", "PASS"];
const TOOL_RESULT_MARKER: &str = "<tool_result>";

/// 对话智能体：拥有历史、状态与工具调用列表，只能通过自身方法修改
pub struct ChatAgent {
    session: String,
    description: String,
    completion: Arc<dyn CompletionPort>,
    default_model: CompletionModel,
    profile: ToolProfile,
    tool_use_mode: ToolUseMode,
    user_preferences: Vec<String>,
    llm_context: Map<String, Value>,
    utc_offset_minutes: Option<i32>,
    max_attempts: usize,
    executor: ToolExecutor,

    chat_history: Vec<ChatMessage>,
    current_state: AgentState,
    status_msg: String,
    pending_tool_calls: Vec<ToolAndParams>,
    approved_tool_calls: Vec<ToolAndParams>,
    applied_tool_calls: Vec<ToolAndParams>,
    applied_tool_call_results: Vec<String>,
    chat_start_idx: usize,
}

impl ChatAgent {
    pub fn builder(description: impl Into<String>, completion: Arc<dyn CompletionPort>) -> ChatAgentBuilder {
        ChatAgentBuilder::new(description, completion)
    }

    /// 按 [agent] 配置段构建并运行初始化工具
    pub async fn from_config(
        cfg: &AgentSection,
        completion: Arc<dyn CompletionPort>,
        profiles: ToolProfiles,
    ) -> Result<Self, AgentError> {
        ChatAgentBuilder::from_config(cfg, completion)
            .with_tool_profiles(profiles)
            .build()
            .await
    }

    // ---- 只读访问 ----

    pub fn session_id(&self) -> &str {
        &self.session
    }

    pub fn current_state(&self) -> AgentState {
        self.current_state
    }

    pub fn status_msg(&self) -> &str {
        &self.status_msg
    }

    /// 是否正在处理（非被动状态）
    pub fn working(&self) -> bool {
        !self.current_state.is_passive()
    }

    pub fn tool_use_mode(&self) -> ToolUseMode {
        self.tool_use_mode
    }

    /// 轮次之间可调整审批策略
    pub fn set_tool_use_mode(&mut self, mode: ToolUseMode) {
        self.tool_use_mode = mode;
    }

    pub fn default_model(&self) -> &CompletionModel {
        &self.default_model
    }

    /// 当前工具配置名；未注册任何配置时为 None
    pub fn active_tool_profile(&self) -> Option<&str> {
        Some(self.profile.name()).filter(|n| !n.is_empty())
    }

    pub fn get_current_tools(&self) -> &[Arc<AgentTool>] {
        self.profile.tools()
    }

    pub fn get_current_tool_by_name(&self, name: &str) -> Result<Arc<AgentTool>, AgentError> {
        self.profile.get(name).map_err(tool_lookup_error)
    }

    /// 完整历史（含初始化阶段与系统消息）
    pub fn chat_history(&self) -> &[ChatMessage] {
        &self.chat_history
    }

    pub fn chat_start_idx(&self) -> usize {
        self.chat_start_idx
    }

    pub fn pending_tool_calls(&self) -> &[ToolAndParams] {
        &self.pending_tool_calls
    }

    pub fn approved_tool_calls(&self) -> &[ToolAndParams] {
        &self.approved_tool_calls
    }

    pub fn applied_tool_calls(&self) -> &[ToolAndParams] {
        &self.applied_tool_calls
    }

    pub fn applied_tool_call_results(&self) -> &[String] {
        &self.applied_tool_call_results
    }

    pub fn user_preferences(&self) -> &[String] {
        &self.user_preferences
    }

    pub fn llm_context(&self) -> &Map<String, Value> {
        &self.llm_context
    }

    /// 面向用户的历史（从 chat_start_idx 开始的副本）
    ///
    /// - 不含系统消息时，去掉 system 消息与 CONTINUE / PASS 占位回复；若同时包含工具调用，保留含工具结果的消息；
    /// - 不含工具调用时，每条消息截断到第一个工具标记之前。
    pub fn get_chat_history(&self, include_system_messages: bool, include_function_calls: bool) -> Vec<ChatMessage> {
        let start = self.chat_start_idx.min(self.chat_history.len());
        self.chat_history[start..]
            .iter()
            .filter(|msg| {
                if include_system_messages {
                    return true;
                }
                let hidden = msg.role() == Role::System || is_placeholder(msg);
                !hidden || (include_function_calls && msg.content().contains(TOOL_RESULT_MARKER))
            })
            .map(|msg| {
                if include_function_calls {
                    msg.clone()
                } else {
                    msg.with_content(visible_text(msg.content()))
                }
            })
            .collect()
    }

    // ---- 上下文与历史维护 ----

    pub fn replace_user_preferences(&mut self, preferences: Vec<String>) {
        self.user_preferences = preferences;
    }

    pub fn add_to_context(&mut self, key: impl Into<String>, value: Value) {
        self.llm_context.insert(key.into(), value);
    }

    pub fn remove_from_context(&mut self, key: &str) {
        self.llm_context.remove(key);
    }

    /// 直接写入一条消息，不做状态检查
    pub fn force_add_chat_msg(&mut self, content: impl Into<String>, role: Role) {
        self.add_chat_msg(content, role);
    }

    /// 清空历史与所有工具调用列表（状态不变）
    pub fn reset_history(&mut self) {
        self.pending_tool_calls.clear();
        self.approved_tool_calls.clear();
        self.applied_tool_calls.clear();
        self.applied_tool_call_results.clear();
        self.chat_history.clear();
        self.chat_start_idx = 0;
    }

    /// 调用方介入：从 error 状态回到 ready_for_message
    pub fn reset_error(&mut self) -> Result<(), AgentError> {
        self.require_state("reset the error state", AgentState::Error)?;
        self.pending_tool_calls.clear();
        self.approved_tool_calls.clear();
        self.transition(AgentState::ReadyForMessage, "Waiting for user message");
        Ok(())
    }

    /// 放弃尚未得到回复的一轮：后端错误或生成失败后停在 received_message 时使用。
    /// 截断到最后一条用户消息之前（不越过 chat_start_idx），回到 ready_for_message；
    /// 返回丢弃的消息数。
    pub fn abandon_pending_generation(&mut self) -> Result<usize, AgentError> {
        self.require_state("abandon generation", AgentState::ReceivedMessage)?;
        let keep = self.chat_history[self.chat_start_idx.min(self.chat_history.len())..]
            .iter()
            .rposition(|m| m.role() == Role::User)
            .map(|i| self.chat_start_idx + i)
            .unwrap_or(self.chat_history.len());
        let dropped = self.chat_history.len() - keep;
        self.chat_history.truncate(keep);
        self.pending_tool_calls.clear();
        self.approved_tool_calls.clear();
        tracing::info!(session = %self.session, dropped, "Abandoned pending generation");
        self.transition(AgentState::ReadyForMessage, "Waiting for user message");
        Ok(dropped)
    }

    // ---- 调用方操作 ----

    /// 提交一条用户消息；仅在 ready_for_message 状态合法
    pub fn message_from_user(&mut self, msg: impl Into<ChatMessage>) -> Result<(), AgentError> {
        self.require_state("accept a message", AgentState::ReadyForMessage)?;
        let msg = msg.into();
        if msg.role() != Role::User {
            return Err(AgentError::InvalidMessage(format!(
                "role must be user, got {}",
                msg.role()
            )));
        }
        tracing::info!(session = %self.session, "Agent received message");
        self.chat_history.push(msg);
        self.transition(AgentState::ReceivedMessage, "Message received");
        Ok(())
    }

    pub fn approve_pending_tool_usage(&mut self) -> Result<(), AgentError> {
        self.require_state("approve tool usage", AgentState::AwaitingToolApproval)?;
        tracing::info!(session = %self.session, "Pending tool usage approved, moving into using_tools state");
        self.approved_tool_calls = self.pending_tool_calls.clone();
        self.transition(AgentState::UsingTools, "Tool use approved");
        Ok(())
    }

    pub fn reject_pending_tool_usage(&mut self, why: &str) -> Result<(), AgentError> {
        self.require_state("reject tool usage", AgentState::AwaitingToolApproval)?;
        tracing::info!(session = %self.session, reason = %why, "Pending tool usage rejected");
        self.add_chat_msg(rejection_message(why), Role::System);
        self.pending_tool_calls.clear();
        self.transition(AgentState::ReceivedMessage, "Tool use rejected");
        Ok(())
    }

    /// 手动触发一个工具：写入系统说明与一条只含该调用的助手消息，直接进入 using_tools
    ///
    /// 工具名与参数在写入历史前校验，失败时历史与状态不变。
    pub fn manually_invoke_tool(
        &mut self,
        tool_name: &str,
        params: Map<String, Value>,
        force_pass: bool,
    ) -> Result<(), AgentError> {
        self.require_state("use tools", AgentState::ReadyForMessage)?;
        let tool = self.get_current_tool_by_name(tool_name)?;
        tool.validate_params(&params)?;

        tracing::info!(session = %self.session, tool = %tool_name, "User triggered tool");
        self.add_chat_msg(manual_invoke_note(tool.name(), &params, force_pass), Role::System);
        let call = ToolCallRequest::new(tool.name(), manual_invoke_label(tool.name()), params);
        self.add_chat_msg(format_tool_call(&call), Role::Assistant);
        self.transition(AgentState::UsingTools, "Beginning tool use");
        Ok(())
    }

    /// 丢弃最后两条历史（上一条提示与助手回复），重新提交提示（或其替代）并生成
    pub async fn retry_last_response(
        &mut self,
        override_last_prompt_msg: Option<ChatMessage>,
        override_model: Option<&str>,
    ) -> Result<(), AgentError> {
        self.require_state("retry a response", AgentState::ReadyForMessage)?;
        let len = self.chat_history.len();
        if len < 2 || len - 2 < self.chat_start_idx {
            return Err(AgentError::InvalidMessage("no response to retry".into()));
        }
        let prompt = match override_last_prompt_msg {
            Some(msg) => msg,
            None => self.chat_history[len - 2].clone(),
        };
        self.chat_history.truncate(len - 2);
        self.chat_history.push(prompt);
        tracing::info!(session = %self.session, "Retrying last response");
        self.transition(AgentState::ReceivedMessage, "Retrying last response");
        self.run_agent(override_model).await
    }

    /// 推进状态机一步
    pub async fn run_agent(&mut self, override_model: Option<&str>) -> Result<(), AgentError> {
        tracing::debug!(session = %self.session, state = %self.current_state, "Running agent");
        match self.current_state {
            AgentState::Initializing | AgentState::Error => {}
            AgentState::ReadyForMessage => self.status_msg = "Waiting for user message".into(),
            AgentState::AwaitingToolApproval => self.status_msg = "Waiting for tool approval".into(),
            AgentState::ReceivedMessage => self.handle_received_message(override_model).await?,
            AgentState::PendingToolUse => self.handle_pending_tool_use()?,
            AgentState::UsingTools => self.handle_using_tools()?,
        }
        Ok(())
    }

    /// 连续推进直到被动状态或达到步数上限，返回最终状态
    pub async fn drive(&mut self, override_model: Option<&str>) -> Result<AgentState, AgentError> {
        for _ in 0..MAX_DRIVE_STEPS {
            if self.current_state.is_passive() {
                return Ok(self.current_state);
            }
            self.run_agent(override_model).await?;
        }
        tracing::warn!(
            session = %self.session,
            state = %self.current_state,
            "Agent did not settle within {MAX_DRIVE_STEPS} steps"
        );
        Ok(self.current_state)
    }

    /// 从最后一条助手消息解析待执行的工具调用
    pub fn get_pending_tool_calls(&self) -> Result<Vec<ToolAndParams>, AgentError> {
        let Some(last) = self.chat_history.last() else {
            return Ok(Vec::new());
        };
        if last.role() != Role::Assistant || !contains_tool_call(last.content()) {
            return Ok(Vec::new());
        }
        extract_tool_calls(last.content())?
            .into_iter()
            .map(|call| {
                let tool = self.get_current_tool_by_name(&call.name)?;
                Ok(ToolAndParams::new(call.label, tool, call.parameters))
            })
            .collect()
    }

    // ---- 各状态处理 ----

    async fn handle_received_message(&mut self, override_model: Option<&str>) -> Result<(), AgentError> {
        match self.chat_history.last().map(ChatMessage::role) {
            Some(Role::Assistant) => {
                self.fail("Invalid state -- received_message but last msg in chat_history is from ai!");
                Ok(())
            }
            None => {
                self.fail("Invalid state -- received_message with empty chat_history");
                Ok(())
            }
            Some(_) => {
                self.status_msg = "Agent is generating a message".into();
                let response = self.generate_response(override_model).await?;
                if contains_tool_call(&response) {
                    self.transition(AgentState::PendingToolUse, "Preparing for tool use");
                } else {
                    self.transition(AgentState::ReadyForMessage, "Waiting for user message");
                }
                self.add_chat_msg(response, Role::Assistant);
                Ok(())
            }
        }
    }

    fn handle_pending_tool_use(&mut self) -> Result<(), AgentError> {
        tracing::info!(session = %self.session, "Tool use pending, checking if tool approval is required");
        let pending = self.pending_or_fail()?;
        if pending.is_empty() {
            // 重新解析是幂等的，直接回到 ready_for_message，不再递归
            tracing::info!(session = %self.session, "No tool use pending, returning ready_for_message state");
            self.transition(AgentState::ReadyForMessage, "Waiting for user message");
            return Ok(());
        }

        let needs_approval = match self.tool_use_mode {
            ToolUseMode::Manual => true,
            ToolUseMode::AutomaticSafeOnly => pending.iter().any(|call| !call.tool.is_safe()),
            ToolUseMode::AutomaticUnsafe => false,
        };
        tracing::info!(
            session = %self.session,
            mode = %self.tool_use_mode,
            tools = pending.len(),
            needs_approval,
            "Tool approval policy applied"
        );
        self.pending_tool_calls = pending;
        if needs_approval {
            self.transition(AgentState::AwaitingToolApproval, "Waiting for tool approval");
        } else {
            self.transition(AgentState::UsingTools, "Beginning tool use");
        }
        Ok(())
    }

    fn handle_using_tools(&mut self) -> Result<(), AgentError> {
        tracing::info!(session = %self.session, "Using tools");
        self.status_msg = "Beginning tool use".into();
        let calls = self.pending_or_fail()?;

        let results: Vec<String> = self
            .executor
            .execute_batch(&calls)
            .into_iter()
            .map(|outcome| outcome.result)
            .collect();
        let summary = tool_results_message(calls.iter().zip(results.iter().map(String::as_str)));

        self.applied_tool_calls.extend(calls);
        self.applied_tool_call_results.extend(results);
        self.pending_tool_calls.clear();
        self.approved_tool_calls.clear();
        self.add_chat_msg(summary, Role::System);

        tracing::info!(session = %self.session, "Tool use completed, sending results to agent");
        self.transition(AgentState::ReceivedMessage, "Ready to handle tool results");
        Ok(())
    }

    /// 解析失败（未知工具或格式错误）时进入 error 状态并上抛
    fn pending_or_fail(&mut self) -> Result<Vec<ToolAndParams>, AgentError> {
        self.get_pending_tool_calls().map_err(|e| {
            self.fail(&format!("Unable to resolve pending tool calls: {e}"));
            e
        })
    }

    /// 生成一条通过校验的回复；校验失败时把错误回复与错误说明写入历史并重试
    async fn generate_response(&mut self, override_model: Option<&str>) -> Result<String, AgentError> {
        let model = match override_model {
            Some(name) => self.completion.get_model_by_name_or_id(name)?,
            None => self.default_model.clone(),
        };

        let Some(last) = self.chat_history.last() else {
            return Err(AgentError::InvalidMessage("chat history is empty".into()));
        };
        let block = ephemeral_context_block(
            &self.llm_context,
            &local_now(self.utc_offset_minutes),
            &self.user_preferences,
        );
        let final_message = last.with_content(format!("{}{block}", last.content()));

        let mut prompt: Vec<ChatMessage> = instruction_preamble(&self.description, self.profile.tools()).into();
        prompt.extend_from_slice(&self.chat_history[..self.chat_history.len() - 1]);
        prompt.push(final_message);

        let mut last_errors = Vec::new();
        for attempt in 1..=self.max_attempts {
            tracing::info!(
                session = %self.session,
                model = %model.llm,
                "Generating completion, attempt {attempt} of {}",
                self.max_attempts
            );
            let response = self.completion.get_completion(&model, &prompt).await?;
            tracing::info!(
                session = %self.session,
                input_tokens = response.input_tokens,
                output_tokens = response.output_tokens,
                completion_time_ms = response.completion_time_ms,
                cost = response.completion_cost(),
                "Completion received"
            );
            match verify_response(&response.content) {
                Ok(()) => return Ok(response.content),
                Err(e) => {
                    tracing::warn!(session = %self.session, attempt, errors = ?e.errors, "Generated response failed verification");
                    if attempt < self.max_attempts {
                        let feedback = e.feedback();
                        prompt.push(ChatMessage::assistant(response.content.clone()));
                        prompt.push(ChatMessage::system(feedback.clone()));
                        self.add_chat_msg(response.content, Role::Assistant);
                        self.add_chat_msg(feedback, Role::System);
                    }
                    last_errors = e.errors;
                }
            }
        }

        tracing::error!(session = %self.session, "Failed to get a valid response within max_attempts");
        Err(AgentError::BadResponse {
            attempts: self.max_attempts,
            errors: last_errors,
        })
    }

    // ---- 内部工具函数 ----

    fn add_chat_msg(&mut self, content: impl Into<String>, role: Role) {
        self.chat_history.push(match role {
            Role::System => ChatMessage::system(content),
            Role::User => ChatMessage::user(content),
            Role::Assistant => ChatMessage::assistant(content),
        });
    }

    fn require_state(&self, operation: &'static str, expected: AgentState) -> Result<(), AgentError> {
        if self.current_state == expected {
            Ok(())
        } else {
            Err(AgentError::invalid_state(operation, expected, self.current_state))
        }
    }

    fn transition(&mut self, next: AgentState, status: &str) {
        if next != self.current_state {
            tracing::info!(session = %self.session, from = %self.current_state, to = %next, "State transition");
        }
        self.current_state = next;
        self.status_msg = status.to_string();
    }

    fn fail(&mut self, status: &str) {
        tracing::error!(session = %self.session, from = %self.current_state, "{status}");
        self.current_state = AgentState::Error;
        self.status_msg = status.to_string();
    }
}

fn is_placeholder(msg: &ChatMessage) -> bool {
    msg.role() == Role::Assistant && ASSISTANT_PLACEHOLDERS.contains(&msg.content())
}

fn tool_lookup_error(e: ToolError) -> AgentError {
    match e {
        ToolError::NotFound(name) => AgentError::ToolNotFound(name),
        other => AgentError::Tool(other),
    }
}

/// ChatAgent 构建器：选定工具配置快照、默认模型与初始化工具
pub struct ChatAgentBuilder {
    description: String,
    completion: Arc<dyn CompletionPort>,
    default_model: String,
    profiles: ToolProfiles,
    initial_tool_profile: Option<String>,
    tool_use_mode: ToolUseMode,
    user_preferences: Vec<String>,
    llm_context: Map<String, Value>,
    init_tools: Vec<String>,
    max_attempts: usize,
    utc_offset_minutes: Option<i32>,
}

impl ChatAgentBuilder {
    pub fn new(description: impl Into<String>, completion: Arc<dyn CompletionPort>) -> Self {
        Self {
            description: description.into(),
            completion,
            default_model: "GPT 4 Omni Mini".to_string(),
            profiles: ToolProfiles::new(),
            initial_tool_profile: None,
            tool_use_mode: ToolUseMode::default(),
            user_preferences: Vec::new(),
            llm_context: Map::new(),
            init_tools: Vec::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            utc_offset_minutes: None,
        }
    }

    pub fn from_config(cfg: &AgentSection, completion: Arc<dyn CompletionPort>) -> Self {
        let mut builder = Self::new(cfg.description.clone(), completion)
            .with_default_model(cfg.default_model.clone())
            .with_tool_use_mode(cfg.tool_use_mode)
            .with_user_preferences(cfg.user_preferences.clone())
            .with_init_tools(cfg.init_tools.clone())
            .with_max_attempts(cfg.max_attempts);
        if let Some(profile) = &cfg.initial_tool_profile {
            builder = builder.with_initial_tool_profile(profile.clone());
        }
        if let Some(minutes) = cfg.utc_offset_minutes {
            builder = builder.with_utc_offset_minutes(minutes);
        }
        builder
    }

    /// 默认模型（显示名或 id）
    pub fn with_default_model(mut self, name_or_id: impl Into<String>) -> Self {
        self.default_model = name_or_id.into();
        self
    }

    pub fn with_tool_profiles(mut self, profiles: ToolProfiles) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn with_tool_profile(mut self, profile: ToolProfile) -> Self {
        self.profiles = self.profiles.with_profile(profile);
        self
    }

    /// 未指定时使用第一个注册的配置
    pub fn with_initial_tool_profile(mut self, name: impl Into<String>) -> Self {
        self.initial_tool_profile = Some(name.into());
        self
    }

    pub fn with_tool_use_mode(mut self, mode: ToolUseMode) -> Self {
        self.tool_use_mode = mode;
        self
    }

    pub fn with_user_preferences(mut self, preferences: Vec<String>) -> Self {
        self.user_preferences = preferences;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.llm_context.insert(key.into(), value);
        self
    }

    /// 构造时按顺序以空参数手动调用的工具
    pub fn with_init_tools(mut self, names: Vec<String>) -> Self {
        self.init_tools = names;
        self
    }

    /// 校验失败时的最大生成次数（至少 1）
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_utc_offset_minutes(mut self, minutes: i32) -> Self {
        self.utc_offset_minutes = Some(minutes);
        self
    }

    /// 构建 Agent 并运行初始化工具；初始化产生的历史不计入用户可见部分
    pub async fn build(self) -> Result<ChatAgent, AgentError> {
        let profile = match &self.initial_tool_profile {
            Some(name) => self
                .profiles
                .get(name)
                .cloned()
                .ok_or_else(|| AgentError::UnknownToolProfile(name.clone()))?,
            None => self.profiles.first().cloned().unwrap_or_default(),
        };
        let default_model = self.completion.get_model_by_name_or_id(&self.default_model)?;
        let session = Uuid::new_v4().to_string();
        tracing::info!(
            session = %session,
            model = %default_model.llm,
            profile = %profile.name(),
            tools = ?profile.tool_names(),
            mode = %self.tool_use_mode,
            "Building chat agent"
        );

        let mut agent = ChatAgent {
            executor: ToolExecutor::new(session.clone()),
            session,
            description: self.description,
            completion: self.completion,
            default_model,
            profile,
            tool_use_mode: self.tool_use_mode,
            user_preferences: self.user_preferences,
            llm_context: self.llm_context,
            utc_offset_minutes: self.utc_offset_minutes,
            max_attempts: self.max_attempts,
            chat_history: Vec::new(),
            current_state: AgentState::Initializing,
            status_msg: "Initializing".into(),
            pending_tool_calls: Vec::new(),
            approved_tool_calls: Vec::new(),
            applied_tool_calls: Vec::new(),
            applied_tool_call_results: Vec::new(),
            chat_start_idx: 0,
        };
        agent.transition(AgentState::ReadyForMessage, "Initialization Complete");

        for name in &self.init_tools {
            agent.manually_invoke_tool(name, Map::new(), true)?;
            agent.run_agent(None).await?;
            agent.add_chat_msg("PASS", Role::Assistant);
            agent.transition(AgentState::ReadyForMessage, "Initialization Complete");
        }
        agent.chat_start_idx = agent.chat_history.len();
        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockCompletion;
    use crate::tools::{clock_tool, echo_tool, NoParams};
    use serde_json::json;

    fn profile() -> ToolProfile {
        ToolProfile::new("default")
            .with_tool(clock_tool())
            .with_tool(echo_tool())
            .with_tool(AgentTool::new("fail", |_: NoParams| Err::<String, _>("broken")).safe())
    }

    async fn agent_with(mock: Arc<MockCompletion>) -> ChatAgent {
        ChatAgent::builder("test agent", mock)
            .with_tool_profile(profile())
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_plain_reply_returns_to_ready() {
        let mock = Arc::new(MockCompletion::with_replies(["Hi there!"]));
        let mut agent = agent_with(mock.clone()).await;
        assert_eq!(agent.current_state(), AgentState::ReadyForMessage);
        assert_eq!(agent.active_tool_profile(), Some("default"));

        agent.message_from_user("hello").unwrap();
        agent.run_agent(None).await.unwrap();
        assert_eq!(agent.current_state(), AgentState::ReadyForMessage);
        assert_eq!(agent.chat_history().last().unwrap().content(), "Hi there!");
        assert!(!agent.working());
    }

    #[tokio::test]
    async fn test_ephemeral_context_not_persisted() {
        let mock = Arc::new(MockCompletion::with_replies(["ok"]));
        let mut agent = agent_with(mock.clone()).await;
        agent.add_to_context("city", json!("Oslo"));
        agent.replace_user_preferences(vec!["be brief".into()]);
        agent.message_from_user("hello").unwrap();
        agent.drive(None).await.unwrap();

        let prompt = &mock.prompts()[0];
        assert_eq!(prompt.len(), 3);
        assert_eq!(prompt[1].content(), "Instructions received, I am ready for user messages.");
        assert!(prompt[2].content().starts_with("hello\n\n<system_context>"));
        assert!(prompt[2].content().contains("\"city\": \"Oslo\""));
        assert!(prompt[2].content().contains("be brief"));
        assert_eq!(agent.chat_history()[0].content(), "hello");
    }

    #[tokio::test]
    async fn test_failing_tool_does_not_abort_batch() {
        let reply = r#"Checking<tool>{"name":"fail","label":"Failing"}</tool><tool>{"name":"clock","label":"Time"}</tool>"#;
        let mock = Arc::new(MockCompletion::with_replies([reply, "Done"]));
        let mut agent = agent_with(mock).await;
        agent.message_from_user("what time?").unwrap();
        assert_eq!(agent.drive(None).await.unwrap(), AgentState::ReadyForMessage);

        let results = agent.applied_tool_call_results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], "TOOL FAILED!\nbroken");
        assert!(results[1].contains("iso8601"));
    }

    #[tokio::test]
    async fn test_unknown_tool_enters_error_state() {
        let mock = Arc::new(MockCompletion::with_replies([r#"<tool>{"name":"nope","label":"x"}</tool>"#]));
        let mut agent = agent_with(mock).await;
        agent.message_from_user("hi").unwrap();
        agent.run_agent(None).await.unwrap();
        assert_eq!(agent.current_state(), AgentState::PendingToolUse);

        let err = agent.run_agent(None).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolNotFound(ref n) if n == "nope"));
        assert_eq!(agent.current_state(), AgentState::Error);
        assert!(!agent.working());

        agent.reset_error().unwrap();
        assert_eq!(agent.current_state(), AgentState::ReadyForMessage);
        assert!(agent.reset_error().unwrap_err().is_invalid_state());
    }

    #[tokio::test]
    async fn test_last_message_from_assistant_is_invariant_violation() {
        let mut agent = agent_with(Arc::new(MockCompletion::new())).await;
        agent.message_from_user("hi").unwrap();
        agent.force_add_chat_msg("already answered", Role::Assistant);
        agent.run_agent(None).await.unwrap();
        assert_eq!(agent.current_state(), AgentState::Error);
        assert!(agent.status_msg().contains("last msg in chat_history is from ai"));
    }

    #[tokio::test]
    async fn test_pending_without_calls_goes_ready_in_one_step() {
        let mut agent = agent_with(Arc::new(MockCompletion::new())).await;
        agent.message_from_user("hi").unwrap();
        agent.run_agent(None).await.unwrap();
        agent.force_add_chat_msg("plain", Role::Assistant);
        agent.current_state = AgentState::PendingToolUse;
        agent.run_agent(None).await.unwrap();
        assert_eq!(agent.current_state(), AgentState::ReadyForMessage);
    }

    #[tokio::test]
    async fn test_init_tools_hidden_from_visible_history() {
        let mock = Arc::new(MockCompletion::new());
        let agent = ChatAgent::builder("test agent", mock.clone())
            .with_tool_profile(profile())
            .with_init_tools(vec!["clock".into()])
            .build()
            .await
            .unwrap();

        assert_eq!(agent.current_state(), AgentState::ReadyForMessage);
        assert_eq!(agent.chat_history().len(), 4);
        assert!(agent.chat_history()[0].content().contains("respond PASS and use data later"));
        assert!(agent.chat_history()[1].content().contains("Manually called: clock"));
        assert!(agent.chat_history()[2].content().starts_with("Tool use complete"));
        assert_eq!(agent.chat_history()[3].content(), "PASS");
        assert_eq!(agent.chat_start_idx(), 4);
        assert!(agent.get_chat_history(true, true).is_empty());
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_init_tool_and_profile_fail_build() {
        let mock = Arc::new(MockCompletion::new());
        let err = ChatAgent::builder("a", mock.clone())
            .with_tool_profile(profile())
            .with_init_tools(vec!["missing".into()])
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AgentError::ToolNotFound(_)));

        let err = ChatAgent::builder("a", mock)
            .with_tool_profile(profile())
            .with_initial_tool_profile("other")
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AgentError::UnknownToolProfile(ref n) if n == "other"));
    }

    #[tokio::test]
    async fn test_manual_invoke_validates_before_writing() {
        let mut agent = agent_with(Arc::new(MockCompletion::new())).await;
        let mut bad = Map::new();
        bad.insert("utc_offset_minutes".into(), json!("east"));
        let err = agent.manually_invoke_tool("clock", bad, false).unwrap_err();
        assert!(matches!(err, AgentError::Tool(ToolError::InvalidParams { .. })));
        assert!(agent.chat_history().is_empty());
        assert_eq!(agent.current_state(), AgentState::ReadyForMessage);

        agent.manually_invoke_tool("echo", Map::new(), false).unwrap();
        assert_eq!(agent.current_state(), AgentState::UsingTools);
        assert_eq!(agent.get_pending_tool_calls().unwrap()[0].label, "Manually called: echo");
    }

    #[tokio::test]
    async fn test_chat_history_filters() {
        let reply = r#"Let me look.<tool>{"name":"clock","label":"Time"}</tool>"#;
        let mock = Arc::new(MockCompletion::with_replies([reply, "It is noon."]));
        let mut agent = agent_with(mock).await;
        agent.message_from_user("time?").unwrap();
        agent.drive(None).await.unwrap();
        agent.force_add_chat_msg("CONTINUE", Role::Assistant);

        let visible = agent.get_chat_history(false, false);
        let contents: Vec<&str> = visible.iter().map(ChatMessage::content).collect();
        assert_eq!(contents, vec!["time?", "Let me look.", "It is noon."]);

        let with_calls = agent.get_chat_history(false, true);
        assert_eq!(with_calls.len(), 4);
        assert!(with_calls[1].content().contains("<tool>"));
        assert!(with_calls[2].content().contains("<tool_result>"));

        assert_eq!(agent.get_chat_history(true, true).len(), 5);
    }

    #[tokio::test]
    async fn test_reset_history_clears_lists() {
        let reply = r#"<tool>{"name":"clock","label":"Time"}</tool>"#;
        let mut agent = agent_with(Arc::new(MockCompletion::with_replies([reply, "ok"]))).await;
        agent.message_from_user("time?").unwrap();
        agent.drive(None).await.unwrap();
        assert_eq!(agent.applied_tool_calls().len(), 1);
        agent.reset_history();
        assert!(agent.chat_history().is_empty());
        assert!(agent.applied_tool_calls().is_empty());
        assert!(agent.applied_tool_call_results().is_empty());
    }

    #[tokio::test]
    async fn test_non_user_message_rejected() {
        let mut agent = agent_with(Arc::new(MockCompletion::new())).await;
        let err = agent.message_from_user(ChatMessage::assistant("hi")).unwrap_err();
        assert!(matches!(err, AgentError::InvalidMessage(_)));
        assert!(agent.chat_history().is_empty());
        assert_eq!(agent.current_state(), AgentState::ReadyForMessage);
    }

    #[tokio::test]
    async fn test_from_config() {
        let cfg = AgentSection {
            tool_use_mode: ToolUseMode::Manual,
            max_attempts: 0,
            ..AgentSection::default()
        };
        let agent = ChatAgent::from_config(
            &cfg,
            Arc::new(MockCompletion::new()),
            ToolProfiles::new().with_profile(profile()),
        )
        .await
        .unwrap();
        assert_eq!(agent.tool_use_mode(), ToolUseMode::Manual);
        assert_eq!(agent.max_attempts, 1);
        assert_eq!(agent.default_model().llm, "GPT 4 Omni Mini");
        assert_eq!(agent.get_current_tools().len(), 3);
    }
}
