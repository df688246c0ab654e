//! ChatAgent 集成测试（MockCompletion 驱动）

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};
    use serde_json::{json, Map, Value};
    use sully::agent::{extract_tool_calls, format_tool_message, ToolCallRequest};
    use sully::llm::{LlmError, MockCompletion};
    use sully::prompt::{ChatMessage, ImageFormat, ImagePromptMessage, Role};
    use sully::tools::{AgentTool, NoParams, ToolProfile};
    use sully::{AgentError, AgentState, ChatAgent, ToolUseMode};

    /// Look up a stored value by key.
    #[derive(Deserialize, JsonSchema)]
    struct LookupParams {
        key: String,
    }

    #[derive(Serialize)]
    struct LookupResult {
        key: String,
        value: u32,
    }

    fn lookup_tool() -> AgentTool {
        AgentTool::new("lookup", |p: LookupParams| {
            Ok::<_, String>(LookupResult { key: p.key, value: 42 })
        })
        .safe()
    }

    fn delete_tool(counter: Arc<AtomicUsize>) -> AgentTool {
        AgentTool::new("delete", move |_: NoParams| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>("deleted")
        })
        .with_description("Delete everything")
    }

    fn profile(counter: Arc<AtomicUsize>) -> ToolProfile {
        ToolProfile::new("default")
            .with_tool(lookup_tool())
            .with_tool(delete_tool(counter))
            .with_tool(AgentTool::new("explode", |_: NoParams| Err::<String, _>("kaboom")).safe())
    }

    async fn build(mock: &Arc<MockCompletion>, mode: ToolUseMode) -> (ChatAgent, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let agent = ChatAgent::builder("You are a test agent.", mock.clone())
            .with_tool_profile(profile(counter.clone()))
            .with_tool_use_mode(mode)
            .build()
            .await
            .unwrap();
        (agent, counter)
    }

    fn call(name: &str, label: &str) -> String {
        format!(r#"<tool>{{"name":"{name}","label":"{label}","parameters":{{}}}}</tool>"#)
    }

    fn lookup_call() -> String {
        r#"<tool>{"name":"lookup","label":"Looking up a","parameters":{"key":"a"}}</tool>"#.to_string()
    }

    /// 逐步推进并记录经过的状态
    async fn trace_until_passive(agent: &mut ChatAgent) -> Vec<AgentState> {
        let mut states = vec![agent.current_state()];
        for _ in 0..20 {
            agent.run_agent(None).await.unwrap();
            let state = agent.current_state();
            assert!(AgentState::ALL.contains(&state));
            states.push(state);
            if state.is_passive() {
                break;
            }
        }
        states
    }

    #[tokio::test]
    async fn test_message_rejected_when_not_ready() {
        let mock = Arc::new(MockCompletion::with_replies([lookup_call()]));
        let (mut agent, _) = build(&mock, ToolUseMode::Manual).await;
        agent.message_from_user("first").unwrap();
        let before = agent.chat_history().to_vec();

        let err = agent.message_from_user("second").unwrap_err();
        assert!(err.is_invalid_state());
        assert_eq!(agent.chat_history(), before.as_slice());

        agent.drive(None).await.unwrap();
        assert_eq!(agent.current_state(), AgentState::AwaitingToolApproval);
        let before = agent.chat_history().to_vec();
        assert!(agent.message_from_user("third").unwrap_err().is_invalid_state());
        assert_eq!(agent.chat_history(), before.as_slice());
    }

    #[tokio::test]
    async fn test_reply_without_tools_is_one_step() {
        let mock = Arc::new(MockCompletion::with_replies(["Just text."]));
        let (mut agent, _) = build(&mock, ToolUseMode::AutomaticSafeOnly).await;
        agent.message_from_user("hi").unwrap();
        let states = trace_until_passive(&mut agent).await;
        assert_eq!(states, vec![AgentState::ReceivedMessage, AgentState::ReadyForMessage]);
    }

    #[tokio::test]
    async fn test_automatic_unsafe_skips_approval() {
        let reply = format!("Working on it.{}{}", call("delete", "Deleting"), lookup_call());
        let mock = Arc::new(MockCompletion::with_replies([reply.as_str(), "All done."]));
        let (mut agent, counter) = build(&mock, ToolUseMode::AutomaticUnsafe).await;
        agent.message_from_user("clean up").unwrap();
        let states = trace_until_passive(&mut agent).await;

        assert_eq!(
            states,
            vec![
                AgentState::ReceivedMessage,
                AgentState::PendingToolUse,
                AgentState::UsingTools,
                AgentState::ReceivedMessage,
                AgentState::ReadyForMessage,
            ]
        );
        assert!(!states.contains(&AgentState::AwaitingToolApproval));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let names: Vec<&str> = agent.applied_tool_calls().iter().map(|c| c.tool_name()).collect();
        assert_eq!(names, vec!["delete", "lookup"]);
    }

    #[tokio::test]
    async fn test_unsafe_tool_requires_approval_in_safe_only_mode() {
        let reply = call("delete", "Deleting");
        let mock = Arc::new(MockCompletion::with_replies([reply.as_str(), "Deleted."]));
        let (mut agent, counter) = build(&mock, ToolUseMode::AutomaticSafeOnly).await;
        agent.message_from_user("delete it").unwrap();

        assert_eq!(agent.drive(None).await.unwrap(), AgentState::AwaitingToolApproval);
        assert_eq!(agent.pending_tool_calls().len(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(agent.status_msg().contains("approval"));

        agent.approve_pending_tool_usage().unwrap();
        assert_eq!(agent.current_state(), AgentState::UsingTools);
        assert_eq!(agent.approved_tool_calls().len(), 1);
        assert_eq!(agent.drive(None).await.unwrap(), AgentState::ReadyForMessage);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_manual_mode_requires_approval_even_for_safe_tools() {
        let mock = Arc::new(MockCompletion::with_replies([lookup_call()]));
        let (mut agent, _) = build(&mock, ToolUseMode::Manual).await;
        agent.message_from_user("look up a").unwrap();
        assert_eq!(agent.drive(None).await.unwrap(), AgentState::AwaitingToolApproval);
    }

    #[tokio::test]
    async fn test_reject_appends_one_system_message() {
        let reply = call("delete", "Deleting");
        let mock = Arc::new(MockCompletion::with_replies([reply.as_str(), "Understood."]));
        let (mut agent, counter) = build(&mock, ToolUseMode::AutomaticSafeOnly).await;
        agent.message_from_user("delete it").unwrap();
        agent.drive(None).await.unwrap();

        let before = agent.chat_history().len();
        agent.reject_pending_tool_usage("R").unwrap();
        assert_eq!(agent.current_state(), AgentState::ReceivedMessage);
        assert_eq!(agent.chat_history().len(), before + 1);
        let last = agent.chat_history().last().unwrap();
        assert_eq!(last.role(), Role::System);
        assert!(last.content().starts_with("The user rejected your tool calls"));
        assert!(last.content().ends_with("\n\nR"));

        assert_eq!(agent.drive(None).await.unwrap(), AgentState::ReadyForMessage);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_approval_outside_awaiting_is_invalid() {
        let mock = Arc::new(MockCompletion::new());
        let (mut agent, _) = build(&mock, ToolUseMode::Manual).await;
        assert!(agent.approve_pending_tool_usage().unwrap_err().is_invalid_state());
        assert!(agent.reject_pending_tool_usage("no").unwrap_err().is_invalid_state());
        assert!(agent.chat_history().is_empty());
    }

    #[tokio::test]
    async fn test_failing_tool_is_isolated() {
        let reply = format!("{}{}", call("explode", "Blowing up"), lookup_call());
        let mock = Arc::new(MockCompletion::with_replies([reply.as_str(), "Done."]));
        let (mut agent, _) = build(&mock, ToolUseMode::AutomaticSafeOnly).await;
        agent.message_from_user("go").unwrap();
        assert_eq!(agent.drive(None).await.unwrap(), AgentState::ReadyForMessage);

        let results = agent.applied_tool_call_results();
        assert_eq!(results.len(), 2);
        assert!(results[0].starts_with("TOOL FAILED!"));
        let lookup: Value = serde_json::from_str(&results[1]).unwrap();
        assert_eq!(lookup, json!({"key": "a", "value": 42}));

        let summary = agent
            .chat_history()
            .iter()
            .find(|m| m.role() == Role::System && m.content().starts_with("Tool use complete"))
            .unwrap();
        let explode_at = summary.content().find("<tool_used>explode</tool_used>").unwrap();
        let lookup_at = summary.content().find("<tool_used>lookup</tool_used>").unwrap();
        assert!(explode_at < lookup_at);
    }

    #[tokio::test]
    async fn test_verification_retries_then_fails() {
        let bad = r#"hello <tool>{"parameters":{}}</tool>"#;
        let mock = Arc::new(MockCompletion::with_replies([bad, bad, bad]));
        let (mut agent, _) = build(&mock, ToolUseMode::AutomaticSafeOnly).await;
        agent.message_from_user("hi").unwrap();

        let err = agent.run_agent(None).await.unwrap_err();
        match &err {
            AgentError::BadResponse { attempts, errors } => {
                assert_eq!(*attempts, 3);
                assert_eq!(errors.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.is_generation_failure());
        assert_eq!(mock.call_count(), 3);
        assert_eq!(agent.current_state(), AgentState::ReceivedMessage);

        // 前两次失败各写入错误回复与错误说明
        let history = agent.chat_history();
        assert_eq!(history.len(), 5);
        assert_eq!(history[1].content(), bad);
        assert_eq!(history[2].role(), Role::System);
        assert!(history[2].content().starts_with("<system>Error with tool calls: "));
        assert!(history[2].content().contains("missing required field `name`"));
        assert!(history[2].content().contains("missing required field `label`"));

        // 第三次调用的提示包含前两次的反馈
        let third_prompt = &mock.prompts()[2];
        assert_eq!(third_prompt.len(), 2 + 1 + 4);
    }

    #[tokio::test]
    async fn test_verification_recovers_within_budget() {
        let bad = r#"<tool>{"name":"lookup"}</tool>"#;
        let mock = Arc::new(MockCompletion::with_replies([bad, "Fine, no tools."]));
        let (mut agent, _) = build(&mock, ToolUseMode::AutomaticSafeOnly).await;
        agent.message_from_user("hi").unwrap();
        agent.run_agent(None).await.unwrap();
        assert_eq!(agent.current_state(), AgentState::ReadyForMessage);
        assert_eq!(agent.chat_history().last().unwrap().content(), "Fine, no tools.");
    }

    #[tokio::test]
    async fn test_provider_error_propagates_without_state_change() {
        let mock = Arc::new(MockCompletion::new());
        mock.push_failure("service unavailable");
        let (mut agent, _) = build(&mock, ToolUseMode::AutomaticSafeOnly).await;
        agent.message_from_user("hi").unwrap();

        let err = agent.run_agent(None).await.unwrap_err();
        assert!(matches!(err, AgentError::LlmError(LlmError::Request(_))));
        assert!(!err.is_generation_failure());
        assert_eq!(agent.current_state(), AgentState::ReceivedMessage);
        assert_eq!(agent.chat_history().len(), 1);

        agent.run_agent(None).await.unwrap();
        assert_eq!(agent.current_state(), AgentState::ReadyForMessage);
    }

    #[tokio::test]
    async fn test_abandon_after_provider_error_accepts_next_message() {
        let mock = Arc::new(MockCompletion::new());
        mock.push_failure("network down");
        let (mut agent, _) = build(&mock, ToolUseMode::AutomaticSafeOnly).await;
        agent.message_from_user("hi").unwrap();
        assert!(agent.drive(None).await.is_err());
        assert!(agent.message_from_user("again").unwrap_err().is_invalid_state());

        assert_eq!(agent.abandon_pending_generation().unwrap(), 1);
        assert_eq!(agent.current_state(), AgentState::ReadyForMessage);
        assert!(agent.chat_history().is_empty());

        agent.message_from_user("again").unwrap();
        assert_eq!(agent.drive(None).await.unwrap(), AgentState::ReadyForMessage);
        assert_eq!(agent.chat_history().len(), 2);
        assert_eq!(agent.chat_history()[0].content(), "again");
    }

    #[tokio::test]
    async fn test_abandon_after_bad_response_drops_whole_turn() {
        let bad = r#"<tool>{"parameters":{}}</tool>"#;
        let mock = Arc::new(MockCompletion::with_replies(["Hello!", bad, bad, bad]));
        let (mut agent, _) = build(&mock, ToolUseMode::AutomaticSafeOnly).await;
        agent.message_from_user("first").unwrap();
        agent.drive(None).await.unwrap();
        agent.message_from_user("second").unwrap();
        assert!(agent.drive(None).await.unwrap_err().is_generation_failure());
        assert_eq!(agent.chat_history().len(), 2 + 5);

        assert_eq!(agent.abandon_pending_generation().unwrap(), 5);
        let history = agent.chat_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content(), "Hello!");
        assert_eq!(agent.current_state(), AgentState::ReadyForMessage);

        // 非 received_message 状态下不可用
        assert!(agent.abandon_pending_generation().unwrap_err().is_invalid_state());
    }

    #[tokio::test]
    async fn test_round_trip_extraction() {
        let mut params = Map::new();
        params.insert("key".into(), json!("a"));
        let calls = vec![
            ToolCallRequest::new("lookup", "First", params),
            ToolCallRequest::new("delete", "Second", Map::new()),
        ];
        let message = format_tool_message("Plan: two steps.", &calls);
        assert_eq!(extract_tool_calls(&message).unwrap(), calls);
    }

    #[tokio::test]
    async fn test_retry_only_from_ready_and_drops_two_entries() {
        let mock = Arc::new(MockCompletion::with_replies(["first answer", "second answer"]));
        let (mut agent, _) = build(&mock, ToolUseMode::AutomaticSafeOnly).await;

        agent.message_from_user("question").unwrap();
        assert!(agent.retry_last_response(None, None).await.unwrap_err().is_invalid_state());
        agent.drive(None).await.unwrap();
        assert_eq!(agent.chat_history().len(), 2);

        agent.retry_last_response(None, Some("GPT 4 Omni")).await.unwrap();
        let history = agent.chat_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content(), "question");
        assert_eq!(history[1].content(), "second answer");
        assert_eq!(agent.current_state(), AgentState::ReadyForMessage);

        let replayed = &mock.prompts()[1];
        assert_eq!(replayed.len(), 3);
        assert!(replayed[2].content().starts_with("question\n\n<system_context>"));
    }

    #[tokio::test]
    async fn test_retry_with_override_prompt() {
        let mock = Arc::new(MockCompletion::with_replies(["a"]));
        let (mut agent, _) = build(&mock, ToolUseMode::AutomaticSafeOnly).await;
        agent.message_from_user("original").unwrap();
        agent.drive(None).await.unwrap();

        agent
            .retry_last_response(Some(ChatMessage::user("rephrased")), None)
            .await
            .unwrap();
        assert_eq!(agent.chat_history()[0].content(), "rephrased");
        assert!(agent.chat_history()[1].content().starts_with("Echo from Mock: rephrased"));
    }

    #[tokio::test]
    async fn test_safe_lookup_scenario() {
        let mock = Arc::new(MockCompletion::with_replies([lookup_call()]));
        let mut agent = ChatAgent::builder("Scenario agent", mock.clone())
            .with_tool_profile(ToolProfile::new("default").with_tool(lookup_tool()))
            .with_tool_use_mode(ToolUseMode::AutomaticSafeOnly)
            .build()
            .await
            .unwrap();
        assert_eq!(agent.active_tool_profile(), Some("default"));

        agent.message_from_user("what is a?").unwrap();
        agent.run_agent(None).await.unwrap();
        assert_eq!(agent.current_state(), AgentState::PendingToolUse);
        agent.run_agent(None).await.unwrap();
        assert_eq!(agent.current_state(), AgentState::UsingTools);
        agent.run_agent(None).await.unwrap();
        assert_eq!(agent.current_state(), AgentState::ReceivedMessage);
        assert_eq!(agent.applied_tool_calls().len(), 1);
        assert_eq!(agent.applied_tool_calls()[0].label, "Looking up a");
    }

    #[tokio::test]
    async fn test_profile_selection() {
        let mock = Arc::new(MockCompletion::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let agent = ChatAgent::builder("a", mock.clone())
            .with_tool_profile(ToolProfile::new("lookup_only").with_tool(lookup_tool()))
            .with_tool_profile(profile(counter.clone()))
            .build()
            .await
            .unwrap();
        assert_eq!(agent.active_tool_profile(), Some("lookup_only"));
        assert_eq!(agent.get_current_tools().len(), 1);

        let agent = ChatAgent::builder("a", mock)
            .with_tool_profile(ToolProfile::new("lookup_only").with_tool(lookup_tool()))
            .with_tool_profile(profile(counter))
            .with_initial_tool_profile("default")
            .build()
            .await
            .unwrap();
        assert_eq!(agent.active_tool_profile(), Some("default"));
        assert_eq!(agent.get_current_tools().len(), 3);
    }

    #[tokio::test]
    async fn test_preamble_lists_tools_and_is_not_stored() {
        let mock = Arc::new(MockCompletion::with_replies(["ok"]));
        let (mut agent, _) = build(&mock, ToolUseMode::AutomaticSafeOnly).await;
        agent.message_from_user("hi").unwrap();
        agent.drive(None).await.unwrap();

        let prompt = &mock.prompts()[0];
        let instructions = prompt[0].content();
        assert_eq!(prompt[0].role(), Role::User);
        assert!(instructions.contains("\"name\": \"lookup\""));
        assert!(instructions.contains("Look up a stored value by key."));
        assert!(instructions.contains("Delete everything"));
        assert!(instructions.contains("You are a test agent."));
        assert_eq!(agent.chat_history().len(), 2);
        assert!(agent.chat_history().iter().all(|m| !m.content().contains("<system_context>")));
    }

    #[tokio::test]
    async fn test_image_message_requires_image_model() {
        let mock = Arc::new(MockCompletion::new());
        let mut agent = ChatAgent::builder("img", mock.clone())
            .with_default_model("Llama 3 Instruct 8B")
            .build()
            .await
            .unwrap();
        let image = ImagePromptMessage::from_image_bytes("what is this?", [(vec![1u8, 2, 3], ImageFormat::Png)]);
        agent.message_from_user(image).unwrap();

        let err = agent.run_agent(None).await.unwrap_err();
        assert!(matches!(err, AgentError::LlmError(LlmError::UnsupportedCapability { .. })));
        assert_eq!(mock.call_count(), 0);

        agent.run_agent(Some("GPT 4 Omni")).await.unwrap();
        assert_eq!(agent.current_state(), AgentState::ReadyForMessage);
        assert!(mock.prompts()[0].last().unwrap().has_images());
    }
}
