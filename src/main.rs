//! Sully 终端对话
//!
//! 入口：加载配置、初始化日志、构建 ChatAgent，在标准输入上运行对话循环；
//! Agent 停在 awaiting_tool_approval 时询问操作者批准或拒绝。
//!
//! 用法：`sully [config.toml] [--mock]`
//!
//! 命令：`/quit`、`/retry`、`/history`、`/reset`、`/mode <manual|automatic_safe_only|automatic_unsafe>`、
//! `/tool <name> [json]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use serde_json::{Map, Value};
use sully::{
    config::load_config,
    llm::{CompletionHandler, CompletionPort, MockCompletion},
    prompt::Role,
    tools::{default_profile, ToolProfiles},
    AgentState, ChatAgent, ToolUseMode,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};

type Input = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config_path = None;
    let mut use_mock = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--mock" => use_mock = true,
            path => config_path = Some(PathBuf::from(path)),
        }
    }

    let cfg = load_config(config_path).context("Failed to load config")?;
    sully::observability::init(&cfg.app.log_level);

    let completion: Arc<dyn CompletionPort> = if use_mock {
        Arc::new(MockCompletion::new())
    } else {
        Arc::new(CompletionHandler::from_config(&cfg.llm).context("Failed to create completion handler")?)
    };
    let profiles = ToolProfiles::new().with_profile(default_profile());
    let mut agent = ChatAgent::from_config(&cfg.agent, completion, profiles)
        .await
        .context("Failed to create agent")?;

    println!(
        "sully ready (model: {}, mode: {}). Type /quit to exit.",
        agent.default_model().llm,
        agent.tool_use_mode()
    );

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let Some(line) = prompt_line(&mut input, "> ").await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let result = match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit", _) => break,
            ("/history", _) => {
                for msg in agent.get_chat_history(false, false) {
                    println!("[{}] {}", msg.role(), msg.content());
                }
                continue;
            }
            ("/reset", _) => {
                agent.reset_history();
                match agent.current_state() {
                    AgentState::Error => agent.reset_error()?,
                    AgentState::ReceivedMessage => {
                        agent.abandon_pending_generation()?;
                    }
                    _ => {}
                }
                println!("history cleared");
                continue;
            }
            ("/mode", mode) => {
                match mode.trim().parse::<ToolUseMode>() {
                    Ok(mode) => {
                        agent.set_tool_use_mode(mode);
                        println!("tool use mode: {mode}");
                    }
                    Err(e) => println!("{e}"),
                }
                continue;
            }
            ("/retry", _) => agent.retry_last_response(None, None).await,
            ("/tool", rest) => match parse_tool_command(rest) {
                Ok((name, params)) => agent.manually_invoke_tool(&name, params, false),
                Err(e) => {
                    println!("{e}");
                    continue;
                }
            },
            _ => agent.message_from_user(line),
        };

        match result {
            Ok(()) => run_turn(&mut agent, &mut input).await?,
            Err(e) => println!("error: {e}"),
        }
    }

    Ok(())
}

/// 推进 Agent 直到等待用户输入；途中处理工具审批
async fn run_turn(agent: &mut ChatAgent, input: &mut Input) -> anyhow::Result<()> {
    loop {
        let state = match agent.drive(None).await {
            Ok(state) => state,
            Err(e) => {
                println!("error: {e}");
                match agent.current_state() {
                    AgentState::Error => agent.reset_error()?,
                    AgentState::ReceivedMessage => {
                        let answer = prompt_line(input, "retry generation? [y/N] ").await?.unwrap_or_default();
                        if answer.trim().eq_ignore_ascii_case("y") {
                            continue;
                        }
                        agent.abandon_pending_generation()?;
                        println!("turn dropped");
                    }
                    _ => {}
                }
                return Ok(());
            }
        };

        match state {
            AgentState::AwaitingToolApproval => {
                for call in agent.pending_tool_calls() {
                    println!(
                        "tool request: {} ({}) {}",
                        call.tool_name(),
                        call.label,
                        Value::Object(call.params.clone())
                    );
                }
                let answer = prompt_line(input, "approve? [y/N] ").await?.unwrap_or_default();
                if answer.trim().eq_ignore_ascii_case("y") {
                    agent.approve_pending_tool_usage()?;
                } else {
                    let why = prompt_line(input, "reason: ").await?.unwrap_or_default();
                    agent.reject_pending_tool_usage(&why)?;
                }
            }
            AgentState::Error => {
                println!("agent error: {}", agent.status_msg());
                agent.reset_error()?;
                return Ok(());
            }
            _ => {
                if let Some(reply) = agent
                    .get_chat_history(false, false)
                    .into_iter()
                    .rev()
                    .find(|m| m.role() == Role::Assistant)
                {
                    println!("{}", reply.content().trim());
                }
                return Ok(());
            }
        }
    }
}

async fn prompt_line(input: &mut Input, prompt: &str) -> anyhow::Result<Option<String>> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(prompt.as_bytes()).await?;
    stdout.flush().await?;
    Ok(input.next_line().await?)
}

fn parse_tool_command(rest: &str) -> anyhow::Result<(String, Map<String, Value>)> {
    let rest = rest.trim();
    let (name, json) = rest.split_once(' ').unwrap_or((rest, ""));
    if name.is_empty() {
        anyhow::bail!("usage: /tool <name> [json]");
    }
    let params = if json.trim().is_empty() {
        Map::new()
    } else {
        match serde_json::from_str(json).context("tool parameters must be JSON")? {
            Value::Object(map) => map,
            _ => anyhow::bail!("tool parameters must be a JSON object"),
        }
    };
    Ok((name.to_string(), params))
}
