//! Spawning and supervising nested sessions. Each sub-agent runs a
//! detached task owning its own `Session`; the parent talks to it over a
//! small command channel so the parent never holds two sessions' state at
//! once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{AgentError, AgentResult};
use crate::events::EventEmitter;
use crate::execution::ExecutionEnvironment;
use crate::llm::{LlmClient, ToolDefinition};
use crate::profile::ProviderProfile;
use crate::registry::{RegisteredTool, ToolOutput, ToolRegistry};
use crate::session::{AbortController, Session};
use crate::types::SessionConfig;

pub const TOOL_SPAWN_AGENT: &str = "spawn_agent";
pub const TOOL_SEND_INPUT: &str = "send_input";
pub const TOOL_WAIT: &str = "wait";
pub const TOOL_CLOSE_AGENT: &str = "close_agent";

pub const SUBAGENT_TOOL_NAMES: &[&str] = &[TOOL_SPAWN_AGENT, TOOL_SEND_INPUT, TOOL_WAIT, TOOL_CLOSE_AGENT];

fn require_str<'a>(args: &'a Value, key: &str) -> AgentResult<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::ValidationError { reason: format!("missing required field: {key}") })
}

fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn optional_u64(args: &Value, key: &str) -> Option<u64> {
    args.get(key).and_then(Value::as_u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubAgentStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentResult {
    pub output: String,
    pub success: bool,
    pub turns_used: u32,
}

enum AgentCommand {
    SendInput { message: String, reply_tx: oneshot::Sender<AgentStepResult> },
    Close,
}

enum AgentStepResult {
    Completed(SubAgentResult),
    Failed(SubAgentResult),
}

struct SubAgentHandle {
    status: SubAgentStatus,
    command_tx: mpsc::Sender<AgentCommand>,
    initial_result_rx: Option<oneshot::Receiver<AgentStepResult>>,
    cached_result: Option<SubAgentResult>,
    abort_controller: AbortController,
    join_handle: Option<JoinHandle<()>>,
}

impl SubAgentHandle {
    fn apply_step_result(&mut self, step: AgentStepResult) -> SubAgentResult {
        let result = match step {
            AgentStepResult::Completed(r) => {
                self.status = SubAgentStatus::Completed;
                r
            }
            AgentStepResult::Failed(r) => {
                self.status = SubAgentStatus::Failed;
                r
            }
        };
        self.cached_result = Some(result.clone());
        result
    }
}

impl std::fmt::Debug for SubAgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubAgentHandle").field("status", &self.status).finish_non_exhaustive()
    }
}

fn extract_result_from_session(session: &Session) -> SubAgentResult {
    let output = session
        .history()
        .iter()
        .rev()
        .find_map(|turn| match turn {
            crate::types::Turn::Assistant { content, .. } if !content.is_empty() => Some(content.clone()),
            _ => None,
        })
        .unwrap_or_default();
    SubAgentResult {
        output,
        success: session.state() != crate::types::SessionState::Closed,
        turns_used: session.total_turns(),
    }
}

async fn run_agent_task(
    mut session: Session,
    agent_id: String,
    task: String,
    abort_signal: crate::session::AbortSignal,
    initial_result_tx: oneshot::Sender<AgentStepResult>,
    mut command_rx: mpsc::Receiver<AgentCommand>,
    events: EventEmitter,
) {
    session.set_abort_signal(abort_signal.clone());
    let _ = session.submit(&task).await;
    let result = extract_result_from_session(&session);
    let success = result.success;
    let step = if success { AgentStepResult::Completed(result) } else { AgentStepResult::Failed(result) };
    events.emit_subagent_complete(&agent_id, success);
    let _ = initial_result_tx.send(step);

    loop {
        tokio::select! {
            cmd = command_rx.recv() => {
                match cmd {
                    Some(AgentCommand::SendInput { message, reply_tx }) => {
                        let _ = session.submit(&message).await;
                        let result = extract_result_from_session(&session);
                        let step = if result.success { AgentStepResult::Completed(result) } else { AgentStepResult::Failed(result) };
                        let _ = reply_tx.send(step);
                    }
                    Some(AgentCommand::Close) | None => {
                        session.close().await;
                        return;
                    }
                }
            }
            () = abort_signal.cancelled() => {
                session.close().await;
                return;
            }
        }
    }
}

/// Owns every sub-agent a session has spawned and routes the four
/// sub-agent tool calls to them.
pub struct SubAgentManager {
    agents: HashMap<String, SubAgentHandle>,
    execution_env: Arc<dyn ExecutionEnvironment>,
    client: Arc<dyn LlmClient>,
    current_depth: u32,
    max_depth: u32,
    next_id: AtomicU64,
    events: EventEmitter,
}

impl SubAgentManager {
    #[must_use]
    pub fn new(
        execution_env: Arc<dyn ExecutionEnvironment>,
        client: Arc<dyn LlmClient>,
        current_depth: u32,
        max_depth: u32,
        events: EventEmitter,
    ) -> Self {
        Self {
            agents: HashMap::new(),
            execution_env,
            client,
            current_depth,
            max_depth,
            next_id: AtomicU64::new(1),
            events,
        }
    }

    #[must_use]
    pub fn is_subagent_tool(name: &str) -> bool {
        SUBAGENT_TOOL_NAMES.contains(&name)
    }

    pub fn execute<'a>(
        &'a mut self,
        tool_name: &'a str,
        args: Value,
        parent_profile: &'a dyn ProviderProfile,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = AgentResult<Value>> + Send + 'a>> {
        Box::pin(async move {
            match tool_name {
                TOOL_SPAWN_AGENT => self.spawn_agent(args, parent_profile).await,
                TOOL_SEND_INPUT => self.send_input(args).await,
                TOOL_WAIT => self.wait_agent(args).await,
                TOOL_CLOSE_AGENT => self.close_agent(args).await,
                other => Err(AgentError::UnknownTool { name: other.into() }),
            }
        })
    }

    async fn spawn_agent(&mut self, args: Value, parent_profile: &dyn ProviderProfile) -> AgentResult<Value> {
        if self.current_depth >= self.max_depth {
            return Err(AgentError::ValidationError {
                reason: format!("sub-agent depth limit ({}) reached", self.max_depth),
            });
        }
        let task = require_str(&args, "task")?.to_string();
        let system_prompt = optional_str(&args, "system_prompt").unwrap_or_default().to_string();
        let working_dir = optional_str(&args, "working_dir").map(str::to_string);
        let model_override = optional_str(&args, "model");
        let max_turns = optional_u64(&args, "max_turns").map(|v| v as u32);

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let agent_id = format!("agent-{id}");

        let mut child_config = SessionConfig::default().for_child(self.max_depth);
        if let Some(max_turns) = max_turns {
            child_config.max_turns = max_turns;
        }

        let child_profile = parent_profile.clone_profile(model_override);
        let mut system_prompt = system_prompt;
        if let Some(dir) = &working_dir {
            system_prompt.push_str(&format!("\n\nYou are scoped to the subdirectory: {dir}\nFocus your work within this directory."));
        }
        let (child_session, mut child_events) = Session::new_with_id(
            agent_id.clone(),
            child_profile,
            self.execution_env.clone(),
            self.client.clone(),
            ToolRegistry::new(),
            child_config,
            system_prompt,
            self.current_depth + 1,
        );
        tokio::spawn(async move { while child_events.recv().await.is_some() {} });

        let abort_controller = AbortController::new();
        let abort_signal = abort_controller.signal();
        let (command_tx, command_rx) = mpsc::channel(16);
        let (initial_result_tx, initial_result_rx) = oneshot::channel();

        self.events.emit_subagent_spawn(&agent_id);

        let join_handle = tokio::spawn(run_agent_task(
            child_session,
            agent_id.clone(),
            task,
            abort_signal,
            initial_result_tx,
            command_rx,
            self.events.clone(),
        ));

        self.agents.insert(
            agent_id.clone(),
            SubAgentHandle {
                status: SubAgentStatus::Running,
                command_tx,
                initial_result_rx: Some(initial_result_rx),
                cached_result: None,
                abort_controller,
                join_handle: Some(join_handle),
            },
        );

        Ok(json!({ "agent_id": agent_id, "status": "running" }))
    }

    async fn wait_agent(&mut self, args: Value) -> AgentResult<Value> {
        let agent_id = require_str(&args, "agent_id")?.to_string();
        let handle = self
            .agents
            .get_mut(&agent_id)
            .ok_or_else(|| AgentError::ValidationError { reason: format!("unknown agent: {agent_id}") })?;

        if let Some(result) = handle.cached_result.clone() {
            return Ok(format_result_json(&agent_id, handle.status, &result));
        }

        if let Some(rx) = handle.initial_result_rx.take() {
            match rx.await {
                Ok(step) => {
                    let result = handle.apply_step_result(step);
                    return Ok(format_result_json(&agent_id, handle.status, &result));
                }
                Err(_) => {
                    handle.status = SubAgentStatus::Failed;
                    let result = SubAgentResult { output: String::new(), success: false, turns_used: 0 };
                    return Ok(format_result_json(&agent_id, handle.status, &result));
                }
            }
        }

        Ok(json!({ "agent_id": agent_id, "status": "running" }))
    }

    async fn send_input(&mut self, args: Value) -> AgentResult<Value> {
        let agent_id = require_str(&args, "agent_id")?.to_string();
        let message = require_str(&args, "message")?.to_string();

        // If the initial spawn result hasn't been consumed yet, let it
        // resolve first so the step ordering stays linear.
        {
            let handle = self
                .agents
                .get_mut(&agent_id)
                .ok_or_else(|| AgentError::ValidationError { reason: format!("unknown agent: {agent_id}") })?;
            if let Some(rx) = handle.initial_result_rx.take() {
                if let Ok(step) = rx.await {
                    handle.apply_step_result(step);
                }
            }
            if handle.status == SubAgentStatus::Failed {
                return Err(AgentError::ValidationError { reason: format!("agent {agent_id} has already failed") });
            }
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let handle = self.agents.get(&agent_id).expect("checked above");
        handle
            .command_tx
            .send(AgentCommand::SendInput { message, reply_tx })
            .await
            .map_err(|_| AgentError::ValidationError { reason: format!("agent {agent_id} is no longer running") })?;

        let step = reply_rx
            .await
            .map_err(|_| AgentError::ValidationError { reason: format!("agent {agent_id} dropped its reply channel") })?;

        let handle = self.agents.get_mut(&agent_id).expect("checked above");
        let result = handle.apply_step_result(step);
        Ok(format_result_json(&agent_id, handle.status, &result))
    }

    async fn close_agent(&mut self, args: Value) -> AgentResult<Value> {
        let agent_id = require_str(&args, "agent_id")?.to_string();
        let Some(mut handle) = self.agents.remove(&agent_id) else {
            return Err(AgentError::ValidationError { reason: format!("unknown agent: {agent_id}") });
        };

        handle.abort_controller.abort();
        let _ = handle.command_tx.send(AgentCommand::Close).await;

        let closed = if let Some(join_handle) = handle.join_handle.take() {
            match tokio::time::timeout(Duration::from_secs(5), join_handle).await {
                Ok(Ok(())) => true,
                Ok(Err(_)) => {
                    handle.status = SubAgentStatus::Failed;
                    true
                }
                Err(_) => false,
            }
        } else {
            true
        };

        let status = match (handle.cached_result.take(), handle.initial_result_rx.as_mut().map(oneshot::Receiver::try_recv)) {
            (Some(_), _) => handle.status,
            (None, Some(Ok(step))) => {
                handle.apply_step_result(step);
                handle.status
            }
            _ if handle.status == SubAgentStatus::Running => SubAgentStatus::Failed,
            _ => handle.status,
        };

        Ok(json!({ "agent_id": agent_id, "status": status, "closed": closed }))
    }

    /// Best-effort synchronous teardown for every outstanding sub-agent,
    /// called from `Session::close`. Spawns a background task to await
    /// join handles since this method itself cannot be async.
    pub fn close_all(&mut self) {
        let handles: Vec<SubAgentHandle> = self.agents.drain().map(|(_, h)| h).collect();
        if handles.is_empty() {
            return;
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let mut tasks = Vec::new();
                for mut handle in handles {
                    handle.abort_controller.abort();
                    let _ = handle.command_tx.send(AgentCommand::Close).await;
                    if let Some(join_handle) = handle.join_handle.take() {
                        tasks.push(join_handle);
                    }
                }
                let _ = tokio::time::timeout(Duration::from_secs(5), futures::future::join_all(tasks)).await;
            });
        }
    }
}

fn format_result_json(agent_id: &str, status: SubAgentStatus, result: &SubAgentResult) -> Value {
    json!({
        "agent_id": agent_id,
        "status": status,
        "output": result.output,
        "success": result.success,
        "turns_used": result.turns_used,
    })
}

fn spawn_agent_definition() -> ToolDefinition {
    ToolDefinition {
        name: TOOL_SPAWN_AGENT.into(),
        description: "Spawn a nested agent session to work on a sub-task concurrently.".into(),
        parameters: json!({
            "type": "object",
            "required": ["task"],
            "properties": {
                "task": {"type": "string", "description": "The task to hand to the sub-agent."},
                "system_prompt": {"type": "string"},
                "working_dir": {"type": "string", "description": "Subdirectory the sub-agent should scope its work to."},
                "model": {"type": "string", "description": "Optional model override (default: parent's model)."},
                "max_turns": {"type": "integer", "minimum": 1},
            },
        }),
    }
}

fn send_input_definition() -> ToolDefinition {
    ToolDefinition {
        name: TOOL_SEND_INPUT.into(),
        description: "Send a follow-up message to a running sub-agent.".into(),
        parameters: json!({
            "type": "object",
            "required": ["agent_id", "message"],
            "properties": {
                "agent_id": {"type": "string"},
                "message": {"type": "string"},
            },
        }),
    }
}

fn wait_definition() -> ToolDefinition {
    ToolDefinition {
        name: TOOL_WAIT.into(),
        description: "Wait for a sub-agent's current step to finish and collect its result.".into(),
        parameters: json!({
            "type": "object",
            "required": ["agent_id"],
            "properties": { "agent_id": {"type": "string"} },
        }),
    }
}

fn close_agent_definition() -> ToolDefinition {
    ToolDefinition {
        name: TOOL_CLOSE_AGENT.into(),
        description: "Close a sub-agent and release its resources.".into(),
        parameters: json!({
            "type": "object",
            "required": ["agent_id"],
            "properties": { "agent_id": {"type": "string"} },
        }),
    }
}

#[must_use]
pub fn subagent_definitions() -> Vec<ToolDefinition> {
    vec![spawn_agent_definition(), send_input_definition(), wait_definition(), close_agent_definition()]
}

/// Dispatch for these four tools is intercepted at the `Session` layer
/// before it reaches the registry; the registered executor is never run.
fn noop_executor() -> crate::registry::ToolExecutorFn {
    Box::new(|_args, _env| Box::pin(async { Ok(ToolOutput::Text(String::new())) }))
}

/// Register all four sub-agent tool definitions so they appear in the
/// model's tool list. Only called when `current_depth < max_depth`.
pub fn register_subagent_tools(registry: &mut ToolRegistry) -> AgentResult<()> {
    for definition in subagent_definitions() {
        registry.register(RegisteredTool::new(definition, noop_executor()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::LocalExecutionEnvironment;
    use crate::llm::{LlmError, LlmResponse};
    use crate::profile::StaticProfile;
    use async_trait::async_trait;

    struct AlwaysDoneClient;

    #[async_trait]
    impl LlmClient for AlwaysDoneClient {
        async fn complete(&self, _request: crate::llm::LlmRequest) -> Result<LlmResponse, LlmError> {
            Ok(LlmResponse { id: "r".into(), text: "done".into(), ..Default::default() })
        }
    }

    fn manager() -> SubAgentManager {
        let env = Arc::new(LocalExecutionEnvironment::new(std::env::temp_dir()));
        let (events, _receiver) = crate::events::channel();
        SubAgentManager::new(env, Arc::new(AlwaysDoneClient), 0, 2, events)
    }

    #[tokio::test]
    async fn spawn_then_wait_returns_completed_result() {
        let mut mgr = manager();
        let profile = StaticProfile::new("p", "m", 128_000);
        let spawn_result = mgr.spawn_agent(json!({"task": "do the thing"}), &profile).await.unwrap();
        let agent_id = spawn_result["agent_id"].as_str().unwrap().to_string();

        let wait_result = mgr.wait_agent(json!({"agent_id": agent_id})).await.unwrap();
        assert_eq!(wait_result["status"], "completed");
        assert_eq!(wait_result["output"], "done");
    }

    #[tokio::test]
    async fn spawn_rejects_at_depth_limit() {
        let env = Arc::new(LocalExecutionEnvironment::new(std::env::temp_dir()));
        let (events, _receiver) = crate::events::channel();
        let mut mgr = SubAgentManager::new(env, Arc::new(AlwaysDoneClient), 2, 2, events);
        let profile = StaticProfile::new("p", "m", 128_000);
        assert!(mgr.spawn_agent(json!({"task": "x"}), &profile).await.is_err());
    }

    #[tokio::test]
    async fn spawn_applies_a_model_override_to_the_child_profile() {
        let mut mgr = manager();
        let profile = StaticProfile::new("p", "parent-model", 128_000);
        mgr.spawn_agent(json!({"task": "x", "model": "cheap-model"}), &profile).await.unwrap();
    }

    #[tokio::test]
    async fn spawn_emits_subagent_spawn_and_complete_events() {
        let env = Arc::new(LocalExecutionEnvironment::new(std::env::temp_dir()));
        let (events, mut receiver) = crate::events::channel();
        let mut mgr = SubAgentManager::new(env, Arc::new(AlwaysDoneClient), 0, 2, events);
        let profile = StaticProfile::new("p", "m", 128_000);
        let spawn_result = mgr.spawn_agent(json!({"task": "do the thing"}), &profile).await.unwrap();
        let agent_id = spawn_result["agent_id"].as_str().unwrap().to_string();

        let mut saw_spawn = false;
        let mut saw_complete = false;
        while !saw_spawn || !saw_complete {
            let event = receiver.recv().await.expect("event stream ended before both events arrived");
            match event.kind {
                crate::types::EventKind::SubagentSpawn => {
                    assert_eq!(event.data["agent_id"], agent_id);
                    saw_spawn = true;
                }
                crate::types::EventKind::SubagentComplete => {
                    assert_eq!(event.data["agent_id"], agent_id);
                    saw_complete = true;
                }
                _ => {}
            }
        }
    }

    struct PanicsClient;

    #[async_trait]
    impl LlmClient for PanicsClient {
        async fn complete(&self, _request: crate::llm::LlmRequest) -> Result<LlmResponse, LlmError> {
            panic!("simulated provider crash");
        }
    }

    #[tokio::test]
    async fn wait_after_the_child_panics_reports_the_agent_failed() {
        let env = Arc::new(LocalExecutionEnvironment::new(std::env::temp_dir()));
        let (events, _receiver) = crate::events::channel();
        let mut mgr = SubAgentManager::new(env, Arc::new(PanicsClient), 0, 2, events);
        let profile = StaticProfile::new("p", "m", 128_000);
        let spawn_result = mgr.spawn_agent(json!({"task": "do the thing"}), &profile).await.unwrap();
        let agent_id = spawn_result["agent_id"].as_str().unwrap().to_string();

        let wait_result = mgr.wait_agent(json!({"agent_id": agent_id})).await.unwrap();
        assert_eq!(wait_result["status"], "failed");
    }

    #[tokio::test]
    async fn close_agent_removes_it_from_the_table() {
        let mut mgr = manager();
        let profile = StaticProfile::new("p", "m", 128_000);
        let spawn_result = mgr.spawn_agent(json!({"task": "x"}), &profile).await.unwrap();
        let agent_id = spawn_result["agent_id"].as_str().unwrap().to_string();
        // let the initial step resolve first
        let _ = mgr.wait_agent(json!({"agent_id": agent_id})).await.unwrap();
        let close_result = mgr.close_agent(json!({"agent_id": agent_id.clone()})).await.unwrap();
        assert_eq!(close_result["closed"], true);
        assert!(mgr.agents.get(&agent_id).is_none());
    }
}
