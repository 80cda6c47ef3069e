//! The session-scoped driver: owns conversation history, runs the
//! submit-loop-emit cycle, and hands tool calls off to the registry,
//! execution environment, or sub-agent manager.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::error::{AgentError, AgentResult};
use crate::events::{channel, channel_with_id, EventEmitter, EventReceiver};
use crate::execution::ExecutionEnvironment;
use crate::llm::{LlmClient, LlmError, LlmRequest, Message, ToolCall, ToolChoice, ToolResult};
use crate::loop_detection::{detect_loop, tool_call_signature};
use crate::profile::ProviderProfile;
use crate::registry::ToolRegistry;
use crate::subagents::SubAgentManager;
use crate::truncation::{truncate_tool_output, TruncationConfig};
use crate::types::{SessionConfig, SessionState, Turn};

/// Cooperative cancellation: a session polls this during long-running
/// awaits instead of being forcibly killed.
#[derive(Debug, Clone)]
pub struct AbortController {
    aborted: Arc<AtomicBool>,
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortController {
    #[must_use]
    pub fn new() -> Self {
        Self { aborted: Arc::new(AtomicBool::new(false)) }
    }

    #[must_use]
    pub fn signal(&self) -> AbortSignal {
        AbortSignal { aborted: self.aborted.clone() }
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }
}

#[derive(Debug, Clone)]
pub struct AbortSignal {
    aborted: Arc<AtomicBool>,
}

impl AbortSignal {
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Resolves once `abort()` has been called. Intended for racing inside
    /// `tokio::select!` against an in-flight call.
    pub async fn cancelled(&self) {
        while !self.is_aborted() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// A session-scoped driver for one tool-using conversation with a model.
pub struct Session {
    session_id: String,
    config: SessionConfig,
    state: SessionState,
    history: Vec<Turn>,
    profile: Box<dyn ProviderProfile>,
    execution_env: Arc<dyn ExecutionEnvironment>,
    client: Arc<dyn LlmClient>,
    tools: ToolRegistry,
    events: EventEmitter,
    steering_queue: VecDeque<String>,
    followup_queue: VecDeque<String>,
    system_prompt: String,
    abort_signal: Option<AbortSignal>,
    total_turns: u32,
    truncation_config: TruncationConfig,
    tool_call_signatures: VecDeque<String>,
    context_warning_emitted: bool,
    subagent_manager: SubAgentManager,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("state", &self.state)
            .field("history_len", &self.history.len())
            .field("total_turns", &self.total_turns)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Construct a session and its event receiver. `current_depth` is 0 for
    /// a top-level session and the parent's depth + 1 for a sub-agent.
    #[must_use]
    pub fn new(
        profile: Box<dyn ProviderProfile>,
        execution_env: Arc<dyn ExecutionEnvironment>,
        client: Arc<dyn LlmClient>,
        tools: ToolRegistry,
        config: SessionConfig,
        mut system_prompt: String,
        current_depth: u32,
    ) -> (Self, EventReceiver) {
        let (events, receiver) = channel();
        events.emit_session_start();

        if let Some(instructions) = &config.user_instructions {
            system_prompt.push_str("\n\n");
            system_prompt.push_str(instructions);
        }

        let truncation_config = TruncationConfig {
            tool_output_limits: config.tool_output_limits.clone(),
            tool_line_limits: config.tool_line_limits.clone(),
        };

        let subagent_manager = SubAgentManager::new(
            execution_env.clone(),
            client.clone(),
            current_depth,
            config.max_subagent_depth,
            events.clone(),
        );

        let session = Self {
            session_id: events.session_id().to_string(),
            config,
            state: SessionState::Idle,
            history: Vec::new(),
            profile,
            execution_env,
            client,
            tools,
            events,
            steering_queue: VecDeque::new(),
            followup_queue: VecDeque::new(),
            system_prompt,
            abort_signal: None,
            total_turns: 0,
            truncation_config,
            tool_call_signatures: VecDeque::new(),
            context_warning_emitted: false,
            subagent_manager,
        };
        (session, receiver)
    }

    /// Construct a session with a pre-allocated session id and event
    /// channel — used when spawning a sub-agent so its id is known before
    /// the task starts.
    #[must_use]
    pub fn new_with_id(
        session_id: impl Into<String>,
        profile: Box<dyn ProviderProfile>,
        execution_env: Arc<dyn ExecutionEnvironment>,
        client: Arc<dyn LlmClient>,
        tools: ToolRegistry,
        config: SessionConfig,
        mut system_prompt: String,
        current_depth: u32,
    ) -> (Self, EventReceiver) {
        let (events, receiver) = channel_with_id(session_id);
        events.emit_session_start();

        if let Some(instructions) = &config.user_instructions {
            system_prompt.push_str("\n\n");
            system_prompt.push_str(instructions);
        }

        let truncation_config = TruncationConfig {
            tool_output_limits: config.tool_output_limits.clone(),
            tool_line_limits: config.tool_line_limits.clone(),
        };

        let subagent_manager = SubAgentManager::new(
            execution_env.clone(),
            client.clone(),
            current_depth,
            config.max_subagent_depth,
            events.clone(),
        );

        let session = Self {
            session_id: events.session_id().to_string(),
            config,
            state: SessionState::Idle,
            history: Vec::new(),
            profile,
            execution_env,
            client,
            tools,
            events,
            steering_queue: VecDeque::new(),
            followup_queue: VecDeque::new(),
            system_prompt,
            abort_signal: None,
            total_turns: 0,
            truncation_config,
            tool_call_signatures: VecDeque::new(),
            context_warning_emitted: false,
            subagent_manager,
        };
        (session, receiver)
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut SessionConfig {
        &mut self.config
    }

    #[must_use]
    pub fn total_turns(&self) -> u32 {
        self.total_turns
    }

    pub fn set_abort_signal(&mut self, signal: AbortSignal) {
        self.abort_signal = Some(signal);
    }

    /// Queue user input for the next processing round without going
    /// through `submit` — used mid-round to steer an in-flight turn.
    pub fn steer(&mut self, message: impl Into<String>) {
        if self.state != SessionState::Closed {
            self.steering_queue.push_back(message.into());
        }
    }

    pub fn follow_up(&mut self, message: impl Into<String>) {
        if self.state != SessionState::Closed {
            self.followup_queue.push_back(message.into());
        }
    }

    pub fn set_awaiting_input(&mut self) -> AgentResult<()> {
        if self.state != SessionState::Idle {
            return Err(AgentError::InvalidState {
                expected: "IDLE".into(),
                actual: format!("{:?}", self.state),
            });
        }
        self.state = SessionState::AwaitingInput;
        Ok(())
    }

    /// Idempotent teardown: closes sub-agents, marks the session Closed,
    /// and emits `SESSION_END`.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.subagent_manager.close_all();
        self.state = SessionState::Closed;
        self.events.emit_session_end(&format!("{:?}", self.state));
    }

    /// Submit one round of user input. Synchronous precondition violations
    /// (closed session) are returned as `Err`; everything that goes wrong
    /// *inside* the processing loop is caught, emitted as an `ERROR` event,
    /// and resolves the session to `CLOSED` without propagating.
    pub async fn submit(&mut self, input: &str) -> AgentResult<()> {
        if self.state == SessionState::Closed {
            return Err(AgentError::SessionClosed);
        }
        self.state = SessionState::Processing;
        self.process_input(input).await;
        Ok(())
    }

    fn convert_history_to_messages(&self) -> Vec<Message> {
        let mut messages = vec![Message::system(self.system_prompt.clone())];
        for turn in &self.history {
            match turn {
                Turn::User { content, .. } | Turn::Steering { content, .. } => {
                    messages.push(Message::user(content.clone()));
                }
                Turn::System { content, .. } => {
                    messages.push(Message::system(content.clone()));
                }
                Turn::Assistant { content, tool_calls, .. } => {
                    messages.push(Message::assistant(content.clone(), tool_calls.clone()));
                }
                Turn::ToolResults { results, .. } => {
                    for result in results {
                        messages.push(Message::tool_result(
                            result.tool_call_id.clone(),
                            result.content.to_string(),
                        ));
                    }
                }
            }
        }
        messages
    }

    fn build_request(&self) -> LlmRequest {
        LlmRequest {
            model: self.profile.model().to_string(),
            messages: self.convert_history_to_messages(),
            tools: self.tools.definitions(),
            tool_choice: ToolChoice::Auto,
            reasoning_effort: self.config.reasoning_effort.as_ref().map(|r| r.to_string()),
            provider: None,
        }
    }

    fn estimate_history_chars(&self) -> usize {
        let mut total = self.system_prompt.len();
        for turn in &self.history {
            total += match turn {
                Turn::User { content, .. }
                | Turn::System { content, .. }
                | Turn::Steering { content, .. } => content.len(),
                Turn::Assistant { content, tool_calls, reasoning, .. } => {
                    content.len()
                        + reasoning.as_ref().map_or(0, String::len)
                        + tool_calls.iter().map(|c| c.name.len() + c.arguments.to_string().len()).sum::<usize>()
                }
                Turn::ToolResults { results, .. } => {
                    results.iter().map(|r| r.content.to_string().len()).sum()
                }
            };
        }
        total
    }

    /// Emit a `WARNING` once the estimated token usage crosses 80% of the
    /// model's context window.
    fn check_context_usage(&mut self) {
        if self.context_warning_emitted {
            return;
        }
        let approx_tokens = (self.estimate_history_chars() / 4) as u64;
        let threshold = (self.profile.context_window_size() as f64 * 0.8) as u64;
        if approx_tokens >= threshold {
            self.context_warning_emitted = true;
            self.events.emit_warning(
                "approaching the model's context window limit",
                json!({
                    "approx_tokens": approx_tokens,
                    "context_window_size": self.profile.context_window_size(),
                }),
            );
        }
    }

    /// Record this round's tool-call signatures and check for a repeating
    /// pattern. Returns `true` if detected — the caller must stop the loop
    /// immediately, with no exception and no injected steering turn.
    fn check_loop_detection(&mut self, tool_calls: &[ToolCall]) -> bool {
        if !self.config.enable_loop_detection {
            return false;
        }
        let history_cap = 2 * self.config.loop_detection_window as usize;
        for call in tool_calls {
            self.tool_call_signatures.push_back(tool_call_signature(call));
            while self.tool_call_signatures.len() > history_cap {
                self.tool_call_signatures.pop_front();
            }
        }
        let signatures: Vec<String> = self.tool_call_signatures.iter().cloned().collect();
        if let Some(message) = detect_loop(&signatures, self.config.loop_detection_window as usize) {
            self.events.emit_loop_detection(&message);
            true
        } else {
            false
        }
    }

    fn drain_steering(&mut self) {
        while let Some(message) = self.steering_queue.pop_front() {
            self.events.emit_steering_injected(&message);
            self.history.push(Turn::steering(message));
        }
    }

    async fn handle_llm_error(&mut self, error: LlmError) {
        if let LlmError::ContextLength { message } = &error {
            self.events.emit_warning("context length exceeded", json!({ "message": message }));
        } else {
            self.events.emit_error(AgentError::Llm(error.clone()).code(), &error.to_string());
        }
        self.state = SessionState::Closed;
        self.events.emit_session_end("CLOSED");
    }

    async fn process_input(&mut self, input: &str) {
        self.events.emit_user_input(input);
        self.history.push(Turn::user(input));

        let mut round_count: u32 = 0;

        loop {
            self.drain_steering();

            if let Some(signal) = &self.abort_signal {
                if signal.is_aborted() {
                    self.close().await;
                    return;
                }
            }

            if self.config.max_tool_rounds_per_input != 0 && round_count >= self.config.max_tool_rounds_per_input {
                self.events.emit_turn_limit(
                    json!({ "reason": "max_tool_rounds_per_input", "round_count": round_count }).as_object().expect("json! object literal").clone(),
                );
                break;
            }
            if self.config.max_turns != 0 && self.total_turns >= self.config.max_turns {
                self.events.emit_turn_limit(
                    json!({ "reason": "max_turns", "total_turns": self.total_turns }).as_object().expect("json! object literal").clone(),
                );
                break;
            }

            self.check_context_usage();

            let request = self.build_request();
            self.events.emit_llm_call_start(round_count);

            let response = if let Some(signal) = self.abort_signal.clone() {
                tokio::select! {
                    result = self.client.complete(request) => Some(result),
                    () = signal.cancelled() => None,
                }
            } else {
                Some(self.client.complete(request).await)
            };

            let Some(response) = response else {
                self.close().await;
                return;
            };

            let response = match response {
                Ok(response) => response,
                Err(error) => {
                    self.handle_llm_error(error).await;
                    return;
                }
            };

            self.events.emit_llm_call_end(round_count, response.tool_calls.len());

            self.history.push(Turn::assistant(
                response.text,
                response.tool_calls.clone(),
                response.reasoning,
                response.usage,
                Some(response.id),
            ));
            self.total_turns += 1;
            self.events.emit_turn_complete(self.total_turns);

            if response.tool_calls.is_empty() {
                break;
            }

            let Some(results) = self.execute_tool_calls(&response.tool_calls).await else {
                self.close().await;
                return;
            };
            self.history.push(Turn::tool_results(results));
            round_count += 1;

            if self.check_loop_detection(&response.tool_calls) {
                break;
            }
        }

        if let Some(followup) = self.followup_queue.pop_front() {
            Box::pin(self.process_input(&followup)).await;
        } else {
            self.state = SessionState::Idle;
        }
    }

    async fn execute_tool_calls(&mut self, tool_calls: &[ToolCall]) -> Option<Vec<ToolResult>> {
        let has_subagent = tool_calls.iter().any(|c| SubAgentManager::is_subagent_tool(&c.name));
        let signal = self.abort_signal.clone();

        if let Some(signal) = signal {
            tokio::select! {
                results = async {
                    if has_subagent {
                        self.execute_tools_with_subagents(tool_calls).await
                    } else if self.profile.supports_parallel_tool_calls() && tool_calls.len() > 1 {
                        self.execute_tools_parallel(tool_calls).await
                    } else {
                        self.execute_tools_sequential(tool_calls).await
                    }
                } => Some(results),
                () = signal.cancelled() => None,
            }
        } else if has_subagent {
            Some(self.execute_tools_with_subagents(tool_calls).await)
        } else if self.profile.supports_parallel_tool_calls() && tool_calls.len() > 1 {
            Some(self.execute_tools_parallel(tool_calls).await)
        } else {
            Some(self.execute_tools_sequential(tool_calls).await)
        }
    }

    async fn execute_tools_sequential(&mut self, tool_calls: &[ToolCall]) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(tool_calls.len());
        for call in tool_calls {
            if self.abort_signal.as_ref().is_some_and(AbortSignal::is_aborted) {
                break;
            }
            results.push(
                execute_tool(call, &self.tools, self.execution_env.as_ref(), &self.events, &self.truncation_config).await,
            );
        }
        results
    }

    async fn execute_tools_parallel(&mut self, tool_calls: &[ToolCall]) -> Vec<ToolResult> {
        let futures = tool_calls.iter().map(|call| {
            execute_tool(call, &self.tools, self.execution_env.as_ref(), &self.events, &self.truncation_config)
        });
        futures::future::join_all(futures).await
    }

    async fn execute_tools_with_subagents(&mut self, tool_calls: &[ToolCall]) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(tool_calls.len());
        for call in tool_calls {
            if self.abort_signal.as_ref().is_some_and(AbortSignal::is_aborted) {
                break;
            }
            if SubAgentManager::is_subagent_tool(&call.name) {
                results.push(self.execute_subagent_tool(call).await);
            } else {
                results.push(
                    execute_tool(call, &self.tools, self.execution_env.as_ref(), &self.events, &self.truncation_config).await,
                );
            }
        }
        results
    }

    async fn execute_subagent_tool(&mut self, call: &ToolCall) -> ToolResult {
        self.events.emit_tool_call_start(&call.name, &call.id, &call.arguments);
        match self.subagent_manager.execute(&call.name, call.arguments.clone(), self.profile.as_ref()).await {
            Ok(output) => {
                let truncated = truncate_tool_output(&output.to_string(), &call.name, &self.truncation_config);
                self.events.emit_tool_call_end(&call.id, &truncated);
                ToolResult { tool_call_id: call.id.clone(), content: output, is_error: false }
            }
            Err(error) => {
                self.events.emit_tool_call_end_error(&call.id, &error.to_string());
                ToolResult {
                    tool_call_id: call.id.clone(),
                    content: json!({ "error": error.to_string() }),
                    is_error: true,
                }
            }
        }
    }
}

/// Run one tool call end to end: emit start, validate arguments, execute,
/// truncate, emit end. Factored out of `Session` so it can be driven
/// inside `futures::future::join_all` without an exclusive borrow.
async fn execute_tool(
    call: &ToolCall,
    registry: &ToolRegistry,
    env: &dyn ExecutionEnvironment,
    events: &EventEmitter,
    truncation_config: &TruncationConfig,
) -> ToolResult {
    events.emit_tool_call_start(&call.name, &call.id, &call.arguments);

    if let Err(error) = registry.validate_arguments(&call.name, &call.arguments) {
        events.emit_tool_call_end_error(&call.id, &error.to_string());
        return ToolResult {
            tool_call_id: call.id.clone(),
            content: json!({ "error": error.to_string() }),
            is_error: true,
        };
    }

    let Some(tool) = registry.get(&call.name) else {
        let error = AgentError::UnknownTool { name: call.name.clone() };
        events.emit_tool_call_end_error(&call.id, &error.to_string());
        return ToolResult {
            tool_call_id: call.id.clone(),
            content: json!({ "error": error.to_string() }),
            is_error: true,
        };
    };

    match tool.execute(call.arguments.clone(), env).await {
        Ok(output) => {
            let full = output.as_text().to_string();
            events.emit_tool_call_end(&call.id, &full);
            let truncated = truncate_tool_output(&full, &call.name, truncation_config);
            ToolResult {
                tool_call_id: call.id.clone(),
                content: serde_json::Value::String(truncated),
                is_error: false,
            }
        }
        Err(error) => {
            events.emit_tool_call_end_error(&call.id, &error.to_string());
            ToolResult {
                tool_call_id: call.id.clone(),
                content: json!({ "error": error.to_string() }),
                is_error: true,
            }
        }
    }
}
