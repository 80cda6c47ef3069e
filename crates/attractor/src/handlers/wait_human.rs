//! Wait-for-human handler: presents choices derived from a node's
//! outgoing edges and blocks until an [`Interviewer`] answers.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::PipelineContext;
use crate::error::PipelineResult;
use crate::events::{EventBus, PipelineEvent, PipelineEventKind};
use crate::graph::{Graph, Node};
use crate::handler::{Handler, Outcome};
use crate::interviewer::{Answer, AnswerValue, Interviewer, Question, QuestionOption};
use crate::types::{Duration, HandlerType};

/// Handler for `wait.human` nodes.
pub struct WaitHumanHandler {
    interviewer: Arc<dyn Interviewer>,
    events: Option<Arc<EventBus>>,
}

impl std::fmt::Debug for WaitHumanHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitHumanHandler").finish_non_exhaustive()
    }
}

impl WaitHumanHandler {
    #[must_use]
    pub fn new(interviewer: Arc<dyn Interviewer>) -> Self {
        Self { interviewer, events: None }
    }

    #[must_use]
    pub fn with_events(interviewer: Arc<dyn Interviewer>, events: Arc<EventBus>) -> Self {
        Self { interviewer, events: Some(events) }
    }

    fn emit(&self, kind: PipelineEventKind, node_id: &str) {
        if let Some(events) = &self.events {
            let mut data = HashMap::new();
            data.insert("node_id".to_string(), serde_json::Value::String(node_id.to_string()));
            events.emit(PipelineEvent::new(kind, "", data));
        }
    }
}

#[derive(Debug, Clone)]
struct Choice {
    key: String,
    label: String,
    target: String,
}

/// Derive an accelerator key from an edge label: `[K] Label` → `K`,
/// `K) Label` → `K`, `K - Label` → `K`, else the first character.
fn parse_accelerator_key(label: &str) -> String {
    let trimmed = label.trim();

    if let Some(rest) = trimmed.strip_prefix('[') {
        if let Some(close) = rest.find(']') {
            let key = &rest[..close];
            if !key.is_empty() {
                return key.to_uppercase();
            }
        }
    }

    let bytes = trimmed.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b')' {
        return trimmed[..1].to_uppercase();
    }
    if bytes.len() >= 4 && &bytes[1..4] == b" - " {
        return trimmed[..1].to_uppercase();
    }

    trimmed.chars().next().map(|c| c.to_uppercase().to_string()).unwrap_or_default()
}

fn find_choice_by_str<'a>(text: &str, choices: &'a [Choice]) -> Option<&'a Choice> {
    choices
        .iter()
        .find(|c| c.target == text)
        .or_else(|| choices.iter().find(|c| c.key.eq_ignore_ascii_case(text)))
        .or_else(|| choices.iter().find(|c| c.label.eq_ignore_ascii_case(text)))
}

fn find_matching_choice<'a>(answer: &Answer, choices: &'a [Choice]) -> Option<&'a Choice> {
    match &answer.value {
        AnswerValue::Selected(text) | AnswerValue::Text(text) => choices
            .iter()
            .find(|c| c.key.eq_ignore_ascii_case(text))
            .or_else(|| choices.iter().find(|c| c.label.eq_ignore_ascii_case(text)))
            .or_else(|| choices.iter().find(|c| c.target.eq_ignore_ascii_case(text))),
        AnswerValue::Yes => choices.first(),
        _ => None,
    }
}

fn build_human_outcome(choice: &Choice) -> Outcome {
    Outcome::success()
        .with_suggested_next_ids(vec![choice.target.clone()])
        .with_context_update("human.gate.selected", choice.key.clone())
        .with_context_update("human.gate.label", choice.label.clone())
}

#[async_trait]
impl Handler for WaitHumanHandler {
    fn handler_type(&self) -> HandlerType {
        HandlerType::WaitHuman
    }

    async fn execute(&self, node: &Node, _context: &PipelineContext, graph: &Graph, _logs_root: &Path) -> PipelineResult<Outcome> {
        let choices: Vec<Choice> = graph
            .outgoing(&node.id)
            .iter()
            .map(|edge| {
                let label = edge.label.clone().unwrap_or_else(|| edge.to.clone());
                let key = parse_accelerator_key(&label);
                Choice { key, label, target: edge.to.clone() }
            })
            .collect();

        if choices.is_empty() {
            return Ok(Outcome::fail("no outgoing edges for human gate"));
        }

        let options: Vec<QuestionOption> =
            choices.iter().map(|c| QuestionOption { key: c.key.clone(), label: c.label.clone(), target: c.target.clone() }).collect();

        let text = node.get_str("label").unwrap_or_else(|| "Select an option:".to_string());
        let mut question = Question::multiple_choice(text, options, node.id.clone());
        if let Some(timeout) = node.get_str("timeout").and_then(|t| Duration::parse(&t).ok()) {
            question.timeout_seconds = Some(timeout.as_std().as_secs_f64());
        }

        self.emit(PipelineEventKind::InterviewQuestion, &node.id);
        let answer = self.interviewer.ask(&question).await;

        if answer.is_timeout() {
            self.emit(PipelineEventKind::InterviewTimeout, &node.id);
            if let Some(target) = node.get_str("human.default_choice") {
                if let Some(choice) = find_choice_by_str(&target, &choices) {
                    return Ok(build_human_outcome(choice));
                }
            }
            return Ok(Outcome::retry());
        }

        if answer.is_skipped() {
            return Ok(Outcome::fail("human skipped interaction"));
        }

        self.emit(PipelineEventKind::InterviewAnswer, &node.id);

        let Some(selected) = find_matching_choice(&answer, &choices) else {
            return Ok(Outcome::fail("answer did not match any available choice"));
        };
        Ok(build_human_outcome(selected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{AttrMap, Edge};
    use crate::interviewers::{AutoApproveInterviewer, QueueInterviewer};
    use crate::types::OutcomeStatus;

    fn graph_with_choices() -> Graph {
        let mut g = Graph::new();
        for id in ["gate", "approve", "reject"] {
            g.add_node(Node { id: id.into(), handler_type: HandlerType::WaitHuman, attrs: AttrMap::new() });
        }
        g.add_edge(Edge { from: "gate".into(), to: "approve".into(), label: Some("[A] Approve".into()), attrs: AttrMap::new() });
        g.add_edge(Edge { from: "gate".into(), to: "reject".into(), label: Some("[R] Reject".into()), attrs: AttrMap::new() });
        g
    }

    #[tokio::test]
    async fn auto_approve_selects_the_first_choice() {
        let handler = WaitHumanHandler::new(Arc::new(AutoApproveInterviewer));
        let graph = graph_with_choices();
        let node = graph.node("gate").unwrap().clone();
        let ctx = PipelineContext::in_memory("r");
        let outcome = handler.execute(&node, &ctx, &graph, Path::new(".")).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(outcome.suggested_next_ids, vec!["approve".to_string()]);
    }

    #[tokio::test]
    async fn queued_selection_matches_by_key() {
        let handler = WaitHumanHandler::new(Arc::new(QueueInterviewer::new(vec![Answer::new(AnswerValue::Selected("R".into()))])));
        let graph = graph_with_choices();
        let node = graph.node("gate").unwrap().clone();
        let ctx = PipelineContext::in_memory("r");
        let outcome = handler.execute(&node, &ctx, &graph, Path::new(".")).await.unwrap();
        assert_eq!(outcome.suggested_next_ids, vec!["reject".to_string()]);
    }

    #[tokio::test]
    async fn unmatched_answer_fails_without_silent_fallback() {
        let handler = WaitHumanHandler::new(Arc::new(QueueInterviewer::new(vec![Answer::new(AnswerValue::Text("nonsense".into()))])));
        let graph = graph_with_choices();
        let node = graph.node("gate").unwrap().clone();
        let ctx = PipelineContext::in_memory("r");
        let outcome = handler.execute(&node, &ctx, &graph, Path::new(".")).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Fail);
    }

    #[tokio::test]
    async fn no_outgoing_edges_fails() {
        let handler = WaitHumanHandler::new(Arc::new(AutoApproveInterviewer));
        let mut graph = Graph::new();
        graph.add_node(Node { id: "lonely".into(), handler_type: HandlerType::WaitHuman, attrs: AttrMap::new() });
        let node = graph.node("lonely").unwrap().clone();
        let ctx = PipelineContext::in_memory("r");
        let outcome = handler.execute(&node, &ctx, &graph, Path::new(".")).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Fail);
    }
}
