//! Human-in-the-loop interaction. All human interaction goes through the
//! [`Interviewer`] trait, which supports asking a question, batching
//! several, and sending one-way informational messages. Implementations
//! never block a thread while waiting on a human — `ask` is async end to
//! end, from a console prompt down to a pre-recorded queue.

use std::fmt;

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuestionType {
    YesNo,
    MultipleChoice,
    Freeform,
    Confirmation,
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::YesNo => f.write_str("YES_NO"),
            Self::MultipleChoice => f.write_str("MULTIPLE_CHOICE"),
            Self::Freeform => f.write_str("FREEFORM"),
            Self::Confirmation => f.write_str("CONFIRMATION"),
        }
    }
}

/// A selectable option, carrying the accelerator key and target node id a
/// `wait_human` node derives from its outgoing edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionOption {
    pub key: String,
    pub label: String,
    pub target: String,
}

#[derive(Debug, Clone)]
pub struct Question {
    pub text: String,
    pub question_type: QuestionType,
    pub options: Vec<QuestionOption>,
    pub default: Option<Answer>,
    pub timeout_seconds: Option<f64>,
    pub stage: String,
}

impl Question {
    #[must_use]
    pub fn yes_no(text: impl Into<String>, stage: impl Into<String>) -> Self {
        Self { text: text.into(), question_type: QuestionType::YesNo, options: Vec::new(), default: None, timeout_seconds: None, stage: stage.into() }
    }

    #[must_use]
    pub fn confirmation(text: impl Into<String>, stage: impl Into<String>) -> Self {
        Self { text: text.into(), question_type: QuestionType::Confirmation, options: Vec::new(), default: None, timeout_seconds: None, stage: stage.into() }
    }

    #[must_use]
    pub fn multiple_choice(text: impl Into<String>, options: Vec<QuestionOption>, stage: impl Into<String>) -> Self {
        Self { text: text.into(), question_type: QuestionType::MultipleChoice, options, default: None, timeout_seconds: None, stage: stage.into() }
    }

    #[must_use]
    pub fn freeform(text: impl Into<String>, stage: impl Into<String>) -> Self {
        Self { text: text.into(), question_type: QuestionType::Freeform, options: Vec::new(), default: None, timeout_seconds: None, stage: stage.into() }
    }

    #[must_use]
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    #[must_use]
    pub fn with_default(mut self, answer: Answer) -> Self {
        self.default = Some(answer);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerValue {
    Yes,
    No,
    Skipped,
    Timeout,
    Selected(String),
    Text(String),
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yes => f.write_str("YES"),
            Self::No => f.write_str("NO"),
            Self::Skipped => f.write_str("SKIPPED"),
            Self::Timeout => f.write_str("TIMEOUT"),
            Self::Selected(key) => write!(f, "SELECTED({key})"),
            Self::Text(text) => write!(f, "TEXT({text})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub value: AnswerValue,
    pub selected_option: Option<QuestionOption>,
}

impl Answer {
    #[must_use]
    pub fn new(value: AnswerValue) -> Self {
        Self { value, selected_option: None }
    }

    #[must_use]
    pub fn with_option(value: AnswerValue, option: QuestionOption) -> Self {
        Self { value, selected_option: Some(option) }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.value == AnswerValue::Timeout
    }

    #[must_use]
    pub fn is_skipped(&self) -> bool {
        self.value == AnswerValue::Skipped
    }
}

/// Capability for presenting questions to a human and getting answers
/// back, implemented by everything from a console prompt to a
/// pre-recorded queue used in tests.
#[async_trait]
pub trait Interviewer: Send + Sync {
    async fn ask(&self, question: &Question) -> Answer;

    /// Default implementation asks each question in turn and collects the
    /// answers in order.
    async fn ask_multiple(&self, questions: &[Question]) -> Vec<Answer> {
        let mut answers = Vec::with_capacity(questions.len());
        for question in questions {
            answers.push(self.ask(question).await);
        }
        answers
    }

    /// Send a one-way informational message. Default is a no-op.
    async fn inform(&self, _message: &str, _stage: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_timeout_and_skipped_predicates() {
        assert!(Answer::new(AnswerValue::Timeout).is_timeout());
        assert!(Answer::new(AnswerValue::Skipped).is_skipped());
        assert!(!Answer::new(AnswerValue::Yes).is_timeout());
    }
}
