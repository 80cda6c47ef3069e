//! Replays a pre-recorded answer list — deterministic stand-in for a human
//! in scenario tests.

use tokio::sync::Mutex;

use crate::interviewer::{Answer, AnswerValue, Interviewer, Question};
use async_trait::async_trait;

/// Dequeues pre-filled answers in FIFO order; returns `SKIPPED` once
/// exhausted.
pub struct QueueInterviewer {
    answers: Mutex<Vec<Answer>>,
}

impl std::fmt::Debug for QueueInterviewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.answers.try_lock().map(|q| q.len()).unwrap_or(0);
        f.debug_struct("QueueInterviewer").field("remaining", &len).finish()
    }
}

impl QueueInterviewer {
    #[must_use]
    pub fn new(answers: Vec<Answer>) -> Self {
        let mut reversed = answers;
        reversed.reverse();
        Self { answers: Mutex::new(reversed) }
    }

    pub async fn remaining(&self) -> usize {
        self.answers.lock().await.len()
    }
}

#[async_trait]
impl Interviewer for QueueInterviewer {
    async fn ask(&self, _question: &Question) -> Answer {
        self.answers.lock().await.pop().unwrap_or_else(|| Answer::new(AnswerValue::Skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dequeues_in_fifo_order_then_skips() {
        let interviewer = QueueInterviewer::new(vec![Answer::new(AnswerValue::Yes), Answer::new(AnswerValue::No)]);
        assert_eq!(interviewer.ask(&Question::yes_no("a", "s")).await.value, AnswerValue::Yes);
        assert_eq!(interviewer.ask(&Question::yes_no("b", "s")).await.value, AnswerValue::No);
        assert_eq!(interviewer.ask(&Question::yes_no("c", "s")).await.value, AnswerValue::Skipped);
    }

    #[tokio::test]
    async fn remaining_counts_down() {
        let interviewer = QueueInterviewer::new(vec![Answer::new(AnswerValue::Yes)]);
        assert_eq!(interviewer.remaining().await, 1);
        interviewer.ask(&Question::yes_no("a", "s")).await;
        assert_eq!(interviewer.remaining().await, 0);
    }
}
