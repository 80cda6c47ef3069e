//! Wraps another interviewer and records every question/answer pair, for
//! replay and audit trails.

use tokio::sync::Mutex;

use crate::interviewer::{Answer, Interviewer, Question};
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct Recording {
    pub question_text: String,
    pub answer: Answer,
}

pub struct RecordingInterviewer {
    inner: Box<dyn Interviewer>,
    recordings: Mutex<Vec<Recording>>,
}

impl std::fmt::Debug for RecordingInterviewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.recordings.try_lock().map(|r| r.len()).unwrap_or(0);
        f.debug_struct("RecordingInterviewer").field("recording_count", &count).finish_non_exhaustive()
    }
}

impl RecordingInterviewer {
    pub fn new(inner: impl Interviewer + 'static) -> Self {
        Self { inner: Box::new(inner), recordings: Mutex::new(Vec::new()) }
    }

    pub async fn recordings(&self) -> Vec<Recording> {
        self.recordings.lock().await.clone()
    }
}

#[async_trait]
impl Interviewer for RecordingInterviewer {
    async fn ask(&self, question: &Question) -> Answer {
        let answer = self.inner.ask(question).await;
        self.recordings.lock().await.push(Recording { question_text: question.text.clone(), answer: answer.clone() });
        answer
    }
}
