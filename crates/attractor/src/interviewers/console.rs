//! Prompts on stdout and reads an answer from stdin — the interviewer a
//! human actually drives interactively.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::interviewer::{Answer, AnswerValue, Interviewer, Question, QuestionType};

/// Formats a question's options with their accelerator keys, reads a line
/// of input, and maps it to an answer. Generic over the writer so tests can
/// inject an in-memory buffer instead of real stdout.
pub struct ConsoleInterviewer<W = tokio::io::Stdout> {
    writer: Mutex<W>,
}

impl ConsoleInterviewer<tokio::io::Stdout> {
    #[must_use]
    pub fn new() -> Self {
        Self { writer: Mutex::new(tokio::io::stdout()) }
    }
}

impl Default for ConsoleInterviewer<tokio::io::Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> ConsoleInterviewer<W> {
    #[must_use]
    pub fn with_writer(writer: W) -> Self {
        Self { writer: Mutex::new(writer) }
    }
}

fn format_prompt(question: &Question) -> String {
    let mut prompt = format!("{}\n", question.text);
    match question.question_type {
        QuestionType::YesNo => prompt.push_str("[y/n] "),
        QuestionType::Confirmation => prompt.push_str("[confirm? y/n] "),
        QuestionType::Freeform => prompt.push_str("> "),
        QuestionType::MultipleChoice => {
            for option in &question.options {
                prompt.push_str(&format!("  [{}] {}\n", option.key, option.label));
            }
            prompt.push_str("> ");
        }
    }
    prompt
}

fn parse_answer(question: &Question, line: &str) -> Answer {
    let line = line.trim();
    match question.question_type {
        QuestionType::YesNo | QuestionType::Confirmation => {
            if line.eq_ignore_ascii_case("y") || line.eq_ignore_ascii_case("yes") {
                Answer::new(AnswerValue::Yes)
            } else {
                Answer::new(AnswerValue::No)
            }
        }
        QuestionType::Freeform => Answer::new(AnswerValue::Text(line.to_string())),
        QuestionType::MultipleChoice => question
            .options
            .iter()
            .find(|o| o.key.eq_ignore_ascii_case(line) || o.label.eq_ignore_ascii_case(line))
            .map_or_else(|| Answer::new(AnswerValue::Text(line.to_string())), |o| Answer::with_option(AnswerValue::Selected(o.key.clone()), o.clone())),
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Interviewer for ConsoleInterviewer<W> {
    async fn ask(&self, question: &Question) -> Answer {
        let prompt = format_prompt(question);
        {
            let mut writer = self.writer.lock().await;
            if writer.write_all(prompt.as_bytes()).await.is_err() || writer.flush().await.is_err() {
                return Answer::new(AnswerValue::Skipped);
            }
        }

        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        match stdin.read_line(&mut line).await {
            Ok(0) | Err(_) => Answer::new(AnswerValue::Skipped),
            Ok(_) => parse_answer(question, &line),
        }
    }
}
