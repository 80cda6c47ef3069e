//! Always answers favorably — for automated runs with no human attached.

use async_trait::async_trait;

use crate::interviewer::{Answer, AnswerValue, Interviewer, Question, QuestionType};

/// Selects YES for yes/no and confirmation questions, the first option for
/// multiple choice, and `"auto-approved"` for freeform.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApproveInterviewer;

#[async_trait]
impl Interviewer for AutoApproveInterviewer {
    async fn ask(&self, question: &Question) -> Answer {
        match question.question_type {
            QuestionType::YesNo | QuestionType::Confirmation => Answer::new(AnswerValue::Yes),
            QuestionType::MultipleChoice => question.options.first().map_or_else(
                || Answer::new(AnswerValue::Text("auto-approved".into())),
                |first| Answer::with_option(AnswerValue::Selected(first.key.clone()), first.clone()),
            ),
            QuestionType::Freeform => Answer::new(AnswerValue::Text("auto-approved".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interviewer::QuestionOption;

    #[tokio::test]
    async fn picks_yes_for_yes_no() {
        let interviewer = AutoApproveInterviewer;
        let answer = interviewer.ask(&Question::yes_no("continue?", "stage-1")).await;
        assert_eq!(answer.value, AnswerValue::Yes);
    }

    #[tokio::test]
    async fn picks_first_option_for_multiple_choice() {
        let options = vec![
            QuestionOption { key: "a".into(), label: "Option A".into(), target: "node-a".into() },
            QuestionOption { key: "b".into(), label: "Option B".into(), target: "node-b".into() },
        ];
        let interviewer = AutoApproveInterviewer;
        let answer = interviewer.ask(&Question::multiple_choice("pick one", options, "stage-1")).await;
        assert_eq!(answer.value, AnswerValue::Selected("a".into()));
    }
}
