use std::time::Duration;

use chatgpt::config::ChatGPTEngine;
use chatgpt::prelude::*;
use chatgpt::types::CompletionResponse;
use log::debug;

use crate::quiz::Question;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Explains wrong answers for questions that ship without a rationale.
pub struct QuizHelper {
    chat_gpt: ChatGPT,
}

impl QuizHelper {
    pub fn new(chat_gpt: ChatGPT) -> Self {
        Self { chat_gpt }
    }

    pub fn connect(api_key: impl Into<String>) -> Result<Self> {
        let mut gpt = ChatGPT::new(api_key)?;
        gpt.config.engine = ChatGPTEngine::Gpt35Turbo;
        gpt.config.timeout = REQUEST_TIMEOUT;
        Ok(Self::new(gpt))
    }

    pub async fn explain_wrong_answer(&self, question: &Question, chosen: usize) -> Result<String> {
        debug!("Explaining wrong answer {} to {}", chosen, question.id);
        let prompt = wrong_answer_prompt(question, chosen).ok_or(
            chatgpt::err::Error::BackendError {
                message: "No correct answer found".to_string(),
                error_type: "QuizError".to_string(),
            },
        )?;

        let response: CompletionResponse = self.chat_gpt.send_message(&prompt).await?;
        let content = response.message().clone().content;

        debug!("Completion: {:?}", content);

        Ok(content)
    }
}

fn wrong_answer_prompt(question: &Question, chosen: usize) -> Option<String> {
    let (_, correct) = question.correct_choice()?;
    let chosen = question.choices.get(chosen)?;
    Some(format!(
        "You are a friendly tutor helping a student prepare for the {} section of a standardized test.
        The student answered this question:
        {}
        Options: {}.
        The student picked \"{}\", but the correct answer is \"{}\".
        Explain the mistake and why the correct answer works. Keep it to two or three sentences, plain text only.",
        question.subject,
        question.stem,
        question.choices.join("; "),
        chosen,
        correct
    ))
}
