//! Multi-turn question answering over the federation.
//!
//! A [`ChatSession`] keeps the last few question/answer pairs. Retrieval
//! sees the recent exchange followed by the current question, so follow-ups
//! like "and in winter?" still find the right passages; the answer itself is
//! generated from the plain question.

use anyhow::Result;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

use crate::answer::{Answer, AnswerStyle};
use crate::federation::IndexFederation;

/// Turns of history folded into the retrieval query.
pub const MAX_HISTORY_TURNS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

pub struct ChatSession {
    federation: Arc<IndexFederation>,
    style: AnswerStyle,
    history: VecDeque<Turn>,
}

impl ChatSession {
    pub fn new(federation: Arc<IndexFederation>, style: AnswerStyle) -> Self {
        Self {
            federation,
            style,
            history: VecDeque::with_capacity(MAX_HISTORY_TURNS + 1),
        }
    }

    pub fn style(&self) -> AnswerStyle {
        self.style
    }

    pub fn set_style(&mut self, style: AnswerStyle) {
        self.style = style;
    }

    /// Remembered turns, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Turn> {
        self.history.iter()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// The text sent to retrieval for `question`.
    pub fn retrieval_query(&self, question: &str) -> String {
        if self.history.is_empty() {
            return question.to_string();
        }
        let transcript: Vec<String> = self
            .history
            .iter()
            .map(|t| format!("User: {}\nAssistant: {}", t.question, t.answer))
            .collect();
        format!("{}\n\nCurrent question: {}", transcript.join("\n"), question)
    }

    /// Answer `question` and remember the exchange.
    pub async fn ask(&mut self, question: &str, top_k: usize) -> Result<Answer> {
        let retrieval_query = self.retrieval_query(question);
        debug!(turns = self.history.len(), "chat retrieval query built");
        let answer = self
            .federation
            .ask_with_retrieval(question, &retrieval_query, top_k, self.style)
            .await?;
        self.remember(question, &answer.answer);
        Ok(answer)
    }

    fn remember(&mut self, question: &str, answer: &str) {
        self.history.push_back(Turn {
            question: question.to_string(),
            answer: answer.to_string(),
        });
        while self.history.len() > MAX_HISTORY_TURNS {
            self.history.pop_front();
        }
    }
}
