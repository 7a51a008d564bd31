//! Conversation sessions
//!
//! A session is an explicit value owned by the caller: it records question
//! and answer turns for display and export. History is not sent to the
//! model; every question is answered on its own.

use crate::composer::AnswerOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One question and its answer, if one could be produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub user: String,
    pub assistant: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub turns: Vec<Turn>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            turns: Vec::new(),
        }
    }

    pub fn record_turn(&mut self, user: impl Into<String>, assistant: Option<String>) {
        self.turns.push(Turn { user: user.into(), assistant });
    }

    /// Record a question with the outcome of answering it
    pub fn record(&mut self, user: impl Into<String>, outcome: &AnswerOutcome) {
        self.record_turn(user, outcome.text().map(str::to_string));
    }

    /// `(question, answer)` pairs in order
    pub fn pairs(&self) -> Vec<(&str, Option<&str>)> {
        self.turns
            .iter()
            .map(|t| (t.user.as_str(), t.assistant.as_deref()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Plain-text export, `"User: {q}\nChatbot: {a}\n\n"` per turn.
    ///
    /// Turns without an answer show `unavailable` in the answer position.
    pub fn transcript(&self, unavailable: &str) -> String {
        self.turns
            .iter()
            .map(|t| {
                format!(
                    "User: {}\nChatbot: {}\n\n",
                    t.user,
                    t.assistant.as_deref().unwrap_or(unavailable)
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::ComposedAnswer;
    use crate::errors::{ErrorCode, FailureReason};

    #[test]
    fn test_transcript_format() {
        let mut session = Session::new();
        session.record_turn("What is Rust?", Some("A language.".to_string()));
        session.record_turn("Who made it?", None);

        assert_eq!(
            session.transcript("(no answer)"),
            "User: What is Rust?\nChatbot: A language.\n\nUser: Who made it?\nChatbot: (no answer)\n\n"
        );
    }

    #[test]
    fn test_record_outcomes() {
        let mut session = Session::new();
        let answered = AnswerOutcome::Answered(ComposedAnswer {
            text: "yes".into(),
            reply: "yes".into(),
            citations: vec![],
        });
        let failed = AnswerOutcome::Unavailable(FailureReason {
            code: ErrorCode::CompletionError,
            message: "down".into(),
        });

        session.record("q1", &answered);
        session.record("q2", &failed);

        assert_eq!(session.pairs(), vec![("q1", Some("yes")), ("q2", None)]);
    }

    #[test]
    fn test_sessions_are_independent() {
        let mut a = Session::new();
        let b = Session::new();
        a.record_turn("q", None);

        assert_ne!(a.id, b.id);
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 0);
    }
}
