use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AnswerId, QuestionId, SessionId, UserId};
use crate::error::{CoreError, Result};

/// An answer submission as received from a client, before it is recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewAnswer {
    pub user_id: UserId,
    pub question_id: QuestionId,
    pub session_id: Option<SessionId>,
    pub selected_answer: String,
    pub is_correct: bool,
    pub time_spent_seconds: f64,
}

impl NewAnswer {
    pub fn validate(&self) -> Result<()> {
        if !self.time_spent_seconds.is_finite() || self.time_spent_seconds < 0.0 {
            return Err(CoreError::Validation(format!(
                "time spent must be a non-negative number of seconds, got {}",
                self.time_spent_seconds
            )));
        }
        Ok(())
    }

    /// Stamps the submission with an id and time, producing the immutable event.
    pub fn into_event(self, answered_at: DateTime<Utc>) -> AnswerEvent {
        AnswerEvent {
            id: AnswerId::new(),
            user_id: self.user_id,
            question_id: self.question_id,
            session_id: self.session_id,
            selected_answer: self.selected_answer,
            is_correct: self.is_correct,
            time_spent_seconds: self.time_spent_seconds,
            answered_at,
        }
    }
}

/// A recorded answer. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerEvent {
    pub id: AnswerId,
    pub user_id: UserId,
    pub question_id: QuestionId,
    pub session_id: Option<SessionId>,
    pub selected_answer: String,
    pub is_correct: bool,
    pub time_spent_seconds: f64,
    pub answered_at: DateTime<Utc>,
}
