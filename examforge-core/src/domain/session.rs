use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ids::{ExamId, ObjectiveId, SessionId, UserId};

/// Per-objective slice of a session's results.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ObjectiveScore {
    pub attempted: i64,
    pub correct: i64,
    /// Percentage of correct answers, 0-100.
    pub score: f64,
}

/// Aggregated totals for one study session.
///
/// Always recomputed from the session's full answer set, never patched
/// incrementally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionProgress {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub exam_id: ExamId,
    pub questions_seen: i64,
    pub correct_answers: i64,
    pub time_spent_seconds: f64,
    pub objective_scores: BTreeMap<ObjectiveId, ObjectiveScore>,
    pub updated_at: DateTime<Utc>,
}

/// One answer's contribution to a session aggregate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnswerTally {
    pub objective_id: Option<ObjectiveId>,
    pub is_correct: bool,
    pub time_spent_seconds: f64,
}

impl SessionProgress {
    pub fn recompute(
        session_id: SessionId,
        user_id: UserId,
        exam_id: ExamId,
        answers: &[AnswerTally],
        now: DateTime<Utc>,
    ) -> Self {
        let mut objective_scores: BTreeMap<ObjectiveId, ObjectiveScore> = BTreeMap::new();
        let mut correct_answers = 0;
        let mut time_spent_seconds = 0.0;

        for answer in answers {
            if answer.is_correct {
                correct_answers += 1;
            }
            time_spent_seconds += answer.time_spent_seconds;

            if let Some(objective) = answer.objective_id {
                let entry = objective_scores.entry(objective).or_default();
                entry.attempted += 1;
                if answer.is_correct {
                    entry.correct += 1;
                }
            }
        }

        for score in objective_scores.values_mut() {
            score.score = if score.attempted > 0 {
                score.correct as f64 / score.attempted as f64 * 100.0
            } else {
                0.0
            };
        }

        Self {
            session_id,
            user_id,
            exam_id,
            questions_seen: answers.len() as i64,
            correct_answers,
            time_spent_seconds,
            objective_scores,
            updated_at: now,
        }
    }

    pub fn accuracy(&self) -> f64 {
        if self.questions_seen == 0 {
            0.0
        } else {
            self.correct_answers as f64 / self.questions_seen as f64
        }
    }
}

/// A row of an exam leaderboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub user_id: UserId,
    pub answered: i64,
    pub correct: i64,
    pub accuracy: f64,
    pub time_spent_seconds: f64,
}
