use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::context::{ClientContext, ReadOptions};
use super::ids::{ExamId, ObjectiveId, QuestionId};
use crate::error::{CoreError, Result};

/// Question difficulty on a bounded ordinal scale.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub struct Difficulty(u8);

impl Difficulty {
    pub const MIN: Difficulty = Difficulty(1);
    pub const MAX: Difficulty = Difficulty(5);

    pub fn new(value: u8) -> Result<Self> {
        if (Self::MIN.0..=Self::MAX.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(CoreError::Validation(format!(
                "difficulty {} outside {}..={}",
                value,
                Self::MIN.0,
                Self::MAX.0
            )))
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Difficulty {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Difficulty> for u8 {
    fn from(d: Difficulty) -> Self {
        d.0
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionRecord {
    pub id: QuestionId,
    pub exam_id: ExamId,
    pub objective_id: Option<ObjectiveId>,
    pub stem: String,
    pub choices: Vec<String>,
    pub correct_answer: String,
    pub explanation: Option<String>,
    pub difficulty: Difficulty,
    pub is_active: bool,
    pub is_approved: bool,
    /// Running counters; only ever changed through relative increments.
    pub total_attempts: i64,
    pub correct_attempts: i64,
    pub avg_time_seconds: f64,
    pub created_at: DateTime<Utc>,
}

impl QuestionRecord {
    /// Historical success ratio, `None` when the question was never attempted.
    pub fn success_ratio(&self) -> Option<f64> {
        if self.total_attempts > 0 {
            Some(self.correct_attempts as f64 / self.total_attempts as f64)
        } else {
            None
        }
    }
}

/// Ordering strategy for study question selection.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StudyMode {
    /// Fully random order.
    #[default]
    Practice,
    /// Lowest historical success ratio first.
    WeakArea,
    /// Easiest first.
    SpeedDrill,
}

impl StudyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StudyMode::Practice => "practice",
            StudyMode::WeakArea => "weak_area",
            StudyMode::SpeedDrill => "speed_drill",
        }
    }
}

/// Filters for `get_study_questions`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StudyFilters {
    pub mode: StudyMode,
    pub difficulty_min: u8,
    pub difficulty_max: u8,
    pub objective_ids: Vec<ObjectiveId>,
    pub limit: u32,
    /// Questions answered by the user within this many hours are withheld.
    pub exclusion_window_hours: u32,
    #[serde(default)]
    pub client: ClientContext,
    #[serde(default)]
    pub read: ReadOptions,
}

impl Default for StudyFilters {
    fn default() -> Self {
        Self {
            mode: StudyMode::Practice,
            difficulty_min: Difficulty::MIN.value(),
            difficulty_max: Difficulty::MAX.value(),
            objective_ids: Vec::new(),
            limit: 20,
            exclusion_window_hours: 24,
            client: ClientContext::default(),
            read: ReadOptions::default(),
        }
    }
}

impl StudyFilters {
    pub const MAX_LIMIT: u32 = 200;
    /// One year.
    pub const MAX_EXCLUSION_WINDOW_HOURS: u32 = 8_760;

    pub fn with_mode(mut self, mode: StudyMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_difficulty(mut self, min: u8, max: u8) -> Self {
        self.difficulty_min = min;
        self.difficulty_max = max;
        self
    }

    pub fn with_objectives(mut self, objectives: Vec<ObjectiveId>) -> Self {
        self.objective_ids = objectives;
        self
    }

    pub fn with_exclusion_window_hours(mut self, hours: u32) -> Self {
        self.exclusion_window_hours = hours;
        self
    }

    pub fn with_client(mut self, client: ClientContext) -> Self {
        self.client = client;
        self
    }

    pub fn with_read(mut self, read: ReadOptions) -> Self {
        self.read = read;
        self
    }

    /// Checks the difficulty range, limit and exclusion window, returning the
    /// validated difficulty bounds.
    pub fn validate(&self) -> Result<(Difficulty, Difficulty)> {
        let min = Difficulty::new(self.difficulty_min)?;
        let max = Difficulty::new(self.difficulty_max)?;
        if min > max {
            return Err(CoreError::Validation(format!(
                "difficulty range {}..={} is empty",
                min, max
            )));
        }
        if self.limit == 0 || self.limit > Self::MAX_LIMIT {
            return Err(CoreError::Validation(format!(
                "limit {} outside 1..={}",
                self.limit,
                Self::MAX_LIMIT
            )));
        }
        if self.exclusion_window_hours > Self::MAX_EXCLUSION_WINDOW_HOURS {
            return Err(CoreError::Validation(format!(
                "exclusion window {}h outside 0..={}h",
                self.exclusion_window_hours,
                Self::MAX_EXCLUSION_WINDOW_HOURS
            )));
        }
        Ok((min, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn record(total: i64, correct: i64) -> QuestionRecord {
        QuestionRecord {
            id: QuestionId::new(),
            exam_id: ExamId::new(),
            objective_id: None,
            stem: "What is ownership?".to_string(),
            choices: vec!["a".into(), "b".into()],
            correct_answer: "a".to_string(),
            explanation: None,
            difficulty: Difficulty::new(3).unwrap(),
            is_active: true,
            is_approved: true,
            total_attempts: total,
            correct_attempts: correct,
            avg_time_seconds: 0.0,
            created_at: Utc::now(),
        }
    }

    #[rstest]
    #[case(0, false)]
    #[case(1, true)]
    #[case(5, true)]
    #[case(6, false)]
    fn test_difficulty_bounds(#[case] value: u8, #[case] ok: bool) {
        assert_eq!(Difficulty::new(value).is_ok(), ok);
    }

    #[test]
    fn test_difficulty_deserialization_is_validated() {
        assert!(serde_json::from_str::<Difficulty>("4").is_ok());
        assert!(serde_json::from_str::<Difficulty>("9").is_err());
    }

    #[test]
    fn test_success_ratio() {
        assert_eq!(record(0, 0).success_ratio(), None);
        assert_eq!(record(10, 3).success_ratio(), Some(0.3));
    }

    #[test]
    fn test_filters_validation() {
        assert!(StudyFilters::default().validate().is_ok());
        assert!(StudyFilters::default().with_difficulty(4, 2).validate().is_err());
        assert!(StudyFilters::default().with_difficulty(0, 2).validate().is_err());
        assert!(StudyFilters::default().with_limit(0).validate().is_err());
        assert!(StudyFilters::default().with_limit(201).validate().is_err());
    }

    #[rstest]
    #[case(0, true)]
    #[case(24, true)]
    #[case(StudyFilters::MAX_EXCLUSION_WINDOW_HOURS, true)]
    #[case(StudyFilters::MAX_EXCLUSION_WINDOW_HOURS + 1, false)]
    #[case(u32::MAX, false)]
    fn test_exclusion_window_bounds(#[case] hours: u32, #[case] ok: bool) {
        let result = StudyFilters::default().with_exclusion_window_hours(hours).validate();
        assert_eq!(result.is_ok(), ok);
        if !ok {
            assert!(matches!(result, Err(CoreError::Validation(_))));
        }
    }

    #[test]
    fn test_study_mode_serde_names() {
        assert_eq!(
            serde_json::to_string(&StudyMode::WeakArea).unwrap(),
            "\"weak_area\""
        );
        assert_eq!(StudyMode::SpeedDrill.as_str(), "speed_drill");
    }
}
