//! Shared harness: a migrated SQLite-backed data layer on a manual clock.
#![allow(dead_code)]

use examforge_core::{
    ConnectionParams, ConnectionSettings, Difficulty, Environment, ExamId, ManualClock, NewAnswer,
    ObjectiveId, QuestionId, QuestionRecord, RegionConfig, SessionId, UserId,
};
use examforge_storage::{DataLayer, DataLayerConfig, EdgeKvSettings, NewQuestion};
use std::sync::Arc;
use tempfile::TempDir;

pub const REGIONS: [(&str, &str, bool); 3] = [
    ("iad", "Virginia", true),
    ("lhr", "London", false),
    ("nrt", "Tokyo", false),
];

pub struct TestLayer {
    pub layer: Arc<DataLayer>,
    pub clock: Arc<ManualClock>,
    _dir: TempDir,
}

impl std::ops::Deref for TestLayer {
    type Target = DataLayer;

    fn deref(&self) -> &DataLayer {
        &self.layer
    }
}

pub fn settings(dir: &TempDir) -> ConnectionSettings {
    let endpoint = format!("sqlite://{}", dir.path().join("examforge.db").display());
    let mut settings = ConnectionSettings::new(
        REGIONS
            .iter()
            .map(|(id, name, primary)| RegionConfig::new(*id, *name, *primary))
            .collect(),
    );
    // Every replica reads the same file, so replication is instant.
    for (id, _, _) in REGIONS {
        settings = settings.with_connection(
            Environment::Test,
            id,
            ConnectionParams::new(endpoint.clone()).with_auth_token("test-token"),
        );
    }
    settings
}

pub fn config(dir: &TempDir) -> DataLayerConfig {
    let mut config = DataLayerConfig::new(Environment::Test, settings(dir));
    config.edge_kv = EdgeKvSettings::Memory;
    config
}

pub async fn layer() -> TestLayer {
    let dir = tempfile::tempdir().expect("tempdir");
    let clock = ManualClock::starting_now();
    let layer = DataLayer::builder(config(&dir))
        .clock(clock.clone())
        .build()
        .expect("data layer");
    layer.migrate().await.expect("migrations");

    TestLayer {
        layer: Arc::new(layer),
        clock,
        _dir: dir,
    }
}

pub fn new_question(exam: ExamId, difficulty: u8, objective: Option<ObjectiveId>) -> NewQuestion {
    NewQuestion {
        exam_id: exam,
        objective_id: objective,
        stem: format!("Question at difficulty {difficulty}"),
        choices: vec!["a".into(), "b".into(), "c".into(), "d".into()],
        correct_answer: "a".to_string(),
        explanation: Some("Because a.".to_string()),
        difficulty: Difficulty::new(difficulty).expect("difficulty"),
        is_approved: true,
    }
}

pub async fn seed_question(layer: &DataLayer, exam: ExamId, difficulty: u8) -> QuestionRecord {
    layer
        .engine()
        .add_question(new_question(exam, difficulty, None))
        .await
        .expect("seed question")
}

/// Overwrites a question's counters directly on the primary.
pub async fn set_counters(layer: &DataLayer, question: QuestionId, total: i64, correct: i64) {
    let handle = layer
        .pool()
        .acquire(Environment::Test, None)
        .await
        .expect("primary handle");
    sqlx::query("UPDATE questions SET total_attempts = ?, correct_attempts = ? WHERE id = ?")
        .bind(total)
        .bind(correct)
        .bind(question.to_string())
        .execute(handle.db())
        .await
        .expect("set counters");
}

pub fn answer(user: UserId, question: QuestionId, correct: bool, seconds: f64) -> NewAnswer {
    NewAnswer {
        user_id: user,
        question_id: question,
        session_id: None,
        selected_answer: if correct { "a" } else { "b" }.to_string(),
        is_correct: correct,
        time_spent_seconds: seconds,
    }
}

pub fn session_answer(
    user: UserId,
    question: QuestionId,
    session: SessionId,
    correct: bool,
    seconds: f64,
) -> NewAnswer {
    NewAnswer {
        session_id: Some(session),
        ..answer(user, question, correct, seconds)
    }
}

pub async fn count_rows(layer: &DataLayer, sql: &str) -> i64 {
    let handle = layer
        .pool()
        .acquire(Environment::Test, None)
        .await
        .expect("primary handle");
    sqlx::query_scalar(sql)
        .fetch_one(handle.db())
        .await
        .expect("count")
}
