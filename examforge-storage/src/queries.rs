//! SQL for the study store.
//!
//! Ids are bound as hyphenated UUID text and timestamps as unix
//! milliseconds. Counter changes are always relative increments.

use chrono::{DateTime, Utc};
use examforge_core::{
    from_epoch_millis, to_epoch_millis, AnswerEvent, AnswerTally, CoreError, Difficulty, ExamId,
    LeaderboardEntry, ObjectiveId, QuestionId, QuestionRecord, SessionId, SessionProgress,
    StudyFilters, StudyMode, UserId,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::{Result, StorageError};

const QUESTION_COLUMNS: &str = "q.id, q.exam_id, q.objective_id, q.stem, q.choices, \
     q.correct_answer, q.explanation, q.difficulty, q.is_active, q.is_approved, \
     q.total_attempts, q.correct_attempts, q.avg_time_seconds, q.created_at_ms";

const ANSWER_COLUMNS: &str = "id, user_id, question_id, session_id, selected_answer, \
     is_correct, time_spent_seconds, answered_at_ms";

fn parse_id<T>(value: &str) -> Result<T>
where
    T: FromStr<Err = CoreError>,
{
    value.parse().map_err(StorageError::from)
}

fn question_from_row(row: &SqliteRow) -> Result<QuestionRecord> {
    let objective_id: Option<String> = row.try_get("objective_id")?;
    let choices: String = row.try_get("choices")?;
    let difficulty: i64 = row.try_get("difficulty")?;
    let difficulty = u8::try_from(difficulty)
        .map_err(|_| StorageError::Serialization(format!("difficulty {difficulty} out of range")))?;

    Ok(QuestionRecord {
        id: parse_id(&row.try_get::<String, _>("id")?)?,
        exam_id: parse_id(&row.try_get::<String, _>("exam_id")?)?,
        objective_id: objective_id.as_deref().map(parse_id).transpose()?,
        stem: row.try_get("stem")?,
        choices: serde_json::from_str(&choices)?,
        correct_answer: row.try_get("correct_answer")?,
        explanation: row.try_get("explanation")?,
        difficulty: Difficulty::new(difficulty)?,
        is_active: row.try_get("is_active")?,
        is_approved: row.try_get("is_approved")?,
        total_attempts: row.try_get("total_attempts")?,
        correct_attempts: row.try_get("correct_attempts")?,
        avg_time_seconds: row.try_get("avg_time_seconds")?,
        created_at: from_epoch_millis(row.try_get("created_at_ms")?),
    })
}

fn answer_from_row(row: &SqliteRow) -> Result<AnswerEvent> {
    let session_id: Option<String> = row.try_get("session_id")?;
    Ok(AnswerEvent {
        id: parse_id(&row.try_get::<String, _>("id")?)?,
        user_id: parse_id(&row.try_get::<String, _>("user_id")?)?,
        question_id: parse_id(&row.try_get::<String, _>("question_id")?)?,
        session_id: session_id.as_deref().map(parse_id).transpose()?,
        selected_answer: row.try_get("selected_answer")?,
        is_correct: row.try_get("is_correct")?,
        time_spent_seconds: row.try_get("time_spent_seconds")?,
        answered_at: from_epoch_millis(row.try_get("answered_at_ms")?),
    })
}

fn session_from_row(row: &SqliteRow) -> Result<SessionProgress> {
    let scores: String = row.try_get("objective_scores")?;
    Ok(SessionProgress {
        session_id: parse_id(&row.try_get::<String, _>("id")?)?,
        user_id: parse_id(&row.try_get::<String, _>("user_id")?)?,
        exam_id: parse_id(&row.try_get::<String, _>("exam_id")?)?,
        questions_seen: row.try_get("questions_seen")?,
        correct_answers: row.try_get("correct_answers")?,
        time_spent_seconds: row.try_get("time_spent_seconds")?,
        objective_scores: serde_json::from_str(&scores)?,
        updated_at: from_epoch_millis(row.try_get("updated_at_ms")?),
    })
}

/// Candidate questions for a study set.
///
/// Questions the user answered after `cutoff` are left out with an
/// existence check so the `(user_id, question_id, answered_at_ms)` index
/// does the work.
pub(crate) async fn select_study_questions(
    db: &SqlitePool,
    user: UserId,
    exam: ExamId,
    filters: &StudyFilters,
    difficulty: (Difficulty, Difficulty),
    cutoff: DateTime<Utc>,
) -> Result<Vec<QuestionRecord>> {
    let mut query = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {QUESTION_COLUMNS} FROM questions q WHERE q.exam_id = "
    ));
    query.push_bind(exam.to_string());
    query.push(" AND q.is_active = 1 AND q.is_approved = 1 AND q.difficulty BETWEEN ");
    query.push_bind(i64::from(difficulty.0.value()));
    query.push(" AND ");
    query.push_bind(i64::from(difficulty.1.value()));

    if !filters.objective_ids.is_empty() {
        query.push(" AND q.objective_id IN (");
        let mut objectives = query.separated(", ");
        for objective in &filters.objective_ids {
            objectives.push_bind(objective.to_string());
        }
        objectives.push_unseparated(")");
    }

    query.push(
        " AND NOT EXISTS (SELECT 1 FROM answer_events ae \
         WHERE ae.question_id = q.id AND ae.user_id = ",
    );
    query.push_bind(user.to_string());
    query.push(" AND ae.answered_at_ms > ");
    query.push_bind(to_epoch_millis(cutoff));
    query.push(")");

    query.push(match filters.mode {
        // Unattempted questions rank as a neutral 0.5 success ratio.
        StudyMode::WeakArea => {
            " ORDER BY CASE WHEN q.total_attempts = 0 THEN 0.5 \
             ELSE CAST(q.correct_attempts AS REAL) / q.total_attempts END ASC, \
             q.total_attempts DESC, random()"
        }
        StudyMode::SpeedDrill => " ORDER BY q.difficulty ASC, random()",
        StudyMode::Practice => " ORDER BY random()",
    });
    query.push(" LIMIT ");
    query.push_bind(i64::from(filters.limit));

    let rows = query.build().fetch_all(db).await?;
    rows.iter().map(question_from_row).collect()
}

pub(crate) async fn get_question(db: &SqlitePool, id: QuestionId) -> Result<Option<QuestionRecord>> {
    let row = sqlx::query(&format!("SELECT {QUESTION_COLUMNS} FROM questions q WHERE q.id = ?"))
        .bind(id.to_string())
        .fetch_optional(db)
        .await?;
    row.as_ref().map(question_from_row).transpose()
}

pub(crate) async fn insert_question(db: &SqlitePool, question: &QuestionRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO questions (
            id, exam_id, objective_id, stem, choices, correct_answer, explanation,
            difficulty, is_active, is_approved, total_attempts, correct_attempts,
            avg_time_seconds, created_at_ms
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(question.id.to_string())
    .bind(question.exam_id.to_string())
    .bind(question.objective_id.map(|o| o.to_string()))
    .bind(&question.stem)
    .bind(serde_json::to_string(&question.choices)?)
    .bind(&question.correct_answer)
    .bind(&question.explanation)
    .bind(i64::from(question.difficulty.value()))
    .bind(question.is_active)
    .bind(question.is_approved)
    .bind(question.total_attempts)
    .bind(question.correct_attempts)
    .bind(question.avg_time_seconds)
    .bind(to_epoch_millis(question.created_at))
    .execute(db)
    .await?;
    Ok(())
}

/// Records one answer and bumps the question's counters in one transaction.
pub(crate) async fn insert_answer(db: &SqlitePool, event: &AnswerEvent) -> Result<AnswerEvent> {
    let mut tx = db.begin().await?;

    // Right-hand sides see the pre-update row, so the running mean uses the
    // old attempt count.
    let updated = sqlx::query(
        r#"
        UPDATE questions
        SET total_attempts = total_attempts + 1,
            correct_attempts = correct_attempts + ?,
            avg_time_seconds = (avg_time_seconds * total_attempts + ?) / (total_attempts + 1)
        WHERE id = ?
        "#,
    )
    .bind(i64::from(event.is_correct))
    .bind(event.time_spent_seconds)
    .bind(event.question_id.to_string())
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(StorageError::not_found("question", event.question_id));
    }

    let row = sqlx::query(&format!(
        "INSERT INTO answer_events ({ANSWER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
         RETURNING {ANSWER_COLUMNS}"
    ))
    .bind(event.id.to_string())
    .bind(event.user_id.to_string())
    .bind(event.question_id.to_string())
    .bind(event.session_id.map(|s| s.to_string()))
    .bind(&event.selected_answer)
    .bind(event.is_correct)
    .bind(event.time_spent_seconds)
    .bind(to_epoch_millis(event.answered_at))
    .fetch_one(&mut *tx)
    .await?;
    let recorded = answer_from_row(&row)?;

    tx.commit().await?;
    Ok(recorded)
}

#[derive(Debug, Default)]
struct QuestionIncrement {
    attempts: i64,
    correct: i64,
    time_spent_seconds: f64,
}

/// Inserts every event, then applies one aggregated increment per question.
pub(crate) async fn insert_answers_batch(
    db: &SqlitePool,
    events: &[AnswerEvent],
    chunk_size: usize,
) -> Result<()> {
    let mut increments: BTreeMap<QuestionId, QuestionIncrement> = BTreeMap::new();
    for event in events {
        let increment = increments.entry(event.question_id).or_default();
        increment.attempts += 1;
        increment.correct += i64::from(event.is_correct);
        increment.time_spent_seconds += event.time_spent_seconds;
    }

    let mut tx = db.begin().await?;

    for chunk in events.chunks(chunk_size.max(1)) {
        let mut insert =
            QueryBuilder::<Sqlite>::new(format!("INSERT INTO answer_events ({ANSWER_COLUMNS}) "));
        insert.push_values(chunk, |mut row, event| {
            row.push_bind(event.id.to_string())
                .push_bind(event.user_id.to_string())
                .push_bind(event.question_id.to_string())
                .push_bind(event.session_id.map(|s| s.to_string()))
                .push_bind(event.selected_answer.clone())
                .push_bind(event.is_correct)
                .push_bind(event.time_spent_seconds)
                .push_bind(to_epoch_millis(event.answered_at));
        });
        insert.build().execute(&mut *tx).await?;
    }

    for (question_id, increment) in &increments {
        let updated = sqlx::query(
            r#"
            UPDATE questions
            SET total_attempts = total_attempts + ?,
                correct_attempts = correct_attempts + ?,
                avg_time_seconds = (avg_time_seconds * total_attempts + ?) / (total_attempts + ?)
            WHERE id = ?
            "#,
        )
        .bind(increment.attempts)
        .bind(increment.correct)
        .bind(increment.time_spent_seconds)
        .bind(increment.attempts)
        .bind(question_id.to_string())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StorageError::not_found("question", question_id));
        }
    }

    tx.commit().await?;
    Ok(())
}

pub(crate) async fn insert_session(
    db: &SqlitePool,
    session_id: SessionId,
    user: UserId,
    exam: ExamId,
    started_at: DateTime<Utc>,
) -> Result<SessionProgress> {
    let row = sqlx::query(
        r#"
        INSERT INTO study_sessions (id, user_id, exam_id, started_at_ms, updated_at_ms)
        VALUES (?, ?, ?, ?, ?)
        RETURNING id, user_id, exam_id, questions_seen, correct_answers,
                  time_spent_seconds, objective_scores, updated_at_ms
        "#,
    )
    .bind(session_id.to_string())
    .bind(user.to_string())
    .bind(exam.to_string())
    .bind(to_epoch_millis(started_at))
    .bind(to_epoch_millis(started_at))
    .fetch_one(db)
    .await?;
    session_from_row(&row)
}

pub(crate) async fn get_session(db: &SqlitePool, session_id: SessionId) -> Result<Option<SessionProgress>> {
    let row = sqlx::query(
        r#"
        SELECT id, user_id, exam_id, questions_seen, correct_answers,
               time_spent_seconds, objective_scores, updated_at_ms
        FROM study_sessions
        WHERE id = ?
        "#,
    )
    .bind(session_id.to_string())
    .fetch_optional(db)
    .await?;
    row.as_ref().map(session_from_row).transpose()
}

/// Rebuilds a session's aggregate from its answer events and stores it.
pub(crate) async fn recompute_session(
    db: &SqlitePool,
    session_id: SessionId,
    now: DateTime<Utc>,
) -> Result<SessionProgress> {
    let mut tx = db.begin().await?;

    let owner = sqlx::query("SELECT user_id, exam_id FROM study_sessions WHERE id = ?")
        .bind(session_id.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StorageError::not_found("session", session_id))?;
    let user: UserId = parse_id(&owner.try_get::<String, _>("user_id")?)?;
    let exam: ExamId = parse_id(&owner.try_get::<String, _>("exam_id")?)?;

    let rows = sqlx::query(
        r#"
        SELECT ae.is_correct, ae.time_spent_seconds, q.objective_id
        FROM answer_events ae
        JOIN questions q ON q.id = ae.question_id
        WHERE ae.session_id = ?
        ORDER BY ae.answered_at_ms
        "#,
    )
    .bind(session_id.to_string())
    .fetch_all(&mut *tx)
    .await?;

    let tallies = rows
        .iter()
        .map(|row| -> Result<AnswerTally> {
            let objective: Option<String> = row.try_get("objective_id")?;
            Ok(AnswerTally {
                objective_id: objective.as_deref().map(parse_id::<ObjectiveId>).transpose()?,
                is_correct: row.try_get("is_correct")?,
                time_spent_seconds: row.try_get("time_spent_seconds")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let progress = SessionProgress::recompute(session_id, user, exam, &tallies, now);

    sqlx::query(
        r#"
        UPDATE study_sessions
        SET questions_seen = ?,
            correct_answers = ?,
            time_spent_seconds = ?,
            objective_scores = ?,
            updated_at_ms = ?
        WHERE id = ?
        "#,
    )
    .bind(progress.questions_seen)
    .bind(progress.correct_answers)
    .bind(progress.time_spent_seconds)
    .bind(serde_json::to_string(&progress.objective_scores)?)
    .bind(to_epoch_millis(now))
    .bind(session_id.to_string())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(progress)
}

/// Users ranked by correct answers, then accuracy, then least time spent.
pub(crate) async fn leaderboard(db: &SqlitePool, exam: ExamId, limit: u32) -> Result<Vec<LeaderboardEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT ae.user_id AS user_id,
               COUNT(*) AS answered,
               SUM(ae.is_correct) AS correct,
               SUM(ae.time_spent_seconds) AS time_spent
        FROM answer_events ae
        JOIN questions q ON q.id = ae.question_id
        WHERE q.exam_id = ?
        GROUP BY ae.user_id
        ORDER BY correct DESC,
                 CAST(SUM(ae.is_correct) AS REAL) / COUNT(*) DESC,
                 time_spent ASC,
                 ae.user_id ASC
        LIMIT ?
        "#,
    )
    .bind(exam.to_string())
    .bind(i64::from(limit))
    .fetch_all(db)
    .await?;

    rows.iter()
        .enumerate()
        .map(|(index, row)| -> Result<LeaderboardEntry> {
            let answered: i64 = row.try_get("answered")?;
            let correct: i64 = row.try_get("correct")?;
            Ok(LeaderboardEntry {
                rank: u32::try_from(index + 1).unwrap_or(u32::MAX),
                user_id: parse_id(&row.try_get::<String, _>("user_id")?)?,
                answered,
                correct,
                accuracy: if answered > 0 {
                    correct as f64 / answered as f64
                } else {
                    0.0
                },
                time_spent_seconds: row.try_get("time_spent")?,
            })
        })
        .collect()
}

/// Turns free text into an FTS5 query of quoted terms so user input can't
/// inject query syntax.
pub(crate) fn fts_query(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split_whitespace()
        .map(|term| term.replace('"', ""))
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{term}\""))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

pub(crate) async fn search_questions(
    db: &SqlitePool,
    exam: ExamId,
    fts: &str,
    limit: u32,
) -> Result<Vec<QuestionRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {QUESTION_COLUMNS} FROM questions_fts \
         JOIN questions q ON q.rowid = questions_fts.rowid \
         WHERE questions_fts MATCH ? AND q.exam_id = ? AND q.is_active = 1 \
         ORDER BY bm25(questions_fts) LIMIT ?"
    ))
    .bind(fts)
    .bind(exam.to_string())
    .bind(i64::from(limit))
    .fetch_all(db)
    .await?;
    rows.iter().map(question_from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fts_query_quotes_terms() {
        assert_eq!(fts_query("tcp  handshake").as_deref(), Some("\"tcp\" \"handshake\""));
        assert_eq!(fts_query("say \"hi\" OR").as_deref(), Some("\"say\" \"hi\" \"OR\""));
        assert_eq!(fts_query("  \"\" "), None);
    }
}
