//! Question selection, answer recording and session aggregates.
//!
//! Reads go through the [`RegionRouter`]'s fallback chain and, where the
//! result is reusable, through the [`CacheManager`]. Writes go to the
//! primary and invalidate the cache entities they touch. Every public
//! operation is timed by the [`PerformanceMonitor`].

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use examforge_cache::{CacheKey, CacheManager, CacheOptions, EntityRef};
use examforge_core::{
    AnswerEvent, ClientContext, Difficulty, ExamId, LeaderboardEntry, NewAnswer, ObjectiveId,
    QuestionId, QuestionRecord, ReadOptions, SessionId, SessionProgress, SharedClock, StudyFilters,
    UserId,
};
use examforge_metrics::PerformanceMonitor;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{Result, StorageError};
use crate::queries;
use crate::router::RegionRouter;

/// A question submitted for inclusion in an exam's pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewQuestion {
    pub exam_id: ExamId,
    pub objective_id: Option<ObjectiveId>,
    pub stem: String,
    pub choices: Vec<String>,
    pub correct_answer: String,
    pub explanation: Option<String>,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub is_approved: bool,
}

impl NewQuestion {
    pub fn validate(&self) -> Result<()> {
        if self.stem.trim().is_empty() {
            return Err(StorageError::Validation("question stem is empty".to_string()));
        }
        if self.choices.len() < 2 {
            return Err(StorageError::Validation(format!(
                "a question needs at least 2 choices, got {}",
                self.choices.len()
            )));
        }
        if !self.choices.contains(&self.correct_answer) {
            return Err(StorageError::Validation(format!(
                "correct answer '{}' is not one of the choices",
                self.correct_answer
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct QuerySelectionEngine {
    router: Arc<RegionRouter>,
    cache: CacheManager,
    monitor: Arc<PerformanceMonitor>,
    config: EngineConfig,
    clock: SharedClock,
}

impl QuerySelectionEngine {
    pub fn new(
        router: Arc<RegionRouter>,
        cache: CacheManager,
        monitor: Arc<PerformanceMonitor>,
        config: EngineConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            router,
            cache,
            monitor,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Study questions for `user` in `exam`.
    ///
    /// Returns fewer than `filters.limit` questions when fewer match. The
    /// selection is cached in memory for a short time under the exam and
    /// also dropped whenever the user records an answer. Reads that do not
    /// allow stale data skip the cached selection and replace it.
    pub async fn get_study_questions(
        &self,
        user: UserId,
        exam: ExamId,
        filters: &StudyFilters,
    ) -> Result<Vec<QuestionRecord>> {
        self.monitor
            .time("get_study_questions", async {
                let difficulty = filters.validate()?;
                let key = study_key(user, exam, filters)?;
                let options = fresh_unless_stale_allowed(
                    CacheOptions::default()
                        .memory_ttl(self.config.selection_ttl())
                        .memory_only(),
                    filters.read,
                );

                let router = self.router.clone();
                let clock = self.clock.clone();
                let filters = filters.clone();
                self.cache
                    .get_or_set(
                        &key,
                        move || async move {
                            let cutoff = exclusion_cutoff(clock.now(), filters.exclusion_window_hours)?;
                            router
                                .route_read("get_study_questions", &filters.client, filters.read, |handle| {
                                    let filters = &filters;
                                    async move {
                                        queries::select_study_questions(
                                            handle.db(),
                                            user,
                                            exam,
                                            filters,
                                            difficulty,
                                            cutoff,
                                        )
                                        .await
                                    }
                                })
                                .await
                        },
                        options,
                    )
                    .await
            })
            .await
    }

    /// Stores one answer and applies its counter increments atomically.
    pub async fn record_answer(&self, answer: NewAnswer) -> Result<AnswerEvent> {
        self.monitor
            .time("record_answer", async {
                answer.validate()?;
                let event = answer.into_event(self.clock.now());

                let recorded = self
                    .router
                    .route_write("record_answer", |handle| async move {
                        queries::insert_answer(handle.db(), &event).await
                    })
                    .await?;

                self.invalidate_answer_entities(std::iter::once(&recorded)).await;
                Ok(recorded)
            })
            .await
    }

    /// Stores a batch of answers with one counter update per question.
    pub async fn record_answers_batch(&self, answers: Vec<NewAnswer>) -> Result<Vec<AnswerEvent>> {
        self.monitor
            .time("record_answers_batch", async {
                if answers.is_empty() {
                    return Ok(Vec::new());
                }
                for answer in &answers {
                    answer.validate()?;
                }

                let now = self.clock.now();
                let events: Vec<AnswerEvent> = answers.into_iter().map(|a| a.into_event(now)).collect();
                let chunk_size = self.config.batch_insert_chunk;

                self.router
                    .route_write("record_answers_batch", |handle| {
                        let events = &events;
                        async move { queries::insert_answers_batch(handle.db(), events, chunk_size).await }
                    })
                    .await?;

                self.invalidate_answer_entities(events.iter()).await;
                debug!(count = events.len(), "Recorded answer batch");
                Ok(events)
            })
            .await
    }

    /// Recomputes a session's totals from all of its answer events.
    pub async fn update_session_progress(&self, session_id: SessionId) -> Result<SessionProgress> {
        self.monitor
            .time("update_session_progress", async {
                let now = self.clock.now();
                let progress = self
                    .router
                    .route_write("update_session_progress", |handle| async move {
                        queries::recompute_session(handle.db(), session_id, now).await
                    })
                    .await?;
                self.cache.invalidate_entity(&EntityRef::session(session_id)).await;
                Ok(progress)
            })
            .await
    }

    pub async fn start_session(&self, user: UserId, exam: ExamId) -> Result<SessionProgress> {
        self.monitor
            .time("start_session", async {
                let session_id = SessionId::new();
                let now = self.clock.now();
                let session = self
                    .router
                    .route_write("start_session", |handle| async move {
                        queries::insert_session(handle.db(), session_id, user, exam, now).await
                    })
                    .await?;
                info!(session = %session_id, user = %user, exam = %exam, "Study session started");
                Ok(session)
            })
            .await
    }

    /// The persisted aggregate for a session, as last computed.
    pub async fn get_session_progress(
        &self,
        session_id: SessionId,
        context: &ClientContext,
        read: ReadOptions,
    ) -> Result<Option<SessionProgress>> {
        self.monitor
            .time("get_session_progress", async {
                self.router
                    .route_read("get_session_progress", context, read, |handle| async move {
                        queries::get_session(handle.db(), session_id).await
                    })
                    .await
            })
            .await
    }

    /// A single question; found questions are cached until answered.
    pub async fn get_question(
        &self,
        id: QuestionId,
        context: &ClientContext,
        read: ReadOptions,
    ) -> Result<Option<QuestionRecord>> {
        self.monitor
            .time("get_question", async {
                let key = CacheKey::new(EntityRef::question(id), "record");
                if read.allow_stale {
                    if let Some(question) = self.cache.get::<QuestionRecord>(&key).await {
                        return Ok(Some(question));
                    }
                }

                let seen = self.cache.generation(&key);
                let question = self
                    .router
                    .route_read("get_question", context, read, |handle| async move {
                        queries::get_question(handle.db(), id).await
                    })
                    .await?;

                if let Some(question) = &question {
                    let options = CacheOptions::default()
                        .memory_ttl(self.config.question_ttl())
                        .kv_ttl(self.config.question_ttl());
                    self.cache.set_if_current(&key, question, options, seen).await;
                }
                Ok(question)
            })
            .await
    }

    /// Full-text search over active questions of an exam, best match first.
    pub async fn search_questions(
        &self,
        exam: ExamId,
        text: &str,
        limit: u32,
        context: &ClientContext,
    ) -> Result<Vec<QuestionRecord>> {
        self.monitor
            .time("search_questions", async {
                if limit == 0 || limit > self.config.search_limit_max {
                    return Err(StorageError::Validation(format!(
                        "search limit {} outside 1..={}",
                        limit, self.config.search_limit_max
                    )));
                }
                let fts = queries::fts_query(text)
                    .ok_or_else(|| StorageError::Validation("search text is empty".to_string()))?;

                self.router
                    .route_read("search_questions", context, ReadOptions::default(), |handle| {
                        let fts = &fts;
                        async move { queries::search_questions(handle.db(), exam, fts, limit).await }
                    })
                    .await
            })
            .await
    }

    pub async fn get_leaderboard(
        &self,
        exam: ExamId,
        limit: u32,
        context: &ClientContext,
        read: ReadOptions,
    ) -> Result<Vec<LeaderboardEntry>> {
        self.monitor
            .time("get_leaderboard", async {
                if limit == 0 || limit > StudyFilters::MAX_LIMIT {
                    return Err(StorageError::Validation(format!(
                        "leaderboard limit {} outside 1..={}",
                        limit,
                        StudyFilters::MAX_LIMIT
                    )));
                }

                let key = CacheKey::new(EntityRef::exam(exam), format!("leaderboard:{limit}"));
                let options = fresh_unless_stale_allowed(
                    CacheOptions::default()
                        .memory_ttl(self.config.leaderboard_ttl())
                        .kv_ttl(self.config.leaderboard_ttl()),
                    read,
                );
                let router = self.router.clone();
                let context = context.clone();
                self.cache
                    .get_or_set(
                        &key,
                        move || async move {
                            router
                                .route_read("get_leaderboard", &context, read, |handle| async move {
                                    queries::leaderboard(handle.db(), exam, limit).await
                                })
                                .await
                        },
                        options,
                    )
                    .await
            })
            .await
    }

    /// Adds a question to an exam's pool and drops the exam's cached reads.
    pub async fn add_question(&self, question: NewQuestion) -> Result<QuestionRecord> {
        self.monitor
            .time("add_question", async {
                question.validate()?;
                let record = QuestionRecord {
                    id: QuestionId::new(),
                    exam_id: question.exam_id,
                    objective_id: question.objective_id,
                    stem: question.stem,
                    choices: question.choices,
                    correct_answer: question.correct_answer,
                    explanation: question.explanation,
                    difficulty: question.difficulty,
                    is_active: true,
                    is_approved: question.is_approved,
                    total_attempts: 0,
                    correct_attempts: 0,
                    avg_time_seconds: 0.0,
                    created_at: self.clock.now(),
                };

                self.router
                    .route_write("add_question", |handle| {
                        let record = &record;
                        async move { queries::insert_question(handle.db(), record).await }
                    })
                    .await?;

                self.cache.invalidate_entity(&EntityRef::exam(record.exam_id)).await;
                Ok(record)
            })
            .await
    }

    async fn invalidate_answer_entities<'a>(&self, events: impl Iterator<Item = &'a AnswerEvent>) {
        let mut entities = BTreeSet::new();
        for event in events {
            entities.insert(EntityRef::user(event.user_id));
            entities.insert(EntityRef::question(event.question_id));
            if let Some(session) = event.session_id {
                entities.insert(EntityRef::session(session));
            }
        }
        for entity in &entities {
            self.cache.invalidate_entity(entity).await;
        }
    }
}

fn fresh_unless_stale_allowed(options: CacheOptions, read: ReadOptions) -> CacheOptions {
    if read.allow_stale {
        options
    } else {
        options.fetch_fresh()
    }
}

/// Answers at or after the cutoff exclude their question from selection.
fn exclusion_cutoff(now: DateTime<Utc>, window_hours: u32) -> Result<DateTime<Utc>> {
    ChronoDuration::try_hours(i64::from(window_hours))
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or_else(|| {
            StorageError::Validation(format!("exclusion window {window_hours}h is out of range"))
        })
}

/// `exam:{id}:study:{digest}`, also indexed under the user.
fn study_key(user: UserId, exam: ExamId, filters: &StudyFilters) -> Result<CacheKey> {
    let mut hasher = Sha256::new();
    hasher.update(user.as_uuid().as_bytes());
    hasher.update(filters.mode.as_str().as_bytes());
    hasher.update([filters.difficulty_min, filters.difficulty_max]);
    hasher.update(serde_json::to_vec(&filters.objective_ids)?);
    hasher.update(filters.limit.to_be_bytes());
    hasher.update(filters.exclusion_window_hours.to_be_bytes());
    let digest = hex::encode(hasher.finalize());

    Ok(CacheKey::new(EntityRef::exam(exam), format!("study:{}", &digest[..16]))
        .depends_on(EntityRef::user(user)))
}
