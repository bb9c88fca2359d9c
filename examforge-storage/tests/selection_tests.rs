//! Study question selection against a real SQLite store.

mod common;

use chrono::Duration;
use common::{answer, layer, new_question, seed_question, set_counters};
use examforge_core::{
    ClientContext, ExamId, ObjectiveId, ReadOptions, RegionId, StudyFilters, StudyMode, UserId,
};
use examforge_storage::StorageError;
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_recently_answered_question_is_excluded_until_window_passes() {
    let t = layer().await;
    let exam = ExamId::new();
    let user = UserId::new();
    let answered = seed_question(&t, exam, 3).await;
    let other = seed_question(&t, exam, 3).await;

    t.engine()
        .record_answer(answer(user, answered.id, true, 30.0))
        .await
        .unwrap();

    t.clock.advance(Duration::hours(1));
    let filters = StudyFilters::default().with_exclusion_window_hours(24);
    let questions = t.engine().get_study_questions(user, exam, &filters).await.unwrap();
    let ids: Vec<_> = questions.iter().map(|q| q.id).collect();
    assert_eq!(ids, vec![other.id]);

    t.clock.advance(Duration::hours(24));
    let questions = t.engine().get_study_questions(user, exam, &filters).await.unwrap();
    assert!(questions.iter().any(|q| q.id == answered.id));
    assert_eq!(questions.len(), 2);
}

#[tokio::test]
async fn test_exclusion_is_per_user() {
    let t = layer().await;
    let exam = ExamId::new();
    let question = seed_question(&t, exam, 2).await;

    t.engine()
        .record_answer(answer(UserId::new(), question.id, false, 12.0))
        .await
        .unwrap();

    let questions = t
        .engine()
        .get_study_questions(UserId::new(), exam, &StudyFilters::default())
        .await
        .unwrap();
    assert_eq!(questions.len(), 1);
}

#[tokio::test]
async fn test_weak_area_orders_by_success_ratio() {
    let t = layer().await;
    let exam = ExamId::new();
    let strong = seed_question(&t, exam, 3).await;
    let weak = seed_question(&t, exam, 3).await;
    let untried = seed_question(&t, exam, 3).await;
    set_counters(&t, strong.id, 10, 9).await;
    set_counters(&t, weak.id, 10, 3).await;

    let filters = StudyFilters::default().with_mode(StudyMode::WeakArea);
    let ids: Vec<_> = t
        .engine()
        .get_study_questions(UserId::new(), exam, &filters)
        .await
        .unwrap()
        .iter()
        .map(|q| q.id)
        .collect();

    assert_eq!(ids, vec![weak.id, untried.id, strong.id]);
}

#[tokio::test]
async fn test_speed_drill_orders_by_difficulty() {
    let t = layer().await;
    let exam = ExamId::new();
    for difficulty in [5, 1, 3, 2, 4] {
        seed_question(&t, exam, difficulty).await;
    }

    let filters = StudyFilters::default().with_mode(StudyMode::SpeedDrill);
    let difficulties: Vec<u8> = t
        .engine()
        .get_study_questions(UserId::new(), exam, &filters)
        .await
        .unwrap()
        .iter()
        .map(|q| q.difficulty.value())
        .collect();

    assert_eq!(difficulties, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_filters_restrict_difficulty_objectives_and_approval() {
    let t = layer().await;
    let exam = ExamId::new();
    let networking = ObjectiveId::new();
    let security = ObjectiveId::new();

    let wanted = t
        .engine()
        .add_question(new_question(exam, 2, Some(networking)))
        .await
        .unwrap();
    t.engine()
        .add_question(new_question(exam, 2, Some(security)))
        .await
        .unwrap();
    t.engine()
        .add_question(new_question(exam, 5, Some(networking)))
        .await
        .unwrap();
    let mut unapproved = new_question(exam, 2, Some(networking));
    unapproved.is_approved = false;
    t.engine().add_question(unapproved).await.unwrap();
    seed_question(&t, ExamId::new(), 2).await;

    let filters = StudyFilters::default()
        .with_difficulty(1, 3)
        .with_objectives(vec![networking]);
    let questions = t
        .engine()
        .get_study_questions(UserId::new(), exam, &filters)
        .await
        .unwrap();

    assert_eq!(questions.len(), 1);
    assert_eq!(questions[0].id, wanted.id);
}

#[tokio::test]
async fn test_fewer_matches_than_limit_is_not_an_error() {
    let t = layer().await;
    let exam = ExamId::new();
    for _ in 0..3 {
        seed_question(&t, exam, 1).await;
    }

    let questions = t
        .engine()
        .get_study_questions(UserId::new(), exam, &StudyFilters::default().with_limit(50))
        .await
        .unwrap();
    assert_eq!(questions.len(), 3);

    let questions = t
        .engine()
        .get_study_questions(UserId::new(), exam, &StudyFilters::default().with_limit(2))
        .await
        .unwrap();
    assert_eq!(questions.len(), 2);
}

#[tokio::test]
async fn test_invalid_filters_are_rejected() {
    let t = layer().await;
    let err = t
        .engine()
        .get_study_questions(
            UserId::new(),
            ExamId::new(),
            &StudyFilters::default().with_difficulty(4, 2),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Validation(_)));

    let err = t
        .engine()
        .get_study_questions(UserId::new(), ExamId::new(), &StudyFilters::default().with_limit(0))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Validation(_)));

    let err = t
        .engine()
        .get_study_questions(
            UserId::new(),
            ExamId::new(),
            &StudyFilters::default().with_exclusion_window_hours(u32::MAX),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Validation(_)));
}

#[tokio::test]
async fn test_read_prefers_client_region_and_survives_unhealthy_replica() {
    let t = layer().await;
    let exam = ExamId::new();
    seed_question(&t, exam, 3).await;

    t.router().record_probe(&RegionId::new("lhr"), false, None);

    let filters = StudyFilters::default().with_client(ClientContext::from_country("GB"));
    let questions = t
        .engine()
        .get_study_questions(UserId::new(), exam, &filters)
        .await
        .unwrap();
    assert_eq!(questions.len(), 1);
}

#[tokio::test]
async fn test_repeat_selection_is_served_from_cache() {
    let t = layer().await;
    let exam = ExamId::new();
    let user = UserId::new();
    for _ in 0..4 {
        seed_question(&t, exam, 2).await;
    }

    let filters = StudyFilters::default();
    let first = t.engine().get_study_questions(user, exam, &filters).await.unwrap();
    let hits_before = t.cache().stats().hits;
    let second = t.engine().get_study_questions(user, exam, &filters).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(t.cache().stats().hits, hits_before + 1);
}

#[tokio::test]
async fn test_new_question_invalidates_cached_selection() {
    let t = layer().await;
    let exam = ExamId::new();
    let user = UserId::new();
    seed_question(&t, exam, 2).await;

    let filters = StudyFilters::default();
    assert_eq!(t.engine().get_study_questions(user, exam, &filters).await.unwrap().len(), 1);

    seed_question(&t, exam, 2).await;
    assert_eq!(t.engine().get_study_questions(user, exam, &filters).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_primary_only_selection_bypasses_cached_order() {
    let t = layer().await;
    let exam = ExamId::new();
    let user = UserId::new();
    let a = seed_question(&t, exam, 3).await;
    let b = seed_question(&t, exam, 3).await;
    set_counters(&t, a.id, 10, 2).await;
    set_counters(&t, b.id, 10, 8).await;

    let filters = StudyFilters::default().with_mode(StudyMode::WeakArea);
    let ids = |questions: Vec<examforge_core::QuestionRecord>| -> Vec<_> {
        questions.iter().map(|q| q.id).collect()
    };
    let cached = t.engine().get_study_questions(user, exam, &filters).await.unwrap();
    assert_eq!(ids(cached), vec![a.id, b.id]);

    set_counters(&t, a.id, 10, 8).await;
    set_counters(&t, b.id, 10, 2).await;

    let stale = t.engine().get_study_questions(user, exam, &filters).await.unwrap();
    assert_eq!(ids(stale), vec![a.id, b.id]);

    let primary = filters.clone().with_read(ReadOptions::primary_only());
    let fresh = t.engine().get_study_questions(user, exam, &primary).await.unwrap();
    assert_eq!(ids(fresh), vec![b.id, a.id]);

    // the primary read replaced the shared entry
    let after = t.engine().get_study_questions(user, exam, &filters).await.unwrap();
    assert_eq!(ids(after), vec![b.id, a.id]);
}
