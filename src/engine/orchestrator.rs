// src/engine/orchestrator.rs

use std::sync::Arc;

use chrono::Utc;

use super::{
    evaluator,
    locks::KeyedLocks,
    sequencer::{Advance, GroupSequencer},
};
use crate::{
    clients::{
        auth::Principal,
        outbox::{StatsEvent, StatsOutbox},
    },
    error::AppError,
    models::{
        answer::{SubmitAnswerRequest, SubmitAnswerResponse},
        question::PublicQuestion,
        session::{
            NewQuizSession, QuizMode, QuizSession, SessionStatus, StartQuizRequest,
            StartQuizResponse,
        },
        settings::TIME_LIMIT_KEY,
    },
    storage::{QuestionRepository, SessionStore, SettingsStore},
};

/// Tunables of the orchestrator that come from configuration.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Used when the `time_limit` setting is missing or invalid.
    pub default_time_limit_secs: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            default_time_limit_secs: 600,
        }
    }
}

/// Owns the life cycle of quiz sessions.
///
/// Every mutating operation runs under a per-session (or, for start, per-user)
/// lock and persists through a version-checked write, so concurrent requests on
/// one session cannot both advance it. Stats events are queued after the write
/// and never delay or change the outcome of an operation.
pub struct SessionOrchestrator {
    sessions: Arc<dyn SessionStore>,
    questions: Arc<dyn QuestionRepository>,
    settings: Arc<dyn SettingsStore>,
    stats: StatsOutbox,
    sequencer: GroupSequencer,
    session_locks: KeyedLocks,
    user_locks: KeyedLocks,
    options: EngineOptions,
}

impl SessionOrchestrator {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        questions: Arc<dyn QuestionRepository>,
        settings: Arc<dyn SettingsStore>,
        stats: StatsOutbox,
        options: EngineOptions,
    ) -> Self {
        Self {
            sequencer: GroupSequencer::new(questions.clone()),
            sessions,
            questions,
            settings,
            stats,
            session_locks: KeyedLocks::new(),
            user_locks: KeyedLocks::new(),
            options,
        }
    }

    /// Starts a session, taking over the progress of the user's previous one.
    ///
    /// * A still-active previous session is finished in the same store write.
    /// * Completed or broken previous sessions are ignored and a fresh first group is drawn.
    pub async fn start(
        &self,
        principal: &Principal,
        req: StartQuizRequest,
    ) -> Result<StartQuizResponse, AppError> {
        let user_guard = self.user_locks.lock(principal.user_id).await;
        let now = Utc::now();

        // The previous session stays locked until it is superseded, so requests
        // still running against it cannot bump its version in between.
        let latest = self.sessions.latest_for_user(principal.user_id).await?;
        let (previous, previous_guard) = match latest {
            Some(prev) if !prev.is_finished() => {
                let guard = self.session_locks.lock(prev.id).await;
                (self.sessions.get(prev.id).await?, Some(guard))
            }
            other => (other, None),
        };
        let inherited = previous.as_ref().and_then(QuizSession::inheritable_progress);

        let progress = match inherited {
            Some(progress) => {
                tracing::info!(
                    "User {} resumes at question {} of group {}",
                    principal.user_id,
                    progress.current_question_id,
                    progress.current_group
                );
                progress
            }
            None => self.sequencer.initial_progress().await?,
        };

        let new = NewQuizSession {
            user_id: principal.user_id,
            mode: req.mode,
            progress,
            screen_size: req.screen_size,
            created_at: now,
        };

        let session = match &previous {
            Some(prev) => self.sessions.supersede_and_create(prev, new).await?,
            None => self.sessions.create(new).await?,
        };
        drop(previous_guard);
        drop(user_guard);

        tracing::info!(
            "Quiz session {} started for user {} in {} mode",
            session.id,
            principal.user_id,
            session.mode.as_str()
        );

        if let Some(prev) = previous.filter(|p| !p.is_finished()) {
            tracing::info!("Quiz session {} superseded by {}", prev.id, session.id);
            self.stats.publish(StatsEvent::SessionFinished(prev.id));
        }
        self.stats.publish(StatsEvent::SessionStarted(session.clone()));

        let time_limit = self.time_limit(session.mode).await?;
        Ok(StartQuizResponse {
            session,
            time_limit,
        })
    }

    /// Returns the question the session currently points at, without answer-revealing data.
    /// The first request for a question starts its timer.
    pub async fn next_question(
        &self,
        principal: &Principal,
        session_id: i64,
    ) -> Result<PublicQuestion, AppError> {
        let _guard = self.session_locks.lock(session_id).await;

        let mut session = self.load_active(principal, session_id).await?;
        ensure_position(&session)?;

        let question = self
            .questions
            .question_by_id(session.current_question_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Question not found".to_string()))?;

        if session.question_requested_time.is_none() {
            let now = Utc::now();
            session.question_requested_time = Some(now);
            session.updated_at = now;
            self.sessions.update(&session).await?;
        }

        Ok(PublicQuestion::from(question))
    }

    /// Scores an answer to the current question and moves the session forward.
    pub async fn submit_answer(
        &self,
        principal: &Principal,
        session_id: i64,
        req: SubmitAnswerRequest,
    ) -> Result<SubmitAnswerResponse, AppError> {
        let guard = self.session_locks.lock(session_id).await;

        let mut session = self.load_active(principal, session_id).await?;
        if req.question_id != session.current_question_id {
            return Err(AppError::Conflict(format!(
                "Answer is for question {} but the current question is {}",
                req.question_id, session.current_question_id
            )));
        }
        ensure_position(&session)?;

        let correct = self
            .questions
            .correct_option_for_question(session.current_question_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Question not found".to_string()))?;
        let question = self
            .questions
            .question_by_id(session.current_question_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Question not found".to_string()))?;

        let now = Utc::now();
        let answer = evaluator::evaluate(
            &session,
            &req.answer,
            &correct,
            &question.case.code,
            req.screen_size.clone(),
            now,
        );

        if session.status == SessionStatus::NotStarted {
            session.status = SessionStatus::InProgress;
        }
        if req.screen_size.is_some() {
            session.screen_size = req.screen_size;
        }

        match self
            .sequencer
            .advance(
                session.current_group,
                &session.group_order,
                session.current_question_id,
            )
            .await?
        {
            Advance::Next(id) => session.current_question_id = id,
            Advance::NewGroup(progress) => {
                tracing::info!(
                    "Session {} moves on to group {}",
                    session.id,
                    progress.current_group
                );
                session.current_group = progress.current_group;
                session.group_order = progress.group_order;
                session.current_question_id = progress.current_question_id;
            }
            Advance::Exhausted => {
                tracing::info!("Session {} answered the last group", session.id);
                session.completed = true;
                session.finish(now);
            }
        }
        session.question_requested_time = None;
        session.updated_at = now;

        let saved = self.sessions.update(&session).await?;
        drop(guard);

        let is_correct = answer.is_correct;
        self.stats.publish(StatsEvent::AnswerRecorded {
            session_id: saved.id,
            answer,
        });
        if saved.is_finished() {
            self.stats.publish(StatsEvent::SessionFinished(saved.id));
        }

        let reveal = saved.mode.reveals_answers();
        Ok(SubmitAnswerResponse {
            is_correct: reveal.then_some(is_correct),
            correct_answer: reveal.then_some(correct),
            finished: saved.is_finished(),
            next_question_id: (!saved.is_finished()).then_some(saved.current_question_id),
        })
    }

    /// Ends the session. Finishing an already finished session succeeds without changes.
    pub async fn finish(
        &self,
        principal: &Principal,
        session_id: i64,
    ) -> Result<QuizSession, AppError> {
        let guard = self.session_locks.lock(session_id).await;

        let mut session = self.load_owned(principal, session_id).await?;
        if !session.finish(Utc::now()) {
            return Ok(session);
        }

        let saved = self.sessions.update(&session).await?;
        drop(guard);

        tracing::info!("Quiz session {} finished by user {}", saved.id, principal.user_id);
        self.stats.publish(StatsEvent::SessionFinished(saved.id));
        Ok(saved)
    }

    /// A single session of the caller, in any status.
    pub async fn get(
        &self,
        principal: &Principal,
        session_id: i64,
    ) -> Result<QuizSession, AppError> {
        self.load_owned(principal, session_id).await
    }

    /// The caller's sessions, newest first.
    pub async fn list(&self, principal: &Principal) -> Result<Vec<QuizSession>, AppError> {
        Ok(self.sessions.list_for_user(principal.user_id).await?)
    }

    /// Waits until the stats events queued so far have been handled.
    pub async fn flush_stats(&self) {
        self.stats.flush().await;
    }

    async fn load_owned(
        &self,
        principal: &Principal,
        session_id: i64,
    ) -> Result<QuizSession, AppError> {
        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Quiz session not found".to_string()))?;

        if session.user_id != principal.user_id {
            tracing::warn!(
                "User {} tried to access session {} owned by user {}",
                principal.user_id,
                session_id,
                session.user_id
            );
            return Err(AppError::Forbidden(
                "Quiz session belongs to another user".to_string(),
            ));
        }
        Ok(session)
    }

    async fn load_active(
        &self,
        principal: &Principal,
        session_id: i64,
    ) -> Result<QuizSession, AppError> {
        let session = self.load_owned(principal, session_id).await?;
        if session.is_finished() {
            return Err(AppError::NotFound("Quiz session is finished".to_string()));
        }
        Ok(session)
    }

    async fn time_limit(&self, mode: QuizMode) -> Result<Option<u64>, AppError> {
        if mode != QuizMode::LimitedTime {
            return Ok(None);
        }
        let configured = self.settings.get_setting(TIME_LIMIT_KEY).await?;
        let secs = match configured.as_deref().map(str::parse::<u64>) {
            Some(Ok(secs)) => secs,
            Some(Err(e)) => {
                tracing::warn!("Ignoring invalid '{}' setting: {}", TIME_LIMIT_KEY, e);
                self.options.default_time_limit_secs
            }
            None => self.options.default_time_limit_secs,
        };
        Ok(Some(secs))
    }
}

/// An active session must point at a member of its own group order.
fn ensure_position(session: &QuizSession) -> Result<(), AppError> {
    if session.group_order.contains(&session.current_question_id) {
        Ok(())
    } else {
        Err(AppError::Invariant(format!(
            "session {}: current question {} is not in group order {:?}",
            session.id, session.current_question_id, session.group_order
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Mutex, time::Duration};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        clients::stats::{StatsDelivery, StatsRecorder},
        models::{
            answer::QuestionAnswer,
            question::{Case, Question},
            session::GroupId,
            settings::Setting,
        },
        storage::memory::MemoryStore,
    };

    #[derive(Default)]
    struct RecordingStats {
        events: Mutex<Vec<String>>,
        fail: bool,
        delay: Duration,
    }

    impl RecordingStats {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        async fn record(&self, event: String) -> StatsDelivery {
            tokio::time::sleep(self.delay).await;
            self.events.lock().unwrap().push(event);
            if self.fail {
                StatsDelivery::Failed("stats service down".to_string())
            } else {
                StatsDelivery::Delivered
            }
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StatsRecorder for RecordingStats {
        async fn save_session(&self, session: &QuizSession) -> StatsDelivery {
            self.record(format!("save_session:{}", session.id)).await
        }

        async fn save_response(&self, session_id: i64, answer: &QuestionAnswer) -> StatsDelivery {
            self.record(format!("save_response:{}:{}", session_id, answer.question_id))
                .await
        }

        async fn finish_session(&self, session_id: i64) -> StatsDelivery {
            self.record(format!("finish_session:{}", session_id)).await
        }
    }

    fn question(id: i64, group: i64) -> Question {
        Question {
            id,
            group: GroupId(group),
            question: format!("Question {}", id),
            options: vec!["Yes".to_string(), "No".to_string()],
            correct_option: "Yes".to_string(),
            prediction_age: 12,
            case: Case {
                id,
                code: format!("C-{}", id),
                gender: "F".to_string(),
                age1: 8,
                age2: 10,
                image1: None,
                image2: None,
                parameters: vec![],
                parameter_values: vec![],
            },
        }
    }

    /// Group 1 holds questions 1..=3, group 2 holds 4 and 5.
    fn bank() -> Vec<Question> {
        vec![
            question(1, 1),
            question(2, 1),
            question(3, 1),
            question(4, 2),
            question(5, 2),
        ]
    }

    fn engine(store: &MemoryStore, stats: Arc<RecordingStats>) -> SessionOrchestrator {
        let store = Arc::new(store.clone());
        SessionOrchestrator::new(
            store.clone(),
            store.clone(),
            store,
            StatsOutbox::start(stats, Duration::from_secs(10), 64),
            EngineOptions {
                default_time_limit_secs: 300,
            },
        )
    }

    fn user(user_id: i64) -> Principal {
        Principal {
            user_id,
            role: "user".to_string(),
        }
    }

    fn start_req(mode: QuizMode) -> StartQuizRequest {
        StartQuizRequest {
            mode,
            screen_size: Some("1920x1080".to_string()),
        }
    }

    fn answer(question_id: i64, answer: &str) -> SubmitAnswerRequest {
        SubmitAnswerRequest {
            question_id,
            answer: answer.to_string(),
            screen_size: None,
        }
    }

    #[tokio::test]
    async fn walks_every_group_and_finishes() {
        let store = MemoryStore::with_questions(bank());
        let stats = Arc::new(RecordingStats::default());
        let engine = engine(&store, stats.clone());
        let alice = user(1);

        let started = engine.start(&alice, start_req(QuizMode::Classic)).await.unwrap();
        let session = started.session;
        assert_eq!(session.current_group, GroupId(1));
        assert_eq!(session.status, SessionStatus::NotStarted);
        let mut first_group = session.group_order.clone();
        first_group.sort();
        assert_eq!(first_group, vec![1, 2, 3]);

        let mut seen = Vec::new();
        let mut current = session.current_question_id;
        loop {
            let shown = engine.next_question(&alice, session.id).await.unwrap();
            assert_eq!(shown.id, current);
            seen.push(current);

            let outcome = engine
                .submit_answer(&alice, session.id, answer(current, "Yes"))
                .await
                .unwrap();
            if outcome.finished {
                assert_eq!(outcome.next_question_id, None);
                break;
            }
            current = outcome.next_question_id.unwrap();
        }

        // Group 1 is fully answered before group 2 begins.
        let first: HashSet<i64> = seen[..3].iter().copied().collect();
        assert_eq!(first, HashSet::from([1, 2, 3]));
        let second: HashSet<i64> = seen[3..].iter().copied().collect();
        assert_eq!(second, HashSet::from([4, 5]));

        let stored = store.get(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Finished);
        assert!(stored.completed);
        assert!(stored.finished_at.is_some());

        engine.flush_stats().await;
        let events = stats.events();
        assert_eq!(events.first().unwrap(), &format!("save_session:{}", session.id));
        assert_eq!(events.last().unwrap(), &format!("finish_session:{}", session.id));
        assert_eq!(events.iter().filter(|e| e.starts_with("save_response")).count(), 5);
    }

    #[tokio::test]
    async fn first_answer_moves_session_in_progress() {
        let store = MemoryStore::with_questions(bank());
        let engine = engine(&store, Arc::new(RecordingStats::default()));
        let alice = user(1);

        let session = engine
            .start(&alice, start_req(QuizMode::Classic))
            .await
            .unwrap()
            .session;
        engine
            .submit_answer(&alice, session.id, answer(session.current_question_id, "No"))
            .await
            .unwrap();

        let stored = store.get(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::InProgress);
        assert!(stored.question_requested_time.is_none());
    }

    #[tokio::test]
    async fn restart_supersedes_and_inherits_position() {
        let store = MemoryStore::with_questions(bank());
        let stats = Arc::new(RecordingStats::default());
        let engine = engine(&store, stats.clone());
        let alice = user(1);

        let first = engine
            .start(&alice, start_req(QuizMode::Classic))
            .await
            .unwrap()
            .session;
        let outcome = engine
            .submit_answer(&alice, first.id, answer(first.current_question_id, "Yes"))
            .await
            .unwrap();
        let resume_at = outcome.next_question_id.unwrap();

        let second = engine
            .start(&alice, start_req(QuizMode::Educational))
            .await
            .unwrap()
            .session;
        assert_ne!(second.id, first.id);
        assert_eq!(second.current_question_id, resume_at);
        assert_eq!(second.group_order, first.group_order);
        assert_eq!(second.mode, QuizMode::Educational);

        let old = store.get(first.id).await.unwrap().unwrap();
        assert!(old.is_finished());
        engine.flush_stats().await;
        assert!(stats.events().contains(&format!("finish_session:{}", first.id)));
    }

    #[tokio::test]
    async fn completed_quiz_restarts_from_first_group() {
        let store = MemoryStore::with_questions(vec![question(1, 1)]);
        let engine = engine(&store, Arc::new(RecordingStats::default()));
        let alice = user(1);

        let first = engine
            .start(&alice, start_req(QuizMode::Classic))
            .await
            .unwrap()
            .session;
        let outcome = engine
            .submit_answer(&alice, first.id, answer(1, "Yes"))
            .await
            .unwrap();
        assert!(outcome.finished);

        let again = engine
            .start(&alice, start_req(QuizMode::Classic))
            .await
            .unwrap()
            .session;
        assert_eq!(again.current_group, GroupId(1));
        assert_eq!(again.current_question_id, 1);
        assert!(!again.completed);
    }

    #[tokio::test]
    async fn other_users_session_is_forbidden() {
        let store = MemoryStore::with_questions(bank());
        let engine = engine(&store, Arc::new(RecordingStats::default()));
        let alice = user(1);
        let mallory = user(2);

        let session = engine
            .start(&alice, start_req(QuizMode::Classic))
            .await
            .unwrap()
            .session;

        let err = engine.next_question(&mallory, session.id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = engine
            .submit_answer(&mallory, session.id, answer(session.current_question_id, "Yes"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = engine.finish(&mallory, session.id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let stored = store.get(session.id).await.unwrap().unwrap();
        assert_eq!(stored, session);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let store = MemoryStore::with_questions(bank());
        let engine = engine(&store, Arc::new(RecordingStats::default()));

        let err = engine.next_question(&user(1), 999).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn stale_question_is_a_conflict_and_does_not_advance() {
        let store = MemoryStore::with_questions(bank());
        let stats = Arc::new(RecordingStats::default());
        let engine = engine(&store, stats.clone());
        let alice = user(1);

        let session = engine
            .start(&alice, start_req(QuizMode::Classic))
            .await
            .unwrap()
            .session;
        let stale = session
            .group_order
            .iter()
            .copied()
            .find(|id| *id != session.current_question_id)
            .unwrap();

        let err = engine
            .submit_answer(&alice, session.id, answer(stale, "Yes"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let stored = store.get(session.id).await.unwrap().unwrap();
        assert_eq!(stored.current_question_id, session.current_question_id);
        engine.flush_stats().await;
        assert!(!stats.events().iter().any(|e| e.starts_with("save_response")));
    }

    #[tokio::test]
    async fn concurrent_submissions_advance_once() {
        let store = MemoryStore::with_questions(bank());
        let engine = engine(&store, Arc::new(RecordingStats::default()));
        let alice = user(1);

        let session = engine
            .start(&alice, start_req(QuizMode::Classic))
            .await
            .unwrap()
            .session;
        let current = session.current_question_id;

        let (a, b) = tokio::join!(
            engine.submit_answer(&alice, session.id, answer(current, "Yes")),
            engine.submit_answer(&alice, session.id, answer(current, "Yes")),
        );
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(AppError::Conflict(_))))
        );

        let stored = store.get(session.id).await.unwrap().unwrap();
        assert_ne!(stored.current_question_id, current);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn finish_is_idempotent() {
        let store = MemoryStore::with_questions(bank());
        let stats = Arc::new(RecordingStats::default());
        let engine = engine(&store, stats.clone());
        let alice = user(1);

        let session = engine
            .start(&alice, start_req(QuizMode::Classic))
            .await
            .unwrap()
            .session;

        let first = engine.finish(&alice, session.id).await.unwrap();
        let second = engine.finish(&alice, session.id).await.unwrap();
        assert!(first.is_finished());
        assert_eq!(first.finished_at, second.finished_at);
        assert_eq!(first.version, second.version);

        engine.flush_stats().await;
        let finishes = stats
            .events()
            .iter()
            .filter(|e| e.starts_with("finish_session"))
            .count();
        assert_eq!(finishes, 1);

        let err = engine.next_question(&alice, session.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn failing_stats_never_block_progress() {
        let store = MemoryStore::with_questions(bank());
        let stats = Arc::new(RecordingStats::failing());
        let engine = engine(&store, stats.clone());
        let alice = user(1);

        let session = engine
            .start(&alice, start_req(QuizMode::Classic))
            .await
            .unwrap()
            .session;
        let outcome = engine
            .submit_answer(&alice, session.id, answer(session.current_question_id, "Yes"))
            .await
            .unwrap();

        let stored = store.get(session.id).await.unwrap().unwrap();
        assert_eq!(Some(stored.current_question_id), outcome.next_question_id);
        engine.flush_stats().await;
        assert_eq!(stats.events().len(), 2);
    }

    #[tokio::test]
    async fn only_educational_mode_reveals_the_answer() {
        let store = MemoryStore::with_questions(bank());
        let engine = engine(&store, Arc::new(RecordingStats::default()));

        let educational = engine
            .start(&user(1), start_req(QuizMode::Educational))
            .await
            .unwrap()
            .session;
        let revealed = engine
            .submit_answer(
                &user(1),
                educational.id,
                answer(educational.current_question_id, " yes "),
            )
            .await
            .unwrap();
        assert_eq!(revealed.is_correct, Some(true));
        assert_eq!(revealed.correct_answer.as_deref(), Some("Yes"));

        let classic = engine
            .start(&user(2), start_req(QuizMode::Classic))
            .await
            .unwrap()
            .session;
        let hidden = engine
            .submit_answer(&user(2), classic.id, answer(classic.current_question_id, "No"))
            .await
            .unwrap();
        assert_eq!(hidden.is_correct, None);
        assert_eq!(hidden.correct_answer, None);
    }

    #[tokio::test]
    async fn question_timer_starts_on_first_fetch_only() {
        let store = MemoryStore::with_questions(bank());
        let engine = engine(&store, Arc::new(RecordingStats::default()));
        let alice = user(1);

        let session = engine
            .start(&alice, start_req(QuizMode::Classic))
            .await
            .unwrap()
            .session;
        assert!(session.question_requested_time.is_none());

        engine.next_question(&alice, session.id).await.unwrap();
        let stamped = store
            .get(session.id)
            .await
            .unwrap()
            .unwrap()
            .question_requested_time;
        assert!(stamped.is_some());

        engine.next_question(&alice, session.id).await.unwrap();
        let again = store
            .get(session.id)
            .await
            .unwrap()
            .unwrap()
            .question_requested_time;
        assert_eq!(stamped, again);
    }

    #[tokio::test]
    async fn time_limit_only_for_limited_time_mode() {
        let store = MemoryStore::with_questions(bank());
        let engine = engine(&store, Arc::new(RecordingStats::default()));

        let classic = engine
            .start(&user(1), start_req(QuizMode::Classic))
            .await
            .unwrap();
        assert_eq!(classic.time_limit, None);

        let limited = engine
            .start(&user(2), start_req(QuizMode::LimitedTime))
            .await
            .unwrap();
        assert_eq!(limited.time_limit, Some(300));

        store
            .save_setting(&Setting {
                name: TIME_LIMIT_KEY.to_string(),
                value: "90".to_string(),
            })
            .await
            .unwrap();
        let configured = engine
            .start(&user(3), start_req(QuizMode::LimitedTime))
            .await
            .unwrap();
        assert_eq!(configured.time_limit, Some(90));
    }

    #[tokio::test]
    async fn empty_bank_cannot_start() {
        let store = MemoryStore::new();
        let engine = engine(&store, Arc::new(RecordingStats::default()));

        let err = engine
            .start(&user(1), start_req(QuizMode::Classic))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InternalServerError(_)));
    }

    #[tokio::test]
    async fn list_returns_only_own_sessions() {
        let store = MemoryStore::with_questions(bank());
        let engine = engine(&store, Arc::new(RecordingStats::default()));

        engine.start(&user(1), start_req(QuizMode::Classic)).await.unwrap();
        engine.start(&user(1), start_req(QuizMode::Classic)).await.unwrap();
        engine.start(&user(2), start_req(QuizMode::Classic)).await.unwrap();

        let mine = engine.list(&user(1)).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|s| s.user_id == 1));
        assert!(mine[0].id > mine[1].id);
    }

    #[tokio::test]
    async fn slow_stats_service_does_not_delay_answers() {
        let store = MemoryStore::with_questions(vec![question(1, 1)]);
        let stats = Arc::new(RecordingStats::slow(Duration::from_secs(3)));
        let engine = engine(&store, stats.clone());
        let alice = user(1);

        let session = engine
            .start(&alice, start_req(QuizMode::Classic))
            .await
            .unwrap()
            .session;

        let begun = tokio::time::Instant::now();
        let outcome = engine
            .submit_answer(&alice, session.id, answer(1, "Yes"))
            .await
            .unwrap();
        assert!(outcome.finished);
        assert!(begun.elapsed() < Duration::from_millis(500));

        let stored = store.get(session.id).await.unwrap().unwrap();
        assert!(stored.is_finished());
    }

    #[tokio::test]
    async fn get_checks_ownership() {
        let store = MemoryStore::with_questions(bank());
        let engine = engine(&store, Arc::new(RecordingStats::default()));

        let session = engine
            .start(&user(1), start_req(QuizMode::Classic))
            .await
            .unwrap()
            .session;

        assert_eq!(engine.get(&user(1), session.id).await.unwrap(), session);
        let err = engine.get(&user(2), session.id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        let err = engine.get(&user(1), 999).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn restart_waits_for_in_flight_request_on_previous_session() {
        let store = MemoryStore::with_questions(bank());
        let engine = engine(&store, Arc::new(RecordingStats::default()));
        let alice = user(1);

        let first = engine
            .start(&alice, start_req(QuizMode::Classic))
            .await
            .unwrap()
            .session;

        // Another request holds the old session and writes to it while start is pending.
        let held = engine.session_locks.lock(first.id).await;
        let writer = store.clone();
        let (restarted, _) = tokio::join!(
            engine.start(&alice, start_req(QuizMode::Classic)),
            async move {
                tokio::task::yield_now().await;
                // Start must not have replaced the session while it is held.
                assert_eq!(writer.list_for_user(1).await.unwrap().len(), 1);
                let mut old = writer.get(first.id).await.unwrap().unwrap();
                old.question_requested_time = Some(Utc::now());
                writer.update(&old).await.unwrap();
                drop(held);
            }
        );

        let second = restarted.unwrap().session;
        assert_ne!(second.id, first.id);
        assert_eq!(second.current_question_id, first.current_question_id);
        assert!(store.get(first.id).await.unwrap().unwrap().is_finished());
    }
}
