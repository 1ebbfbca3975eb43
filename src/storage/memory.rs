// src/storage/memory.rs

use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;

use super::{QuestionRepository, SessionStore, SettingsStore, StoreError};
use crate::models::{
    question::Question,
    session::{GroupId, NewQuizSession, QuizSession, SessionStatus},
    settings::Setting,
};

#[derive(Default)]
struct Inner {
    next_id: i64,
    sessions: BTreeMap<i64, QuizSession>,
    questions: BTreeMap<i64, Question>,
    settings: BTreeMap<String, String>,
}

/// In-process store implementing every storage contract.
/// Same semantics as the Postgres adapter, including version checks.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store with questions. Later inserts with the same id replace earlier ones.
    pub fn with_questions(questions: impl IntoIterator<Item = Question>) -> Self {
        let store = Self::new();
        {
            let mut inner = store.lock();
            for q in questions {
                inner.questions.insert(q.id, q);
            }
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means another test thread panicked mid-write.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(inner: &mut Inner, new: NewQuizSession) -> Result<QuizSession, StoreError> {
        let has_active = inner
            .sessions
            .values()
            .any(|s| s.user_id == new.user_id && !s.is_finished());
        if has_active {
            return Err(StoreError::Conflict(
                "user already has an active session".to_string(),
            ));
        }

        inner.next_id += 1;
        let session = QuizSession {
            id: inner.next_id,
            user_id: new.user_id,
            mode: new.mode,
            status: SessionStatus::NotStarted,
            current_question_id: new.progress.current_question_id,
            current_group: new.progress.current_group,
            group_order: new.progress.group_order,
            screen_size: new.screen_size,
            created_at: new.created_at,
            updated_at: new.created_at,
            finished_at: None,
            question_requested_time: None,
            completed: false,
            version: 0,
        };
        inner.sessions.insert(session.id, session.clone());
        Ok(session)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create(&self, new: NewQuizSession) -> Result<QuizSession, StoreError> {
        let mut inner = self.lock();
        Self::insert(&mut inner, new)
    }

    async fn supersede_and_create(
        &self,
        previous: &QuizSession,
        new: NewQuizSession,
    ) -> Result<QuizSession, StoreError> {
        let mut inner = self.lock();

        if !previous.is_finished() {
            let stored = inner
                .sessions
                .get(&previous.id)
                .ok_or(StoreError::NotFound)?;
            if stored.version != previous.version {
                return Err(StoreError::Conflict(format!(
                    "session {} changed while being superseded",
                    previous.id
                )));
            }
            let mut finished = stored.clone();
            finished.finish(new.created_at);
            finished.version += 1;

            // Check the insert before committing the finish, so a failure leaves no trace.
            let others_active = inner
                .sessions
                .values()
                .any(|s| s.id != previous.id && s.user_id == new.user_id && !s.is_finished());
            if others_active {
                return Err(StoreError::Conflict(
                    "user already has an active session".to_string(),
                ));
            }
            inner.sessions.insert(finished.id, finished);
        }

        Self::insert(&mut inner, new)
    }

    async fn get(&self, id: i64) -> Result<Option<QuizSession>, StoreError> {
        Ok(self.lock().sessions.get(&id).cloned())
    }

    async fn latest_for_user(&self, user_id: i64) -> Result<Option<QuizSession>, StoreError> {
        // Ids grow with creation time, so the highest id is the newest.
        Ok(self
            .lock()
            .sessions
            .values()
            .rev()
            .find(|s| s.user_id == user_id)
            .cloned())
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<QuizSession>, StoreError> {
        Ok(self
            .lock()
            .sessions
            .values()
            .rev()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn update(&self, session: &QuizSession) -> Result<QuizSession, StoreError> {
        let mut inner = self.lock();
        let stored = inner.sessions.get(&session.id).ok_or(StoreError::NotFound)?;
        if stored.version != session.version {
            return Err(StoreError::Conflict(format!(
                "session {} was modified concurrently",
                session.id
            )));
        }
        let mut updated = session.clone();
        updated.version += 1;
        inner.sessions.insert(updated.id, updated.clone());
        Ok(updated)
    }
}

#[async_trait]
impl QuestionRepository for MemoryStore {
    async fn question_by_id(&self, id: i64) -> Result<Option<Question>, StoreError> {
        Ok(self.lock().questions.get(&id).cloned())
    }

    async fn correct_option_for_question(&self, id: i64) -> Result<Option<String>, StoreError> {
        Ok(self
            .lock()
            .questions
            .get(&id)
            .map(|q| q.correct_option.clone()))
    }

    async fn options_for_question(&self, id: i64) -> Result<Vec<String>, StoreError> {
        Ok(self
            .lock()
            .questions
            .get(&id)
            .map(|q| q.options.clone())
            .unwrap_or_default())
    }

    async fn all_options(&self) -> Result<Vec<String>, StoreError> {
        let inner = self.lock();
        let mut seen = HashSet::new();
        let mut options = Vec::new();
        for option in inner.questions.values().flat_map(|q| q.options.iter()) {
            if seen.insert(option.as_str()) {
                options.push(option.clone());
            }
        }
        Ok(options)
    }

    async fn first_group(&self) -> Result<Option<GroupId>, StoreError> {
        Ok(self.lock().questions.values().map(|q| q.group).min())
    }

    async fn next_group(&self, after: GroupId) -> Result<Option<GroupId>, StoreError> {
        Ok(self
            .lock()
            .questions
            .values()
            .map(|q| q.group)
            .filter(|g| *g > after)
            .min())
    }

    async fn group_question_ids(&self, group: GroupId) -> Result<Vec<i64>, StoreError> {
        Ok(self
            .lock()
            .questions
            .values()
            .filter(|q| q.group == group)
            .map(|q| q.id)
            .collect())
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn all_settings(&self) -> Result<Vec<Setting>, StoreError> {
        Ok(self
            .lock()
            .settings
            .iter()
            .map(|(name, value)| Setting {
                name: name.clone(),
                value: value.clone(),
            })
            .collect())
    }

    async fn get_setting(&self, name: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().settings.get(name).cloned())
    }

    async fn save_setting(&self, setting: &Setting) -> Result<(), StoreError> {
        self.lock()
            .settings
            .insert(setting.name.clone(), setting.value.clone());
        Ok(())
    }
}
