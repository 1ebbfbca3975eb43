// src/storage/mod.rs

//! Storage contracts used by the quiz engine, plus their adapters.
//!
//! * [`postgres::PgStore`] is the production adapter.
//! * [`memory::MemoryStore`] keeps everything in process; used by tests and local runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    question::Question,
    session::{GroupId, NewQuizSession, QuizSession},
    settings::Setting,
};

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    /// The row changed since it was read, or the user already has an active session.
    #[error("conflicting write: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Persistence of quiz sessions.
///
/// Every write is a compare-and-swap on [`QuizSession::version`]; a stale
/// write fails with [`StoreError::Conflict`] and leaves the row untouched.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new session. Fails with `Conflict` if the user already has an active one.
    async fn create(&self, new: NewQuizSession) -> Result<QuizSession, StoreError>;

    /// Atomically finish `previous` (unless it already is) and insert `new`.
    async fn supersede_and_create(
        &self,
        previous: &QuizSession,
        new: NewQuizSession,
    ) -> Result<QuizSession, StoreError>;

    async fn get(&self, id: i64) -> Result<Option<QuizSession>, StoreError>;

    /// Most recently created session of the user, finished or not.
    async fn latest_for_user(&self, user_id: i64) -> Result<Option<QuizSession>, StoreError>;

    /// All sessions of the user, newest first.
    async fn list_for_user(&self, user_id: i64) -> Result<Vec<QuizSession>, StoreError>;

    /// Persist `session` if its version is still current.
    /// Returns the stored copy with the bumped version.
    async fn update(&self, session: &QuizSession) -> Result<QuizSession, StoreError>;
}

/// Read-only access to the question bank.
#[async_trait]
pub trait QuestionRepository: Send + Sync {
    async fn question_by_id(&self, id: i64) -> Result<Option<Question>, StoreError>;

    async fn correct_option_for_question(&self, id: i64) -> Result<Option<String>, StoreError>;

    /// Option labels of one question, in display order.
    async fn options_for_question(&self, id: i64) -> Result<Vec<String>, StoreError>;

    /// Every option label known to the bank.
    async fn all_options(&self) -> Result<Vec<String>, StoreError>;

    /// Smallest group key, or `None` if the bank is empty.
    async fn first_group(&self) -> Result<Option<GroupId>, StoreError>;

    /// Smallest group key strictly greater than `after`.
    async fn next_group(&self, after: GroupId) -> Result<Option<GroupId>, StoreError>;

    async fn group_question_ids(&self, group: GroupId) -> Result<Vec<i64>, StoreError>;
}

/// Key/value quiz settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn all_settings(&self) -> Result<Vec<Setting>, StoreError>;

    async fn get_setting(&self, name: &str) -> Result<Option<String>, StoreError>;

    async fn save_setting(&self, setting: &Setting) -> Result<(), StoreError>;
}
