// src/models/session.rs

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Opaque, totally ordered key of a question group.
/// "Next group" is always the smallest key exceeding the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub i64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Quiz mode chosen at start. Only `Educational` reveals correctness right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizMode {
    Educational,
    Classic,
    LimitedTime,
}

impl QuizMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuizMode::Educational => "educational",
            QuizMode::Classic => "classic",
            QuizMode::LimitedTime => "limited_time",
        }
    }

    /// Whether the examinee learns the correct answer after each submission.
    pub fn reveals_answers(&self) -> bool {
        matches!(self, QuizMode::Educational)
    }
}

impl FromStr for QuizMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "educational" => Ok(QuizMode::Educational),
            "classic" => Ok(QuizMode::Classic),
            "limited_time" => Ok(QuizMode::LimitedTime),
            other => Err(format!("unknown quiz mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    InProgress,
    Finished,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::NotStarted => "not_started",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Finished => "finished",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(SessionStatus::NotStarted),
            "in_progress" => Ok(SessionStatus::InProgress),
            "finished" => Ok(SessionStatus::Finished),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// One examinee's attempt at the quiz.
///
/// While `status != Finished`, `current_question_id` is an element of
/// `group_order` and `group_order` is non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizSession {
    pub id: i64,
    pub user_id: i64,
    pub mode: QuizMode,
    pub status: SessionStatus,
    pub current_question_id: i64,
    pub current_group: GroupId,

    /// Materialized permutation of the current group's question ids.
    /// Traversal follows insertion order.
    pub group_order: Vec<i64>,

    pub screen_size: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub question_requested_time: Option<DateTime<Utc>>,

    /// Set once the last group has been exhausted.
    pub completed: bool,

    /// Row version for optimistic concurrency. Bumped by the store on every write.
    #[serde(skip_serializing)]
    pub version: i64,
}

impl QuizSession {
    pub fn is_finished(&self) -> bool {
        self.status == SessionStatus::Finished
    }

    /// Marks the session finished. Returns `false` if it already was.
    pub fn finish(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_finished() {
            return false;
        }
        self.status = SessionStatus::Finished;
        self.finished_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Progress that a superseding session may take over.
    /// Completed sessions and sessions with a broken position yield `None`.
    pub fn inheritable_progress(&self) -> Option<Progress> {
        if self.completed
            || self.group_order.is_empty()
            || !self.group_order.contains(&self.current_question_id)
        {
            return None;
        }
        Some(Progress {
            current_group: self.current_group,
            group_order: self.group_order.clone(),
            current_question_id: self.current_question_id,
        })
    }
}

/// Position within the quiz, carried from one session to the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub current_group: GroupId,
    pub group_order: Vec<i64>,
    pub current_question_id: i64,
}

/// Fields of a session about to be inserted. The store assigns `id` and `version`.
#[derive(Debug, Clone)]
pub struct NewQuizSession {
    pub user_id: i64,
    pub mode: QuizMode,
    pub progress: Progress,
    pub screen_size: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// DTO for starting a quiz.
#[derive(Debug, Deserialize, Validate)]
pub struct StartQuizRequest {
    pub mode: QuizMode,
    #[validate(length(min = 1, max = 32))]
    pub screen_size: Option<String>,
}

/// DTO returned by the start endpoint.
#[derive(Debug, Serialize)]
pub struct StartQuizResponse {
    pub session: QuizSession,
    /// Seconds allowed for the whole attempt; only set in limited-time mode.
    pub time_limit: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<QuizSession>,
}
