// src/models/answer.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::session::QuizMode;

/// One scored submission, forwarded to the stats service.
/// Built per request and never stored by this service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionAnswer {
    pub question_id: i64,
    pub answer: String,
    pub is_correct: bool,

    /// Milliseconds between serving the question and receiving the answer.
    pub time_spent_ms: i64,

    pub screen_size: Option<String>,
    pub case_code: String,
    pub user_id: i64,
    pub quiz_mode: QuizMode,
    pub time: DateTime<Utc>,
}

/// DTO for submitting an answer.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitAnswerRequest {
    /// The question the examinee is answering. Must match the session's current question.
    pub question_id: i64,

    /// Free-text echo of the chosen option label.
    #[validate(length(min = 1, max = 500))]
    pub answer: String,

    #[validate(length(min = 1, max = 32))]
    pub screen_size: Option<String>,
}

/// Outcome of a submission as returned to the examinee.
/// `is_correct` and `correct_answer` are only filled in educational mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitAnswerResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    pub finished: bool,
    pub next_question_id: Option<i64>,
}
