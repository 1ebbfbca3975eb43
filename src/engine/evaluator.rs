// src/engine/evaluator.rs

use chrono::{DateTime, Utc};

use crate::models::{answer::QuestionAnswer, session::QuizSession};

/// Compares a free-text submission with the correct option label.
/// Leading/trailing whitespace and letter case are ignored; nothing else is.
pub fn is_correct(submitted: &str, correct: &str) -> bool {
    submitted.trim().to_lowercase() == correct.trim().to_lowercase()
}

/// Milliseconds since the question was served, clamped at zero.
/// A question that was never requested counts as answered instantly.
pub fn elapsed_ms(requested_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
    requested_at
        .map(|t| (now - t).num_milliseconds().max(0))
        .unwrap_or(0)
}

/// Scores one submission against the session's current question.
pub fn evaluate(
    session: &QuizSession,
    submitted: &str,
    correct_option: &str,
    case_code: &str,
    screen_size: Option<String>,
    now: DateTime<Utc>,
) -> QuestionAnswer {
    QuestionAnswer {
        question_id: session.current_question_id,
        answer: submitted.trim().to_string(),
        is_correct: is_correct(submitted, correct_option),
        time_spent_ms: elapsed_ms(session.question_requested_time, now),
        screen_size: screen_size.or_else(|| session.screen_size.clone()),
        case_code: case_code.to_string(),
        user_id: session.user_id,
        quiz_mode: session.mode,
        time: now,
    }
}
