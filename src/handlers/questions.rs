// src/handlers/questions.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};

use super::sessions::parse_id;
use crate::{error::AppError, models::question::PublicQuestion, storage::QuestionRepository};

/// Fetches a single question by id, stripped of answer-revealing data.
pub async fn get_question(
    State(questions): State<Arc<dyn QuestionRepository>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let question_id = parse_id(&id)?;
    let question = questions
        .question_by_id(question_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Question not found".to_string()))?;

    Ok(Json(PublicQuestion::from(question)))
}

/// Lists every option label known to the question bank.
pub async fn list_options(
    State(questions): State<Arc<dyn QuestionRepository>>,
) -> Result<impl IntoResponse, AppError> {
    let options = questions.all_options().await?;
    Ok(Json(options))
}
