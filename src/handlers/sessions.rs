// src/handlers/sessions.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use validator::Validate;

use crate::{
    clients::auth::Principal,
    engine::SessionOrchestrator,
    error::AppError,
    models::{
        answer::SubmitAnswerRequest,
        session::{SessionListResponse, StartQuizRequest},
    },
};

/// Parses a path segment as a session or question id.
/// Axum's own `Path<i64>` rejection would not use the JSON error body.
pub(crate) fn parse_id(raw: &str) -> Result<i64, AppError> {
    raw.parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::BadRequest(format!("Invalid id: {}", raw)))
}

/// Unwraps a JSON body, reporting malformed payloads as 400 instead of axum's 422.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

/// Starts a quiz session for the caller.
/// A still-running session of the same user is finished and its position carried over.
pub async fn start_session(
    State(orchestrator): State<Arc<SessionOrchestrator>>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<StartQuizRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = json_body(payload)?;
    req.validate()?;

    let response = orchestrator.start(&principal, req).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Returns the question the session is currently on.
pub async fn next_question(
    State(orchestrator): State<Arc<SessionOrchestrator>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let session_id = parse_id(&id)?;
    let question = orchestrator.next_question(&principal, session_id).await?;
    Ok(Json(question))
}

pub async fn submit_answer(
    State(orchestrator): State<Arc<SessionOrchestrator>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    payload: Result<Json<SubmitAnswerRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let session_id = parse_id(&id)?;
    let req = json_body(payload)?;
    req.validate()?;

    let outcome = orchestrator
        .submit_answer(&principal, session_id, req)
        .await?;
    Ok(Json(outcome))
}

/// Returns one of the caller's sessions.
pub async fn get_session(
    State(orchestrator): State<Arc<SessionOrchestrator>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let session_id = parse_id(&id)?;
    let session = orchestrator.get(&principal, session_id).await?;
    Ok(Json(session))
}

pub async fn finish_session(
    State(orchestrator): State<Arc<SessionOrchestrator>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let session_id = parse_id(&id)?;
    let session = orchestrator.finish(&principal, session_id).await?;
    Ok(Json(session))
}

/// Lists the caller's sessions, newest first.
pub async fn list_sessions(
    State(orchestrator): State<Arc<SessionOrchestrator>>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse, AppError> {
    let sessions = orchestrator.list(&principal).await?;
    Ok(Json(SessionListResponse { sessions }))
}
