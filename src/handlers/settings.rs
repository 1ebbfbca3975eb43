// src/handlers/settings.rs

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    response::IntoResponse,
};
use validator::Validate;

use super::sessions::json_body;
use crate::{
    clients::auth::Principal,
    error::AppError,
    models::settings::{Setting, TIME_LIMIT_KEY},
    storage::SettingsStore,
};

pub async fn list_settings(
    State(settings): State<Arc<dyn SettingsStore>>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(settings.all_settings().await?))
}

/// Upserts quiz settings.
/// Admin only. Every entry is validated before any is written.
pub async fn update_settings(
    State(settings): State<Arc<dyn SettingsStore>>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<Vec<Setting>>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let updates = json_body(payload)?;
    if updates.is_empty() {
        return Err(AppError::BadRequest("No settings given".to_string()));
    }
    for setting in &updates {
        setting.validate()?;
        if setting.name == TIME_LIMIT_KEY && setting.value.parse::<u64>().is_err() {
            return Err(AppError::BadRequest(format!(
                "'{}' must be a whole number of seconds",
                TIME_LIMIT_KEY
            )));
        }
    }

    for setting in &updates {
        settings.save_setting(setting).await?;
        tracing::info!(
            "Setting '{}' changed to '{}' by user {}",
            setting.name,
            setting.value,
            principal.user_id
        );
    }

    Ok(Json(settings.all_settings().await?))
}
