// src/state.rs

use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    clients::auth::AuthGateway,
    config::Config,
    engine::SessionOrchestrator,
    storage::{QuestionRepository, SettingsStore},
};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SessionOrchestrator>,
    pub questions: Arc<dyn QuestionRepository>,
    pub settings: Arc<dyn SettingsStore>,
    pub auth: Arc<dyn AuthGateway>,
    pub config: Config,
}

impl FromRef<AppState> for Arc<SessionOrchestrator> {
    fn from_ref(state: &AppState) -> Self {
        state.orchestrator.clone()
    }
}

impl FromRef<AppState> for Arc<dyn QuestionRepository> {
    fn from_ref(state: &AppState) -> Self {
        state.questions.clone()
    }
}

impl FromRef<AppState> for Arc<dyn SettingsStore> {
    fn from_ref(state: &AppState) -> Self {
        state.settings.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
