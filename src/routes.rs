// src/routes.rs

use std::time::Duration;

use axum::{
    Router,
    handler::Handler,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::{
    handlers::{health, questions, sessions, settings},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Upper bound for a whole request, outbound calls included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Assembles the main application router.
///
/// * `/health` is public.
/// * Everything under `/quiz` requires a verified principal.
/// * `PUT /quiz/settings` additionally requires the admin role.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allowed_origins(state.config.cors_origin.as_deref()))
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    let quiz_routes = Router::new()
        .route("/sessions", get(sessions::list_sessions))
        .route("/sessions/new", post(sessions::start_session))
        .route("/sessions/{id}", get(sessions::get_session))
        .route("/sessions/{id}/nextQuestion", get(sessions::next_question))
        .route("/sessions/{id}/answer", post(sessions::submit_answer))
        .route("/sessions/{id}/finish", post(sessions::finish_session))
        .route("/questions/{id}", get(questions::get_question))
        .route("/options", get(questions::list_options))
        .route(
            "/settings",
            get(settings::list_settings)
                .put(settings::update_settings.layer(middleware::from_fn(admin_middleware))),
        )
        // Auth runs before the per-route admin check
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health::health))
        .nest("/quiz", quiz_routes)
        // Global Middleware (applied from outside in)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn allowed_origins(configured: Option<&str>) -> Vec<HeaderValue> {
    if let Some(origin) = configured {
        match origin.parse::<HeaderValue>() {
            Ok(value) => return vec![value],
            Err(e) => tracing::warn!("Ignoring invalid CORS_ORIGIN '{}': {}", origin, e),
        }
    }
    vec![
        HeaderValue::from_static("http://localhost:3000"),
        HeaderValue::from_static("http://127.0.0.1:3000"),
    ]
}
