// src/clients/stats.rs

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{
    answer::QuestionAnswer,
    session::{QuizMode, QuizSession},
};

/// Outcome of handing one event to the stats service.
///
/// Not a `Result`: stats are best effort and callers may drop the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsDelivery {
    Delivered,
    /// No stats service configured.
    Skipped,
    /// Every attempt failed; the event is lost.
    Failed(String),
}

/// Receives quiz events for the statistics service.
///
/// Implementations never fail the caller and must return within a bounded time.
#[async_trait]
pub trait StatsRecorder: Send + Sync {
    async fn save_session(&self, session: &QuizSession) -> StatsDelivery;

    async fn save_response(&self, session_id: i64, answer: &QuestionAnswer) -> StatsDelivery;

    async fn finish_session(&self, session_id: i64) -> StatsDelivery;
}

/// Used when no stats service is configured.
#[derive(Debug, Clone, Default)]
pub struct NoopStatsRecorder;

#[async_trait]
impl StatsRecorder for NoopStatsRecorder {
    async fn save_session(&self, _session: &QuizSession) -> StatsDelivery {
        StatsDelivery::Skipped
    }

    async fn save_response(&self, _session_id: i64, _answer: &QuestionAnswer) -> StatsDelivery {
        StatsDelivery::Skipped
    }

    async fn finish_session(&self, _session_id: i64) -> StatsDelivery {
        StatsDelivery::Skipped
    }
}

/// Retry policy for outbound stats calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    /// Upper bound for a single attempt.
    pub attempt_timeout: Duration,
}

/// Posts events to the stats service:
/// `/saveSession`, `/{id}/saveResponse`, `/{id}/finish`.
#[derive(Clone)]
pub struct HttpStatsRecorder {
    client: reqwest::Client,
    base_url: String,
    policy: RetryPolicy,
}

#[derive(Serialize)]
struct SessionEvent {
    session_id: i64,
    user_id: i64,
    quiz_mode: QuizMode,
    created_at: DateTime<Utc>,
}

impl HttpStatsRecorder {
    pub fn new(base_url: impl Into<String>, policy: RetryPolicy) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(policy.attempt_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            policy,
        })
    }

    /// Sends one event, retrying transport errors and 5xx responses.
    async fn deliver<B: Serialize + Sync>(&self, path: &str, body: Option<&B>) -> StatsDelivery {
        let url = format!("{}{}", self.base_url, path);
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let mut request = self.client.post(&url);
            if let Some(body) = body {
                request = request.json(body);
            }

            let outcome = tokio::time::timeout(self.policy.attempt_timeout, request.send()).await;
            match outcome {
                Ok(Ok(response)) if response.status().is_success() => {
                    return StatsDelivery::Delivered;
                }
                Ok(Ok(response)) if response.status().is_client_error() => {
                    // The stats service will not accept this payload on retry either.
                    return StatsDelivery::Failed(format!("{} returned {}", url, response.status()));
                }
                Ok(Ok(response)) => last_error = format!("{} returned {}", url, response.status()),
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = format!("{} timed out", url),
            }

            tracing::debug!(
                "Stats delivery attempt {}/{} failed: {}",
                attempt,
                attempts,
                last_error
            );
            if attempt < attempts {
                tokio::time::sleep(self.policy.backoff).await;
            }
        }

        StatsDelivery::Failed(last_error)
    }
}

#[async_trait]
impl StatsRecorder for HttpStatsRecorder {
    async fn save_session(&self, session: &QuizSession) -> StatsDelivery {
        let event = SessionEvent {
            session_id: session.id,
            user_id: session.user_id,
            quiz_mode: session.mode,
            created_at: session.created_at,
        };
        self.deliver("/saveSession", Some(&event)).await
    }

    async fn save_response(&self, session_id: i64, answer: &QuestionAnswer) -> StatsDelivery {
        self.deliver(&format!("/{}/saveResponse", session_id), Some(answer))
            .await
    }

    async fn finish_session(&self, session_id: i64) -> StatsDelivery {
        self.deliver::<()>(&format!("/{}/finish", session_id), None)
            .await
    }
}
