// src/clients/outbox.rs

use std::{sync::Arc, time::Duration};

use tokio::sync::{mpsc, oneshot};

use super::stats::{StatsDelivery, StatsRecorder};
use crate::models::{answer::QuestionAnswer, session::QuizSession};

/// One event for the stats service, queued after the session write committed.
#[derive(Debug, Clone)]
pub enum StatsEvent {
    SessionStarted(QuizSession),
    AnswerRecorded {
        session_id: i64,
        answer: QuestionAnswer,
    },
    SessionFinished(i64),
}

impl StatsEvent {
    fn name(&self) -> &'static str {
        match self {
            StatsEvent::SessionStarted(_) => "save_session",
            StatsEvent::AnswerRecorded { .. } => "save_response",
            StatsEvent::SessionFinished(_) => "finish_session",
        }
    }

    fn session_id(&self) -> i64 {
        match self {
            StatsEvent::SessionStarted(session) => session.id,
            StatsEvent::AnswerRecorded { session_id, .. } => *session_id,
            StatsEvent::SessionFinished(session_id) => *session_id,
        }
    }
}

enum Command {
    Deliver(StatsEvent),
    Flush(oneshot::Sender<()>),
}

/// Bounded queue in front of a `StatsRecorder`.
///
/// `publish` never waits: a single worker task delivers events in order, each
/// bounded by `deadline`. A full queue drops the event with a warning.
#[derive(Clone)]
pub struct StatsOutbox {
    tx: mpsc::Sender<Command>,
}

impl StatsOutbox {
    /// Spawns the delivery worker. Must be called inside a Tokio runtime.
    pub fn start(recorder: Arc<dyn StatsRecorder>, deadline: Duration, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(run_worker(recorder, deadline, rx));
        Self { tx }
    }

    pub fn publish(&self, event: StatsEvent) {
        let (name, session_id) = (event.name(), event.session_id());
        match self.tx.try_send(Command::Deliver(event)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    "Stats queue full, dropping {} for session {}",
                    name,
                    session_id
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(
                    "Stats worker stopped, dropping {} for session {}",
                    name,
                    session_id
                );
            }
        }
    }

    /// Waits until every event published before this call has been handled.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn run_worker(
    recorder: Arc<dyn StatsRecorder>,
    deadline: Duration,
    mut rx: mpsc::Receiver<Command>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Deliver(event) => deliver(recorder.as_ref(), deadline, event).await,
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Stats worker stopped");
}

async fn deliver(recorder: &dyn StatsRecorder, deadline: Duration, event: StatsEvent) {
    let (name, session_id) = (event.name(), event.session_id());
    let delivery = match &event {
        StatsEvent::SessionStarted(session) => {
            tokio::time::timeout(deadline, recorder.save_session(session)).await
        }
        StatsEvent::AnswerRecorded { session_id, answer } => {
            tokio::time::timeout(deadline, recorder.save_response(*session_id, answer)).await
        }
        StatsEvent::SessionFinished(session_id) => {
            tokio::time::timeout(deadline, recorder.finish_session(*session_id)).await
        }
    };

    match delivery {
        Ok(StatsDelivery::Delivered) => {
            tracing::debug!("Stats event {} for session {} delivered", name, session_id);
        }
        Ok(StatsDelivery::Skipped) => {}
        Ok(StatsDelivery::Failed(reason)) => {
            tracing::warn!(
                "Stats event {} for session {} lost: {}",
                name,
                session_id,
                reason
            );
        }
        Err(_) => {
            tracing::warn!(
                "Stats event {} for session {} timed out after {:?}",
                name,
                session_id,
                deadline
            );
        }
    }
}
