// src/engine/sequencer.rs

use std::sync::Arc;

use rand::seq::SliceRandom;
use thiserror::Error;

use crate::{
    models::session::{GroupId, Progress},
    storage::{QuestionRepository, StoreError},
};

#[derive(Debug, Error)]
pub enum SequenceError {
    /// The session's position is not part of its own group order. Signals data corruption.
    #[error("question {question_id} is not part of the group order of group {group}")]
    PositionLost { question_id: i64, group: GroupId },

    #[error("the question bank has no questions")]
    EmptyBank,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of moving one step forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// Next question within the same group.
    Next(i64),
    /// The group was exhausted; a fresh order for the following group.
    NewGroup(Progress),
    /// No group follows. The quiz is complete.
    Exhausted,
}

/// Decides the traversal order of questions, within and across groups.
#[derive(Clone)]
pub struct GroupSequencer {
    questions: Arc<dyn QuestionRepository>,
}

impl GroupSequencer {
    pub fn new(questions: Arc<dyn QuestionRepository>) -> Self {
        Self { questions }
    }

    /// Progress for a brand new attempt: the first non-empty group, freshly shuffled.
    pub async fn initial_progress(&self) -> Result<Progress, SequenceError> {
        let first = self
            .questions
            .first_group()
            .await?
            .ok_or(SequenceError::EmptyBank)?;

        let ids = self.questions.group_question_ids(first).await?;
        if let Some(progress) = shuffled_progress(first, ids) {
            return Ok(progress);
        }

        match self.progress_after(first).await? {
            Some(progress) => Ok(progress),
            None => Err(SequenceError::EmptyBank),
        }
    }

    /// Moves one step past `current_question_id`.
    pub async fn advance(
        &self,
        current_group: GroupId,
        group_order: &[i64],
        current_question_id: i64,
    ) -> Result<Advance, SequenceError> {
        let position = group_order
            .iter()
            .position(|id| *id == current_question_id)
            .ok_or(SequenceError::PositionLost {
                question_id: current_question_id,
                group: current_group,
            })?;

        if let Some(next) = group_order.get(position + 1) {
            return Ok(Advance::Next(*next));
        }

        Ok(match self.progress_after(current_group).await? {
            Some(progress) => Advance::NewGroup(progress),
            None => Advance::Exhausted,
        })
    }

    /// Shuffled progress for the first non-empty group after `group`.
    async fn progress_after(&self, mut group: GroupId) -> Result<Option<Progress>, SequenceError> {
        while let Some(next) = self.questions.next_group(group).await? {
            let ids = self.questions.group_question_ids(next).await?;
            if let Some(progress) = shuffled_progress(next, ids) {
                return Ok(Some(progress));
            }
            tracing::warn!("Skipping empty question group {}", next);
            group = next;
        }
        Ok(None)
    }
}

/// Uniform random permutation of a group's questions, positioned on the first one.
pub fn shuffled_progress(group: GroupId, mut ids: Vec<i64>) -> Option<Progress> {
    ids.sort_unstable();
    ids.dedup();
    ids.shuffle(&mut rand::thread_rng());
    let first = *ids.first()?;
    Some(Progress {
        current_group: group,
        group_order: ids,
        current_question_id: first,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::question::{Case, Question},
        storage::memory::MemoryStore,
    };

    fn question(id: i64, group: i64) -> Question {
        Question {
            id,
            group: GroupId(group),
            question: format!("Question {}", id),
            options: vec!["Yes".to_string(), "No".to_string()],
            correct_option: "Yes".to_string(),
            prediction_age: 12,
            case: Case {
                id,
                code: format!("C-{}", id),
                gender: "M".to_string(),
                age1: 8,
                age2: 10,
                image1: None,
                image2: None,
                parameters: vec![],
                parameter_values: vec![],
            },
        }
    }

    fn sequencer(questions: Vec<Question>) -> GroupSequencer {
        GroupSequencer::new(Arc::new(MemoryStore::with_questions(questions)))
    }

    fn sorted(mut ids: Vec<i64>) -> Vec<i64> {
        ids.sort();
        ids
    }

    #[test]
    fn shuffle_is_a_permutation_of_the_group() {
        for _ in 0..50 {
            let progress = shuffled_progress(GroupId(1), vec![3, 1, 2, 7, 5]).unwrap();
            assert_eq!(sorted(progress.group_order.clone()), vec![1, 2, 3, 5, 7]);
            assert_eq!(progress.current_question_id, progress.group_order[0]);
        }
    }

    #[test]
    fn shuffle_of_empty_group_is_none() {
        assert!(shuffled_progress(GroupId(1), vec![]).is_none());
    }

    #[tokio::test]
    async fn initial_progress_uses_smallest_group() {
        let seq = sequencer(vec![question(10, 5), question(1, 2), question(2, 2)]);
        let progress = seq.initial_progress().await.unwrap();
        assert_eq!(progress.current_group, GroupId(2));
        assert_eq!(sorted(progress.group_order), vec![1, 2]);
    }

    #[tokio::test]
    async fn initial_progress_on_empty_bank_fails() {
        let seq = sequencer(vec![]);
        assert!(matches!(
            seq.initial_progress().await,
            Err(SequenceError::EmptyBank)
        ));
    }

    #[tokio::test]
    async fn advance_steps_through_order_then_switches_group() {
        let seq = sequencer(vec![
            question(1, 1),
            question(2, 1),
            question(3, 1),
            question(20, 4),
            question(21, 4),
        ]);
        let order = vec![1, 2, 3];

        assert_eq!(
            seq.advance(GroupId(1), &order, 1).await.unwrap(),
            Advance::Next(2)
        );
        assert_eq!(
            seq.advance(GroupId(1), &order, 2).await.unwrap(),
            Advance::Next(3)
        );

        match seq.advance(GroupId(1), &order, 3).await.unwrap() {
            Advance::NewGroup(progress) => {
                assert_eq!(progress.current_group, GroupId(4));
                assert_eq!(sorted(progress.group_order.clone()), vec![20, 21]);
                assert_eq!(progress.current_question_id, progress.group_order[0]);
            }
            other => panic!("expected a new group, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn walking_a_group_visits_every_question_once() {
        let seq = sequencer((1..=6).map(|id| question(id, 1)).collect());
        let progress = seq.initial_progress().await.unwrap();

        let mut visited = vec![progress.current_question_id];
        let mut current = progress.current_question_id;
        loop {
            match seq
                .advance(progress.current_group, &progress.group_order, current)
                .await
                .unwrap()
            {
                Advance::Next(id) => {
                    visited.push(id);
                    current = id;
                }
                Advance::Exhausted => break,
                Advance::NewGroup(_) => panic!("only one group exists"),
            }
        }

        assert_eq!(visited, progress.group_order);
        assert_eq!(sorted(visited), vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn last_question_of_last_group_is_exhausted() {
        let seq = sequencer(vec![question(1, 1)]);
        assert_eq!(
            seq.advance(GroupId(1), &[1], 1).await.unwrap(),
            Advance::Exhausted
        );
    }

    #[tokio::test]
    async fn lost_position_is_an_invariant_error() {
        let seq = sequencer(vec![question(1, 1)]);
        let err = seq.advance(GroupId(1), &[1, 2], 9).await.unwrap_err();
        assert!(matches!(
            err,
            SequenceError::PositionLost { question_id: 9, .. }
        ));
    }
}
