//! Job and title state machines (spec.md §4.2).
//!
//! Every persisted state change goes through here: the caller proposes
//! `(id, target_state)`, the machine validates against the transition
//! table, commits to the store, then broadcasts. A failed broadcast is
//! logged but never rolls back the commit — the store is the source of
//! truth, the broadcast is a best-effort notification.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::broadcaster::{Event, EventBroadcaster};
use crate::error::{EngramError, Result};
use crate::models::{Job, JobState, Title, TitleState};

fn job_transition_allowed(from: JobState, to: JobState) -> bool {
    use JobState::*;
    if from == to {
        return true;
    }
    matches!(
        (from, to),
        (Idle, Identifying)
            | (Idle, Failed)
            | (Identifying, Ripping)
            | (Identifying, ReviewNeeded)
            | (Identifying, Failed)
            | (ReviewNeeded, Ripping)
            | (ReviewNeeded, Identifying)
            | (ReviewNeeded, Organizing)
            | (ReviewNeeded, Completed)
            | (ReviewNeeded, Failed)
            | (Ripping, Matching)
            | (Ripping, Organizing)
            | (Ripping, ReviewNeeded)
            | (Ripping, Completed)
            | (Ripping, Failed)
            | (Matching, Organizing)
            | (Matching, ReviewNeeded)
            | (Matching, Completed)
            | (Matching, Failed)
            | (Organizing, ReviewNeeded)
            | (Organizing, Completed)
            | (Organizing, Failed)
    )
}

/// Movies skip `Matching` (`Ripping -> Matched` directly); TV titles must
/// traverse it. `Review` may resolve back to `Matched` once the conflict
/// or low-confidence case is settled by a human or the conflict-resolution
/// pass; it may also fail or, once organized, complete.
fn title_transition_allowed(from: TitleState, to: TitleState) -> bool {
    use TitleState::*;
    if from == to {
        return true;
    }
    if to == Failed {
        return !matches!(from, Completed | Failed);
    }
    matches!(
        (from, to),
        (Pending, Ripping)
            | (Ripping, Matching)
            | (Ripping, Matched)
            | (Matching, Matched)
            | (Matching, Review)
            | (Review, Matched)
            | (Review, Completed)
            | (Matched, Completed)
    )
}

/// Persistence seam the state machines commit through. Implemented by
/// [`crate::store::Store`]; kept as a trait so the machines can be tested
/// without a real database.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn commit_job_state(&self, job_id: i64, state: JobState) -> Result<Job>;
}

#[async_trait]
pub trait TitleStore: Send + Sync {
    async fn commit_title_state(&self, title_id: i64, state: TitleState) -> Result<Title>;
}

#[derive(Debug, Default)]
pub struct JobStateMachine;

impl JobStateMachine {
    pub fn new() -> Self {
        Self
    }

    /// Validates `current -> target`, refusing (without error to the
    /// store) anything outside the table in spec.md §4.2.
    pub fn validate(&self, current: JobState, target: JobState) -> Result<()> {
        if current.is_terminal() && current != target {
            return Err(EngramError::Internal(format!(
                "job is in terminal state {:?}, cannot transition to {:?}",
                current, target
            )));
        }
        if !job_transition_allowed(current, target) {
            return Err(EngramError::Internal(format!(
                "illegal job transition {:?} -> {:?}",
                current, target
            )));
        }
        Ok(())
    }

    pub async fn transition(
        &self,
        store: &dyn JobStore,
        broadcaster: &EventBroadcaster,
        job_id: i64,
        current: JobState,
        target: JobState,
    ) -> Result<Job> {
        if let Err(err) = self.validate(current, target) {
            warn!(job_id, ?current, ?target, %err, "job transition refused");
            return Err(err);
        }

        let job = store.commit_job_state(job_id, target).await?;
        info!(job_id, ?current, ?target, "job transitioned");

        broadcaster.broadcast(Event::JobUpdate {
            job_id,
            state: Some(target),
            progress_percent: None,
            current_speed: None,
            eta_seconds: None,
            current_title: None,
            total_titles: None,
            error_message: None,
            content_type: None,
            detected_title: None,
            detected_season: None,
            review_reason: None,
        });

        Ok(job)
    }
}

#[derive(Debug, Default)]
pub struct TitleStateMachine;

impl TitleStateMachine {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, current: TitleState, target: TitleState) -> Result<()> {
        if matches!(current, TitleState::Completed | TitleState::Failed) && current != target {
            return Err(EngramError::Internal(format!(
                "title is in terminal state {:?}, cannot transition to {:?}",
                current, target
            )));
        }
        if !title_transition_allowed(current, target) {
            return Err(EngramError::Internal(format!(
                "illegal title transition {:?} -> {:?}",
                current, target
            )));
        }
        Ok(())
    }

    pub async fn transition(
        &self,
        store: &dyn TitleStore,
        broadcaster: &EventBroadcaster,
        job_id: i64,
        title_id: i64,
        current: TitleState,
        target: TitleState,
    ) -> Result<Title> {
        if let Err(err) = self.validate(current, target) {
            warn!(title_id, ?current, ?target, %err, "title transition refused");
            return Err(err);
        }

        let title = store.commit_title_state(title_id, target).await?;
        info!(title_id, ?current, ?target, "title transitioned");

        broadcaster.broadcast(Event::TitleUpdate {
            job_id,
            title_id,
            state: target,
            matched_episode: None,
            match_confidence: None,
            organized_from: None,
            organized_to: None,
            is_extra: None,
            error_message: None,
        });

        Ok(title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    struct FakeJobStore {
        job: Mutex<Job>,
    }

    #[async_trait]
    impl JobStore for FakeJobStore {
        async fn commit_job_state(&self, _job_id: i64, state: JobState) -> Result<Job> {
            let mut job = self.job.lock().unwrap();
            job.state = state;
            job.updated_at = Utc::now();
            Ok(job.clone())
        }
    }

    fn fake_job() -> FakeJobStore {
        FakeJobStore {
            job: Mutex::new(Job::new(1, "E:", "ARRESTED_DEVELOPMENT_S01")),
        }
    }

    #[tokio::test]
    async fn allows_documented_transitions() {
        let store = fake_job();
        let bus = EventBroadcaster::new();
        let machine = JobStateMachine::new();

        let job = machine
            .transition(&store, &bus, 1, JobState::Idle, JobState::Identifying)
            .await
            .unwrap();
        assert_eq!(job.state, JobState::Identifying);

        machine
            .transition(&store, &bus, 1, JobState::Identifying, JobState::Ripping)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn refuses_skipping_to_organizing_from_idle() {
        let store = fake_job();
        let bus = EventBroadcaster::new();
        let machine = JobStateMachine::new();

        let result = machine
            .transition(&store, &bus, 1, JobState::Idle, JobState::Organizing)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn terminal_states_have_no_outgoing_transitions() {
        let store = fake_job();
        let bus = EventBroadcaster::new();
        let machine = JobStateMachine::new();

        let result = machine
            .transition(&store, &bus, 1, JobState::Completed, JobState::Ripping)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn same_state_transition_is_idempotent() {
        let store = fake_job();
        let bus = EventBroadcaster::new();
        let machine = JobStateMachine::new();

        let result = machine
            .transition(&store, &bus, 1, JobState::Ripping, JobState::Ripping)
            .await;
        assert!(result.is_ok());
    }

    #[test]
    fn movie_titles_may_skip_matching() {
        let machine = TitleStateMachine::new();
        assert!(machine
            .validate(TitleState::Ripping, TitleState::Matched)
            .is_ok());
    }

    #[test]
    fn tv_titles_must_traverse_matching() {
        let machine = TitleStateMachine::new();
        assert!(machine
            .validate(TitleState::Matching, TitleState::Matched)
            .is_ok());
        assert!(machine
            .validate(TitleState::Matching, TitleState::Review)
            .is_ok());
    }

    #[test]
    fn failed_is_reachable_from_any_nonterminal_title_state() {
        let machine = TitleStateMachine::new();
        for state in [
            TitleState::Pending,
            TitleState::Ripping,
            TitleState::Matching,
            TitleState::Matched,
            TitleState::Review,
        ] {
            assert!(machine.validate(state, TitleState::Failed).is_ok());
        }
    }
}
