//! Job manager (spec.md §4, §5): wires the drive monitor, analyst,
//! ripping coordinator, matcher, and organizer together behind the job
//! and title state machines.
//!
//! One drive may have at most one active (non-terminal) job at a time
//! (spec.md §5); a disc inserted while its drive already has an active
//! job is logged and otherwise ignored until that job reaches a
//! terminal or review state.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::analyst::label::parse_volume_label;
use crate::analyst::tmdb::TmdbClassifier;
use crate::analyst::{Analyst, TitleInfo as AnalystTitleInfo};
use crate::broadcaster::{DiscoveredTitle, Event, EventBroadcaster};
use crate::drive_monitor::DriveMonitor;
use crate::error::{EngramError, Result};
use crate::matcher::{Matcher, RippedTitle, TitleMatchOutcome};
use crate::models::{ContentType, Job, JobState, Progress, Title, TitleState};
use crate::organizer;
use crate::ripping::process::RipEvent;
use crate::ripping::speed::SpeedCalculator;
use crate::ripping::RippingCoordinator;
use crate::settings::SettingsSnapshot;
use crate::state_machine::{JobStateMachine, TitleStateMachine};
use crate::store::Store;

/// Everything a job's pipeline needs beyond the store/broadcaster/state
/// machines, assembled once at startup and shared by every job.
pub struct JobManagerDeps {
    pub store: Arc<Store>,
    pub broadcaster: Arc<EventBroadcaster>,
    pub drive_monitor: Arc<DriveMonitor>,
    pub ripping: Arc<RippingCoordinator>,
    pub tmdb: Option<Arc<TmdbClassifier>>,
    pub matcher: Arc<Matcher>,
}

pub struct JobManager {
    deps: JobManagerDeps,
    job_machine: JobStateMachine,
    title_machine: TitleStateMachine,
    /// Guards against two concurrent pipelines racing on the same drive;
    /// keyed by `drive_id`.
    active_drives: DashMap<String, i64>,
    cancel_handles: DashMap<i64, crate::ripping::RipHandle>,
    /// Live settings snapshot, refreshed whenever an operator edits
    /// settings (spec.md §5 "the settings record is read frequently,
    /// mutated rarely; mutations take an exclusive lock"). Each pipeline
    /// stage takes its own clone at the point it reads this, so a
    /// mid-run edit never mutates values a job has already captured.
    settings: RwLock<SettingsSnapshot>,
}

impl JobManager {
    pub fn new(deps: JobManagerDeps, settings: SettingsSnapshot) -> Arc<Self> {
        Arc::new(Self {
            deps,
            job_machine: JobStateMachine::new(),
            title_machine: TitleStateMachine::new(),
            active_drives: DashMap::new(),
            cancel_handles: DashMap::new(),
            settings: RwLock::new(settings),
        })
    }

    /// Swaps in a freshly edited settings snapshot. Jobs already in
    /// flight keep the snapshot they started with.
    pub fn update_settings(&self, settings: SettingsSnapshot) {
        *self.settings.write() = settings;
    }

    fn current_settings(&self) -> SettingsSnapshot {
        self.settings.read().clone()
    }

    /// Subscribes to the drive monitor's broadcast and dispatches each
    /// `inserted` event to [`Self::on_drive_inserted`]. Runs until the
    /// broadcaster is dropped; intended to be spawned once at startup.
    pub async fn run(self: Arc<Self>) {
        let mut subscription = self.deps.broadcaster.subscribe();
        info!("job manager listening for drive events");
        while let Some(event) = subscription.recv().await {
            if let Event::DriveEvent {
                drive_id,
                event: "inserted",
                volume_label,
            } = event
            {
                let manager = Arc::clone(&self);
                tokio::spawn(async move {
                    manager.on_drive_inserted(&drive_id, &volume_label).await;
                });
            }
        }
    }

    async fn on_drive_inserted(self: &Arc<Self>, drive_id: &str, volume_label: &str) {
        if self.active_drives.contains_key(drive_id) {
            warn!(drive_id, "disc inserted while drive already has an active job, ignoring");
            return;
        }

        let job = match self.deps.store.active_job_for_drive(drive_id).await {
            Ok(Some(existing)) => existing,
            Ok(None) => match self.deps.store.create_job(drive_id, volume_label).await {
                Ok(job) => job,
                Err(e) => {
                    error!(drive_id, %e, "failed to create job for inserted disc");
                    return;
                }
            },
            Err(e) => {
                error!(drive_id, %e, "failed to look up active job for drive");
                return;
            }
        };

        self.active_drives.insert(drive_id.to_string(), job.id);
        let manager = Arc::clone(self);
        let settings = self.current_settings();
        tokio::spawn(async move {
            manager.run_identification(job, settings).await;
        });
    }

    /// Cancels an in-flight rip, if one is running for this job.
    pub async fn cancel_job(&self, job_id: i64) -> Result<()> {
        let handle = self
            .cancel_handles
            .get(&job_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngramError::Internal(format!("job {job_id} has no in-flight rip to cancel")))?;
        handle.cancel().await;
        Ok(())
    }

    fn release_drive(&self, drive_id: &str) {
        self.active_drives.remove(drive_id);
    }

    /// Hard-fails a job sitting in `review_needed` on an operator's
    /// explicit cancel decision (spec.md §6 `resolve_review`).
    pub async fn fail_review_job(&self, job: &Job, message: &str) -> Result<()> {
        self.fail_job(job, message).await;
        Ok(())
    }

    /// Re-runs identification on a job an operator sent back for another
    /// look, re-scanning the drive from scratch.
    pub async fn retry_from_review(self: &Arc<Self>, job_id: i64) -> Result<()> {
        let job = self.deps.store.get_job(job_id).await?;
        self.active_drives.insert(job.drive_id.clone(), job.id);
        let manager = Arc::clone(self);
        let settings = self.current_settings();
        tokio::spawn(async move {
            manager.run_identification(job, settings).await;
        });
        Ok(())
    }

    /// Accepts a single title's reviewer-supplied episode assignment,
    /// already persisted by the caller, and moves it back to `Matched`.
    pub async fn resolve_title_review(&self, job_id: i64, title_id: i64) -> Result<()> {
        let title = self.deps.store.get_title(title_id).await?;
        self.title_machine
            .transition(
                self.deps.store.as_ref(),
                &self.deps.broadcaster,
                job_id,
                title_id,
                title.state,
                TitleState::Matched,
            )
            .await?;
        Ok(())
    }

    /// Resumes a job out of `review_needed` into organizing, applying an
    /// operator-supplied name/year override and conflict resolution
    /// choice (spec.md §6 `resolve_review`). Ripped titles are recovered
    /// from `organized_from`, which the ripping stage persists on each
    /// title as soon as its output file stabilizes.
    pub async fn resume_from_review(
        self: &Arc<Self>,
        job_id: i64,
        name: Option<String>,
        _year: Option<u32>,
        conflict_resolution: Option<crate::models::ConflictResolution>,
    ) -> Result<()> {
        let job = self.deps.store.get_job(job_id).await?;
        let job = if name.is_some() {
            self.deps
                .store
                .update_job_identification(job.id, job.content_type, name.as_deref(), job.detected_season, None)
                .await?
        } else {
            job
        };

        let job = self
            .job_machine
            .transition(self.deps.store.as_ref(), &self.deps.broadcaster, job.id, job.state, JobState::Organizing)
            .await?;

        let titles = self.deps.store.titles_for_job(job.id).await?;
        let ripped: Vec<RippedTitle> = titles
            .iter()
            .filter_map(|t| t.organized_from.clone().map(|path| RippedTitle { title_id: t.id, path }))
            .collect();

        let mut settings = self.current_settings();
        if let Some(resolution) = conflict_resolution {
            settings.conflict_resolution_default = resolution;
        }

        let manager = Arc::clone(self);
        manager.run_organizing(job, ripped, settings).await;
        Ok(())
    }

    async fn fail_job(&self, job: &Job, message: &str) {
        error!(job_id = job.id, %message, "job failed");
        let _ = self.deps.store.set_job_error(job.id, message).await;
        let _ = self
            .job_machine
            .transition(
                self.deps.store.as_ref(),
                &self.deps.broadcaster,
                job.id,
                job.state,
                JobState::Failed,
            )
            .await;
        self.release_drive(&job.drive_id);
    }

    async fn run_identification(self: Arc<Self>, job: Job, settings: SettingsSnapshot) {
        let job = match self
            .job_machine
            .transition(self.deps.store.as_ref(), &self.deps.broadcaster, job.id, job.state, JobState::Identifying)
            .await
        {
            Ok(job) => job,
            Err(e) => {
                error!(job_id = job.id, %e, "could not move job to identifying");
                self.release_drive(&job.drive_id);
                return;
            }
        };

        let scanned = match self.deps.ripping.scan(&job.drive_id).await {
            Ok(titles) => titles,
            Err(e) => {
                self.fail_job(&job, &format!("scanning drive: {e}")).await;
                return;
            }
        };

        let analyst_titles: Vec<AnalystTitleInfo> = scanned
            .iter()
            .map(|t| AnalystTitleInfo {
                index: t.index,
                duration_seconds: t.duration_seconds,
                size_bytes: t.size_bytes,
                chapter_count: t.chapter_count,
                name: t.name.clone(),
            })
            .collect();

        let tmdb_signal = match (&self.deps.tmdb, parse_volume_label(&job.volume_label).name) {
            (Some(classifier), Some(name)) => classifier.classify(&name).await,
            _ => None,
        };

        let analyst = Analyst::new(settings.analyst.clone());
        let result = analyst.classify(&analyst_titles, &job.volume_label, tmdb_signal);

        let mut titles = Vec::with_capacity(scanned.len());
        for scanned_title in &scanned {
            match self
                .deps
                .store
                .create_title(job.id, scanned_title.index, scanned_title.duration_seconds)
                .await
            {
                Ok(title) => titles.push(title),
                Err(e) => {
                    self.fail_job(&job, &format!("persisting scanned title: {e}")).await;
                    return;
                }
            }
        }

        // "Play All" concatenations are never ripped on their own; drop
        // them out of selection before they ever reach run_ripping.
        for title in &mut titles {
            if result.play_all_title_indices.contains(&title.title_index) {
                match self.deps.store.set_title_selected(title.id, false).await {
                    Ok(updated) => *title = updated,
                    Err(e) => {
                        self.fail_job(&job, &format!("deselecting play-all title: {e}")).await;
                        return;
                    }
                }
            }
        }

        let job = match self
            .deps
            .store
            .update_job_identification(
                job.id,
                result.content_type,
                result.detected_name.as_deref(),
                result.detected_season,
                result.review_reason.as_deref(),
            )
            .await
        {
            Ok(job) => job,
            Err(e) => {
                self.fail_job(&job, &format!("persisting identification: {e}")).await;
                return;
            }
        };

        self.deps.broadcaster.broadcast(Event::TitlesDiscovered {
            job_id: job.id,
            titles: titles
                .iter()
                .map(|t| DiscoveredTitle {
                    title_id: t.id,
                    title_index: t.title_index,
                    duration_seconds: t.duration_seconds,
                    is_selected: t.is_selected,
                })
                .collect(),
            content_type: job.content_type,
            detected_title: job.detected_title.clone(),
            detected_season: job.detected_season,
        });

        let target = if result.needs_review { JobState::ReviewNeeded } else { JobState::Ripping };
        let job = match self
            .job_machine
            .transition(self.deps.store.as_ref(), &self.deps.broadcaster, job.id, job.state, target)
            .await
        {
            Ok(job) => job,
            Err(e) => {
                self.fail_job(&job, &format!("transitioning after identification: {e}")).await;
                return;
            }
        };

        if job.state == JobState::ReviewNeeded {
            info!(job_id = job.id, reason = ?job.review_reason, "job sent to review");
            self.release_drive(&job.drive_id);
            return;
        }

        self.run_ripping(job, titles, settings).await;
    }

    async fn run_ripping(self: Arc<Self>, job: Job, titles: Vec<Title>, settings: SettingsSnapshot) {
        let staging_dir = settings
            .staging_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("/var/tmp/engram/staging"))
            .join(job.id.to_string());

        if let Err(e) = tokio::fs::create_dir_all(&staging_dir).await {
            self.fail_job(&job, &format!("creating staging directory: {e}")).await;
            return;
        }

        let selected: Vec<u32> = titles.iter().filter(|t| t.is_selected).map(|t| t.title_index).collect();
        let (mut events, handle) = match self.deps.ripping.rip(&job.drive_id, selected, staging_dir.clone()) {
            Ok(pair) => pair,
            Err(e) => {
                self.fail_job(&job, &format!("starting rip: {e}")).await;
                return;
            }
        };
        self.cancel_handles.insert(job.id, handle);

        for title in &titles {
            let _ = self
                .title_machine
                .transition(self.deps.store.as_ref(), &self.deps.broadcaster, job.id, title.id, title.state, TitleState::Ripping)
                .await;
        }

        let mut speed = SpeedCalculator::new();
        let mut finished_paths: Vec<(i64, PathBuf)> = Vec::new();
        let mut failed = false;
        let mut failure_message = String::new();

        while let Some(event) = events.recv().await {
            match event {
                RipEvent::TitleStarted { index, .. } => {
                    info!(job_id = job.id, title_index = index, "title rip started");
                }
                RipEvent::BytesWritten { cumulative_bytes, .. } => {
                    speed.record(std::time::Instant::now(), cumulative_bytes);
                    let total_expected: u64 = titles.iter().map(|t| t.expected_size_bytes).sum();
                    let percent = if total_expected == 0 {
                        0.0
                    } else {
                        (cumulative_bytes as f64 / total_expected as f64 * 100.0).min(100.0)
                    };
                    let progress = Progress {
                        percent,
                        speed: speed.human_speed(),
                        eta_seconds: speed.eta_seconds(total_expected),
                        current_title_index: None,
                        total_titles: Some(titles.len() as u32),
                    };
                    let _ = self.deps.store.update_job_progress(job.id, &progress).await;
                    self.deps.broadcaster.broadcast(Event::JobUpdate {
                        job_id: job.id,
                        state: None,
                        progress_percent: Some(progress.percent),
                        current_speed: progress.speed.clone(),
                        eta_seconds: progress.eta_seconds,
                        current_title: None,
                        total_titles: progress.total_titles,
                        error_message: None,
                        content_type: None,
                        detected_title: None,
                        detected_season: None,
                        review_reason: None,
                    });
                }
                RipEvent::TitleFinished { index, output_path } => {
                    if let Some(title) = titles.iter().find(|t| t.title_index == index) {
                        match self
                            .deps
                            .ripping
                            .wait_for_ready(&output_path, title.expected_size_bytes)
                            .await
                        {
                            Ok(()) => {
                                let _ = self
                                    .deps
                                    .store
                                    .update_title_organization(title.id, Some(&output_path), None)
                                    .await;
                                finished_paths.push((title.id, output_path));
                            }
                            Err(e) => {
                                warn!(job_id = job.id, title_index = index, %e, "title output never stabilized");
                                let _ = self.deps.store.set_title_error(title.id, &e.to_string()).await;
                                let _ = self
                                    .title_machine
                                    .transition(
                                        self.deps.store.as_ref(),
                                        &self.deps.broadcaster,
                                        job.id,
                                        title.id,
                                        TitleState::Ripping,
                                        TitleState::Failed,
                                    )
                                    .await;
                            }
                        }
                    }
                }
                RipEvent::FatalError(message) => {
                    warn!(job_id = job.id, %message, "rip tool reported a fatal error");
                    failed = true;
                    failure_message = message;
                    break;
                }
            }
        }

        self.cancel_handles.remove(&job.id);

        if failed {
            self.fail_job(&job, &failure_message).await;
            return;
        }

        let ripped_titles: Vec<RippedTitle> = finished_paths
            .iter()
            .map(|(title_id, path)| RippedTitle { title_id: *title_id, path: path.clone() })
            .collect();

        for (title_id, _) in &finished_paths {
            let next = if job.content_type == ContentType::Tv { TitleState::Matching } else { TitleState::Matched };
            let _ = self
                .title_machine
                .transition(self.deps.store.as_ref(), &self.deps.broadcaster, job.id, *title_id, TitleState::Ripping, next)
                .await;
        }

        let next_state = if job.content_type == ContentType::Tv { JobState::Matching } else { JobState::Organizing };
        let job = match self
            .job_machine
            .transition(self.deps.store.as_ref(), &self.deps.broadcaster, job.id, job.state, next_state)
            .await
        {
            Ok(job) => job,
            Err(e) => {
                self.fail_job(&job, &format!("transitioning after rip: {e}")).await;
                return;
            }
        };

        if job.content_type == ContentType::Tv {
            self.run_matching(job, ripped_titles, settings).await;
        } else {
            self.run_organizing(job, ripped_titles, settings).await;
        }
    }

    async fn run_matching(self: Arc<Self>, job: Job, ripped: Vec<RippedTitle>, settings: SettingsSnapshot) {
        let show_name = job.detected_title.clone().unwrap_or_else(|| job.volume_label.clone());
        let season = job.detected_season.unwrap_or(1);

        let outcomes: Vec<TitleMatchOutcome> = match self
            .deps
            .matcher
            .match_titles(ripped_clone(&ripped), &show_name, season, None)
            .await
        {
            Ok(outcomes) => outcomes,
            Err(e) => {
                self.fail_job(&job, &format!("matching failed: {e}")).await;
                return;
            }
        };

        let mut any_review = false;
        for outcome in &outcomes {
            let current = match self.deps.store.get_title(outcome.title_id).await {
                Ok(title) => title.state,
                Err(_) => TitleState::Matching,
            };

            match &outcome.decision {
                crate::matcher::vote::TitleDecision::Matched { episode_code, confidence } => {
                    let _ = self
                        .deps
                        .store
                        .update_title_match(outcome.title_id, Some(episode_code), *confidence, &Default::default())
                        .await;
                    let _ = self
                        .title_machine
                        .transition(self.deps.store.as_ref(), &self.deps.broadcaster, job.id, outcome.title_id, current, TitleState::Matched)
                        .await;
                }
                crate::matcher::vote::TitleDecision::NeedsReview => {
                    any_review = true;
                    let _ = self
                        .title_machine
                        .transition(self.deps.store.as_ref(), &self.deps.broadcaster, job.id, outcome.title_id, current, TitleState::Review)
                        .await;
                }
            }
        }

        let next_state = if any_review { JobState::ReviewNeeded } else { JobState::Organizing };
        let job = match self
            .job_machine
            .transition(self.deps.store.as_ref(), &self.deps.broadcaster, job.id, job.state, next_state)
            .await
        {
            Ok(job) => job,
            Err(e) => {
                self.fail_job(&job, &format!("transitioning after matching: {e}")).await;
                return;
            }
        };

        if job.state == JobState::ReviewNeeded {
            info!(job_id = job.id, "job sent to review after matching");
            self.release_drive(&job.drive_id);
            return;
        }

        self.run_organizing(job, ripped, settings).await;
    }

    async fn run_organizing(self: Arc<Self>, job: Job, ripped: Vec<RippedTitle>, settings: SettingsSnapshot) {
        let movies_root = settings.movies_library_path.clone();
        let tv_root = settings.tv_library_path.clone();

        for ripped_title in &ripped {
            let title = match self.deps.store.get_title(ripped_title.title_id).await {
                Ok(title) => title,
                Err(e) => {
                    warn!(job_id = job.id, %e, "could not reload title before organizing");
                    continue;
                }
            };

            let mut is_extra = false;
            let destination = match (job.content_type, &movies_root, &tv_root) {
                (ContentType::Movie, Some(root), _) => {
                    let name = job.detected_title.clone().unwrap_or_else(|| job.volume_label.clone());
                    organizer::movie_path(root, &name, None)
                }
                (ContentType::Tv, _, Some(root)) => {
                    let show = job.detected_title.clone().unwrap_or_else(|| job.volume_label.clone());
                    let season = job.detected_season.unwrap_or(1);
                    match title.matched_episode.as_deref().and_then(parse_episode_number) {
                        Some(episode) => organizer::tv_episode_path(root, &show, season, episode),
                        None => {
                            is_extra = true;
                            organizer::tv_extra_path(root, &show, season, job.disc_number, title.title_index)
                        }
                    }
                }
                _ => {
                    warn!(job_id = job.id, "no library path configured for this content type, sending to review");
                    let _ = self
                        .title_machine
                        .transition(self.deps.store.as_ref(), &self.deps.broadcaster, job.id, title.id, title.state, TitleState::Review)
                        .await;
                    continue;
                }
            };

            if is_extra {
                let _ = self.deps.store.set_title_extra(title.id, true).await;
            }

            let resolved = organizer::resolve_conflict(&destination.path, settings.conflict_resolution_default);
            let target_path = match resolved {
                organizer::ResolvedDestination::Proceed(path) => path,
                organizer::ResolvedDestination::Skip => {
                    info!(job_id = job.id, title_id = title.id, "skipping organization, destination exists");
                    let _ = self.deps.store.set_title_skipped(title.id, true).await;
                    let _ = self
                        .title_machine
                        .transition(self.deps.store.as_ref(), &self.deps.broadcaster, job.id, title.id, title.state, TitleState::Completed)
                        .await;
                    continue;
                }
                organizer::ResolvedDestination::Review(path) => {
                    warn!(job_id = job.id, title_id = title.id, path = %path.display(), "destination conflict needs a decision");
                    let _ = self
                        .title_machine
                        .transition(self.deps.store.as_ref(), &self.deps.broadcaster, job.id, title.id, title.state, TitleState::Review)
                        .await;
                    continue;
                }
            };

            if let Err(e) = organizer::move_into_library(&ripped_title.path, &target_path).await {
                warn!(job_id = job.id, title_id = title.id, %e, "organizing title failed");
                let _ = self.deps.store.set_title_error(title.id, &e.to_string()).await;
                continue;
            }

            let _ = self
                .deps
                .store
                .update_title_organization(title.id, Some(&ripped_title.path), Some(&target_path))
                .await;
            let _ = self
                .title_machine
                .transition(self.deps.store.as_ref(), &self.deps.broadcaster, job.id, title.id, title.state, TitleState::Completed)
                .await;
        }

        let final_titles = match self.deps.store.titles_for_job(job.id).await {
            Ok(titles) => titles,
            Err(_) => Vec::new(),
        };
        let any_unresolved = final_titles.iter().any(|t| !matches!(t.state, TitleState::Completed | TitleState::Failed));
        let final_state = if any_unresolved { JobState::ReviewNeeded } else { JobState::Completed };

        let _ = self
            .job_machine
            .transition(self.deps.store.as_ref(), &self.deps.broadcaster, job.id, job.state, final_state)
            .await;

        self.release_drive(&job.drive_id);
    }
}

fn ripped_clone(titles: &[RippedTitle]) -> Vec<RippedTitle> {
    titles.iter().map(|t| RippedTitle { title_id: t.title_id, path: t.path.clone() }).collect()
}

/// Pulls the episode number out of a canonical `SxxEyy` code.
fn parse_episode_number(episode_code: &str) -> Option<u32> {
    let idx = episode_code.to_ascii_uppercase().find('E')?;
    episode_code[idx + 1..].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_episode_number_from_canonical_code() {
        assert_eq!(parse_episode_number("S01E03"), Some(3));
        assert_eq!(parse_episode_number("S12E108"), Some(108));
        assert_eq!(parse_episode_number("garbage"), None);
    }
}
