//! Job CRUD, cancellation, the `simulate_insert` testing hook, and
//! `resolve_review` (spec.md §6).

use axum::extract::{Path, State};
use axum::Json;
use engram_core::models::{ContentType, TitleState};
use tracing::info;

use crate::dto::{
    JobDto, ResolveReviewRequest, ReviewChoice, SimulateInsertRequest, TitleDto,
};
use crate::errors::{AppError, AppResult};
use crate::state::AppState;

pub async fn list_jobs(State(state): State<AppState>) -> AppResult<Json<Vec<JobDto>>> {
    let jobs = state.store.list_jobs().await?;
    Ok(Json(jobs.into_iter().map(JobDto::from).collect()))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> AppResult<Json<JobDto>> {
    let job = state.store.get_job(job_id).await?;
    Ok(Json(job.into()))
}

pub async fn list_titles(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> AppResult<Json<Vec<TitleDto>>> {
    let titles = state.store.titles_for_job(job_id).await?;
    Ok(Json(titles.into_iter().map(TitleDto::from).collect()))
}

pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> AppResult<()> {
    state.store.delete_job(job_id).await?;
    Ok(())
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> AppResult<()> {
    state.job_manager.cancel_job(job_id).await?;
    Ok(())
}

/// Testing hook: synthesizes a disc-insertion event with the same effect
/// as a real one, so the pipeline can be exercised without hardware
/// (spec.md §6).
pub async fn simulate_insert(
    State(state): State<AppState>,
    Json(request): Json<SimulateInsertRequest>,
) -> AppResult<()> {
    info!(
        drive_id = %request.drive_id,
        volume_label = %request.volume_label,
        simulate_ripping = request.simulate_ripping,
        "simulating disc insertion"
    );
    let _ = request.content_type.as_deref().map(parse_content_type_hint);
    state
        .broadcaster
        .drive_event(&request.drive_id, true, &request.volume_label);
    Ok(())
}

fn parse_content_type_hint(value: &str) -> ContentType {
    match value {
        "tv" => ContentType::Tv,
        "movie" => ContentType::Movie,
        _ => ContentType::Unknown,
    }
}

/// Supplies the decision for a job parked in `review_needed`. `Accept`
/// applies any title assignments and re-enters the organizing stage;
/// `Retry` re-runs identification; `Cancel` fails the job outright.
pub async fn resolve_review(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
    Json(request): Json<ResolveReviewRequest>,
) -> AppResult<Json<JobDto>> {
    let job = state.store.get_job(job_id).await?;
    if job.state != engram_core::models::JobState::ReviewNeeded {
        return Err(AppError::conflict(format!(
            "job {job_id} is not awaiting review (state is {:?})",
            job.state
        )));
    }

    match request.choice {
        ReviewChoice::Cancel => {
            let job = state.store.set_job_error(job_id, "cancelled by user").await?;
            state
                .job_manager
                .fail_review_job(&job, "cancelled by user")
                .await?;
        }
        ReviewChoice::Retry => {
            state.job_manager.retry_from_review(job_id).await?;
        }
        ReviewChoice::Accept => {
            for assignment in &request.title_assignments {
                if let Some(episode_code) = &assignment.episode_code {
                    state
                        .store
                        .update_title_match(assignment.title_id, Some(episode_code), 1.0, &Default::default())
                        .await?;
                }
                let title = state.store.get_title(assignment.title_id).await?;
                if title.state == TitleState::Review {
                    let _ = state
                        .job_manager
                        .resolve_title_review(job_id, assignment.title_id)
                        .await;
                }
            }
            state
                .job_manager
                .resume_from_review(job_id, request.name, request.year, request.conflict_resolution)
                .await?;
        }
    }

    let job = state.store.get_job(job_id).await?;
    Ok(Json(job.into()))
}
