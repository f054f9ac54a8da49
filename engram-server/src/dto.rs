//! Request/response bodies for the REST surface (spec.md §6). Handlers
//! translate these to/from `engram-core` domain types; no domain type is
//! serialized to the wire directly so the wire shape can evolve
//! independently of the store schema.

use engram_core::models::{ConflictResolution, Job, Title};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct JobDto {
    pub id: i64,
    pub drive_id: String,
    pub volume_label: String,
    pub content_type: &'static str,
    pub detected_title: Option<String>,
    pub detected_season: Option<u32>,
    pub disc_number: u32,
    pub state: &'static str,
    pub progress_percent: f64,
    pub speed: Option<String>,
    pub eta_seconds: Option<u64>,
    pub error_message: Option<String>,
    pub review_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Job> for JobDto {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            drive_id: job.drive_id,
            volume_label: job.volume_label,
            content_type: job.content_type.as_str(),
            detected_title: job.detected_title,
            detected_season: job.detected_season,
            disc_number: job.disc_number,
            state: job.state.as_str(),
            progress_percent: job.progress.percent,
            speed: job.progress.speed,
            eta_seconds: job.progress.eta_seconds,
            error_message: job.error_message,
            review_reason: job.review_reason,
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TitleDto {
    pub id: i64,
    pub job_id: i64,
    pub title_index: u32,
    pub duration_seconds: u32,
    pub state: &'static str,
    pub is_selected: bool,
    pub matched_episode: Option<String>,
    pub match_confidence: f64,
    pub organized_to: Option<String>,
    pub is_extra: bool,
    pub skipped: bool,
    pub error_message: Option<String>,
}

impl From<Title> for TitleDto {
    fn from(title: Title) -> Self {
        Self {
            id: title.id,
            job_id: title.job_id,
            title_index: title.title_index,
            duration_seconds: title.duration_seconds,
            state: title.state.as_str(),
            is_selected: title.is_selected,
            matched_episode: title.matched_episode,
            match_confidence: title.match_confidence,
            organized_to: title.organized_to.map(|p| p.display().to_string()),
            is_extra: title.is_extra,
            skipped: title.skipped,
            error_message: title.error_message,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SimulateInsertRequest {
    pub drive_id: String,
    pub volume_label: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub simulate_ripping: bool,
}

/// A reviewer's decision for a job parked in `review_needed` (spec.md §6
/// `resolve_review`).
#[derive(Debug, Deserialize)]
pub struct ResolveReviewRequest {
    pub choice: ReviewChoice,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub year: Option<u32>,
    #[serde(default)]
    pub conflict_resolution: Option<ConflictResolution>,
    #[serde(default)]
    pub title_assignments: Vec<TitleAssignment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewChoice {
    Retry,
    Accept,
    Cancel,
}

#[derive(Debug, Deserialize)]
pub struct TitleAssignment {
    pub title_id: i64,
    pub episode_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SettingsDto {
    pub movies_library_path: Option<String>,
    pub tv_library_path: Option<String>,
    pub staging_path: Option<String>,
    pub conflict_resolution_default: &'static str,
    pub matcher_min_confidence: f64,
    pub max_concurrent_matches: usize,
    pub analyst_movie_min_duration: u32,
    pub analyst_tv_duration_variance: u32,
    pub analyst_tv_min_cluster_size: usize,
    pub analyst_tv_min_duration: u32,
    pub analyst_tv_max_duration: u32,
    pub analyst_movie_dominance_threshold: f64,
}

impl From<engram_core::settings::Settings> for SettingsDto {
    fn from(s: engram_core::settings::Settings) -> Self {
        Self {
            movies_library_path: s.movies_library_path.map(|p| p.display().to_string()),
            tv_library_path: s.tv_library_path.map(|p| p.display().to_string()),
            staging_path: s.staging_path.map(|p| p.display().to_string()),
            conflict_resolution_default: s.conflict_resolution_default.as_str(),
            matcher_min_confidence: s.matcher_min_confidence,
            max_concurrent_matches: s.max_concurrent_matches,
            analyst_movie_min_duration: s.analyst_movie_min_duration,
            analyst_tv_duration_variance: s.analyst_tv_duration_variance,
            analyst_tv_min_cluster_size: s.analyst_tv_min_cluster_size,
            analyst_tv_min_duration: s.analyst_tv_min_duration,
            analyst_tv_max_duration: s.analyst_tv_max_duration,
            analyst_movie_dominance_threshold: s.analyst_movie_dominance_threshold,
        }
    }
}

/// Partial settings update. A field set to an empty string for a
/// credential-bearing path is treated as "leave unchanged", matching the
/// original's sensitive-field update semantics; everything else here has
/// no credential content so plain `Option` overwrite is sufficient.
#[derive(Debug, Deserialize, Default)]
pub struct SettingsUpdateRequest {
    pub movies_library_path: Option<String>,
    pub tv_library_path: Option<String>,
    pub staging_path: Option<String>,
    pub conflict_resolution_default: Option<String>,
    pub matcher_min_confidence: Option<f64>,
    pub max_concurrent_matches: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ToolDetectionResult {
    pub found: bool,
    pub path: Option<String>,
    pub version: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DetectToolsResponse {
    pub makemkv: ToolDetectionResult,
    pub ffmpeg: ToolDetectionResult,
    pub platform: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ValidateToolRequest {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateToolResponse {
    pub valid: bool,
    pub error: Option<String>,
    pub version: Option<String>,
}
