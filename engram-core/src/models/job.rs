use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content classification for a disc (spec.md §3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Tv,
    Movie,
    Unknown,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Tv => "tv",
            ContentType::Movie => "movie",
            ContentType::Unknown => "unknown",
        }
    }
}

/// Job lifecycle states (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Identifying,
    ReviewNeeded,
    Ripping,
    Matching,
    Organizing,
    Completed,
    Failed,
}

impl JobState {
    /// Terminal states have no outgoing transitions (spec.md §4.2).
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Identifying => "identifying",
            JobState::ReviewNeeded => "review_needed",
            JobState::Ripping => "ripping",
            JobState::Matching => "matching",
            JobState::Organizing => "organizing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

/// Per-job rip progress (spec.md §3 "Job").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Progress {
    pub percent: f64,
    pub speed: Option<String>,
    pub eta_seconds: Option<u64>,
    pub current_title_index: Option<u32>,
    pub total_titles: Option<u32>,
}

/// Subtitle download progress for a job's reference corpus (spec.md §4.5).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubtitleProgress {
    pub downloaded: u32,
    pub total: u32,
    pub failed: u32,
}

/// One disc insertion (spec.md §3 "Job").
///
/// Created on drive insertion, mutated only by the job manager, and
/// destroyed only by explicit user deletion once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub drive_id: String,
    pub volume_label: String,
    pub content_type: ContentType,
    pub detected_title: Option<String>,
    pub detected_season: Option<u32>,
    pub disc_number: u32,
    pub staging_path: Option<PathBuf>,
    pub progress: Progress,
    pub subtitle_progress: SubtitleProgress,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub review_reason: Option<String>,
}

impl Job {
    pub fn new(id: i64, drive_id: impl Into<String>, volume_label: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            drive_id: drive_id.into(),
            volume_label: volume_label.into(),
            content_type: ContentType::Unknown,
            detected_title: None,
            detected_season: None,
            disc_number: 1,
            staging_path: None,
            progress: Progress::default(),
            subtitle_progress: SubtitleProgress::default(),
            state: JobState::Idle,
            created_at: now,
            updated_at: now,
            error_message: None,
            review_reason: None,
        }
    }
}
