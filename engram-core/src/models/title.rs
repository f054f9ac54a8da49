use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Per-title lifecycle (spec.md §4.2 "Title states").
///
/// Movie titles skip `Matching` (`Ripping` -> `Matched` directly); TV
/// titles must traverse it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleState {
    Pending,
    Ripping,
    Matching,
    Matched,
    Review,
    Completed,
    Failed,
}

impl TitleState {
    pub fn as_str(self) -> &'static str {
        match self {
            TitleState::Pending => "pending",
            TitleState::Ripping => "ripping",
            TitleState::Matching => "matching",
            TitleState::Matched => "matched",
            TitleState::Review => "review",
            TitleState::Completed => "completed",
            TitleState::Failed => "failed",
        }
    }
}

/// User/default policy for a destination path that already exists
/// (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    Ask,
    Overwrite,
    Rename,
    Skip,
}

impl ConflictResolution {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ask" => Some(Self::Ask),
            "overwrite" => Some(Self::Overwrite),
            "rename" => Some(Self::Rename),
            "skip" => Some(Self::Skip),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConflictResolution::Ask => "ask",
            ConflictResolution::Overwrite => "overwrite",
            ConflictResolution::Rename => "rename",
            ConflictResolution::Skip => "skip",
        }
    }
}

/// One candidate episode assignment surfaced by the matcher's vote
/// aggregation (spec.md §4.5), ranked by `(vote_count, score, file_coverage)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub episode_code: String,
    pub vote_count: u32,
    pub score: f64,
    pub file_coverage: f64,
}

/// Structured score breakdown retained alongside a title's match, so a
/// reviewer (or the cross-title conflict pass) can see why a winner was
/// chosen over its runners-up.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchDetails {
    pub candidates: Vec<MatchCandidate>,
}

/// One selectable track on a disc (spec.md §3 "Title").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Title {
    pub id: i64,
    pub job_id: i64,
    pub title_index: u32,
    pub duration_seconds: u32,
    pub expected_size_bytes: u64,
    pub actual_size_bytes: u64,
    pub chapter_count: u32,
    pub is_selected: bool,
    pub output_filename: Option<String>,
    pub video_resolution: Option<String>,
    pub edition: Option<String>,
    pub state: TitleState,
    pub matched_episode: Option<String>,
    pub match_confidence: f64,
    pub match_details: MatchDetails,
    pub conflict_resolution: Option<ConflictResolution>,
    pub organized_from: Option<PathBuf>,
    pub organized_to: Option<PathBuf>,
    pub is_extra: bool,
    pub skipped: bool,
    pub error_message: Option<String>,
}

impl Title {
    pub fn new(id: i64, job_id: i64, title_index: u32, duration_seconds: u32) -> Self {
        Self {
            id,
            job_id,
            title_index,
            duration_seconds,
            expected_size_bytes: 0,
            actual_size_bytes: 0,
            chapter_count: 0,
            is_selected: true,
            output_filename: None,
            video_resolution: None,
            edition: None,
            state: TitleState::Pending,
            matched_episode: None,
            match_confidence: 0.0,
            match_details: MatchDetails::default(),
            conflict_resolution: None,
            organized_from: None,
            organized_to: None,
            is_extra: false,
            skipped: false,
            error_message: None,
        }
    }
}
