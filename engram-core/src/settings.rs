//! User-configurable settings (spec.md §9): a single persisted row,
//! read into an immutable [`SettingsSnapshot`] so long-running
//! components (the matcher, analyst, ripping coordinator) see a
//! consistent view for the duration of one job even if an operator
//! changes settings mid-run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::analyst::AnalystConfig;
use crate::matcher::MatcherConfig;
use crate::matcher::fingerprint::ChunkPlan;
use crate::models::ConflictResolution;
use crate::ripping::RippingConfig;

/// The full settings row (spec.md §9's "AppConfig"), persisted as a
/// single-row table and editable through `engram-server`'s settings
/// endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub movies_library_path: Option<PathBuf>,
    pub tv_library_path: Option<PathBuf>,
    pub staging_path: Option<PathBuf>,
    pub conflict_resolution_default: ConflictResolution,
    pub matcher_min_confidence: f64,
    pub max_concurrent_matches: usize,
    pub analyst_movie_min_duration: u32,
    pub analyst_tv_duration_variance: u32,
    pub analyst_tv_min_cluster_size: usize,
    pub analyst_tv_min_duration: u32,
    pub analyst_tv_max_duration: u32,
    pub analyst_movie_dominance_threshold: f64,
    pub ripping_file_poll_interval: f64,
    pub ripping_stability_checks: u32,
    pub ripping_file_ready_timeout: f64,
    pub sentinel_poll_interval: f64,
}

impl Default for Settings {
    /// Mirrors the original system's shipped defaults exactly (spec.md
    /// §9), so a first-run database behaves the same as before it had
    /// settings at all.
    fn default() -> Self {
        Self {
            movies_library_path: None,
            tv_library_path: None,
            staging_path: None,
            conflict_resolution_default: ConflictResolution::Ask,
            matcher_min_confidence: 0.6,
            max_concurrent_matches: 2,
            analyst_movie_min_duration: 4800,
            analyst_tv_duration_variance: 120,
            analyst_tv_min_cluster_size: 3,
            analyst_tv_min_duration: 1080,
            analyst_tv_max_duration: 4200,
            analyst_movie_dominance_threshold: 0.6,
            ripping_file_poll_interval: 5.0,
            ripping_stability_checks: 3,
            ripping_file_ready_timeout: 600.0,
            sentinel_poll_interval: 2.0,
        }
    }
}

impl Settings {
    /// A typed, immutable view for one component's lifetime. Taking this
    /// instead of handing out `&Settings` means a mid-run settings change
    /// never mutates values a running job has already read.
    pub fn snapshot(&self) -> SettingsSnapshot {
        SettingsSnapshot {
            analyst: AnalystConfig {
                movie_min_duration: self.analyst_movie_min_duration,
                tv_min_duration: self.analyst_tv_min_duration,
                tv_max_duration: self.analyst_tv_max_duration,
                tv_duration_variance: self.analyst_tv_duration_variance,
                tv_min_cluster_size: self.analyst_tv_min_cluster_size,
                movie_dominance_threshold: self.analyst_movie_dominance_threshold,
            },
            ripping: RippingConfig {
                scan_timeout: std::time::Duration::from_secs(120),
                file_poll_interval: std::time::Duration::from_secs_f64(self.ripping_file_poll_interval),
                stability_checks: self.ripping_stability_checks,
                file_ready_timeout: std::time::Duration::from_secs_f64(self.ripping_file_ready_timeout),
            },
            matcher: MatcherConfig {
                min_confidence: self.matcher_min_confidence,
                max_concurrent_matches: self.max_concurrent_matches,
                chunk_plan: ChunkPlan::default(),
            },
            conflict_resolution_default: self.conflict_resolution_default,
            movies_library_path: self.movies_library_path.clone(),
            tv_library_path: self.tv_library_path.clone(),
            staging_path: self.staging_path.clone(),
            sentinel_poll_interval: std::time::Duration::from_secs_f64(self.sentinel_poll_interval),
        }
    }
}

/// Component-ready configuration derived from [`Settings`]; cheap to
/// clone and pass down into a job's pipeline.
#[derive(Debug, Clone)]
pub struct SettingsSnapshot {
    pub analyst: AnalystConfig,
    pub ripping: RippingConfig,
    pub matcher: MatcherConfig,
    pub conflict_resolution_default: ConflictResolution,
    pub movies_library_path: Option<PathBuf>,
    pub tv_library_path: Option<PathBuf>,
    pub staging_path: Option<PathBuf>,
    pub sentinel_poll_interval: std::time::Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_shipped_configuration() {
        let settings = Settings::default();
        assert_eq!(settings.analyst_movie_min_duration, 4800);
        assert_eq!(settings.analyst_tv_min_duration, 1080);
        assert_eq!(settings.analyst_tv_max_duration, 4200);
        assert_eq!(settings.matcher_min_confidence, 0.6);
        assert_eq!(settings.max_concurrent_matches, 2);
    }

    #[test]
    fn snapshot_carries_library_paths_through() {
        let mut settings = Settings::default();
        settings.movies_library_path = Some(PathBuf::from("/lib/movies"));
        let snapshot = settings.snapshot();
        assert_eq!(snapshot.movies_library_path, Some(PathBuf::from("/lib/movies")));
    }
}
