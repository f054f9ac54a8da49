//! Disc analyst (spec.md §4.3): classifies a freshly scanned disc as
//! TV, movie, or unknown from title durations, the parsed volume label,
//! and an optional TMDB corroboration signal.

pub mod label;
pub mod tmdb;

use std::collections::HashSet;

use tracing::debug;

use crate::models::ContentType;
use label::parse_volume_label;
pub use tmdb::TmdbSignal;

#[derive(Debug, Clone)]
pub struct TitleInfo {
    pub index: u32,
    pub duration_seconds: u32,
    pub size_bytes: u64,
    pub chapter_count: u32,
    pub name: Option<String>,
}

/// Tunable thresholds for the analyst (spec.md §3 "Settings").
#[derive(Debug, Clone)]
pub struct AnalystConfig {
    pub movie_min_duration: u32,
    pub tv_min_duration: u32,
    pub tv_max_duration: u32,
    pub tv_duration_variance: u32,
    pub tv_min_cluster_size: usize,
    pub movie_dominance_threshold: f64,
}

impl Default for AnalystConfig {
    fn default() -> Self {
        Self {
            movie_min_duration: 4800,
            tv_min_duration: 1080,
            tv_max_duration: 4200,
            tv_duration_variance: 120,
            tv_min_cluster_size: 3,
            movie_dominance_threshold: 0.6,
        }
    }
}

/// The analyst's verdict for one disc (spec.md §3 "Analyst result").
#[derive(Debug, Clone)]
pub struct AnalystResult {
    pub content_type: ContentType,
    pub confidence: f64,
    pub detected_name: Option<String>,
    pub detected_season: Option<u32>,
    pub detected_disc: Option<u32>,
    pub needs_review: bool,
    pub review_reason: Option<String>,
    pub play_all_title_indices: HashSet<u32>,
}

#[derive(Debug, Default)]
pub struct Analyst {
    config: AnalystConfig,
}

impl Analyst {
    pub fn new(config: AnalystConfig) -> Self {
        Self { config }
    }

    pub fn classify(
        &self,
        titles: &[TitleInfo],
        volume_label: &str,
        tmdb: Option<TmdbSignal>,
    ) -> AnalystResult {
        let label = parse_volume_label(volume_label);

        if titles.is_empty() {
            return AnalystResult {
                content_type: ContentType::Unknown,
                confidence: 0.0,
                detected_name: label.name,
                detected_season: label.season,
                detected_disc: label.disc,
                needs_review: true,
                review_reason: Some("No titles".to_string()),
                play_all_title_indices: HashSet::new(),
            };
        }

        let long_titles: Vec<&TitleInfo> = titles
            .iter()
            .filter(|t| t.duration_seconds >= self.config.movie_min_duration)
            .collect();
        let cluster = self.largest_episode_cluster(titles);

        let mut result = if cluster.len() >= self.config.tv_min_cluster_size || label.season.is_some() {
            self.classify_as_tv(titles, &cluster, &label)
        } else if long_titles.len() == 1 {
            self.classify_as_single_movie(titles, long_titles[0], &label)
        } else if long_titles.len() >= 2 {
            AnalystResult {
                content_type: ContentType::Movie,
                confidence: 0.55,
                detected_name: label.name.clone(),
                detected_season: None,
                detected_disc: label.disc,
                needs_review: true,
                review_reason: Some("Multiple long titles".to_string()),
                play_all_title_indices: HashSet::new(),
            }
        } else {
            AnalystResult {
                content_type: ContentType::Unknown,
                confidence: 0.5,
                detected_name: label.name.clone(),
                detected_season: None,
                detected_disc: label.disc,
                needs_review: true,
                review_reason: Some("No title meets movie or TV duration thresholds".to_string()),
                play_all_title_indices: HashSet::new(),
            }
        };

        // A generic/unparseable label leaves the user with no name to organize
        // under, regardless of how confident the duration heuristic was.
        if result.detected_name.is_none() && !result.needs_review {
            result.needs_review = true;
            result.review_reason =
                Some("Generic or unrecognized volume label; provide title manually".to_string());
        }

        if let Some(signal) = tmdb {
            self.apply_tmdb_signal(&mut result, signal);
        }

        result
    }

    /// Largest run of titles (by duration) within `[tv_min_duration,
    /// tv_max_duration]` whose pairwise spread is within
    /// `tv_duration_variance`, per spec.md §4.3's sliding-window clustering.
    fn largest_episode_cluster<'a>(&self, titles: &'a [TitleInfo]) -> Vec<&'a TitleInfo> {
        let mut candidates: Vec<&TitleInfo> = titles
            .iter()
            .filter(|t| {
                t.duration_seconds >= self.config.tv_min_duration
                    && t.duration_seconds <= self.config.tv_max_duration
            })
            .collect();
        candidates.sort_by_key(|t| t.duration_seconds);

        let mut best: Vec<&TitleInfo> = Vec::new();
        let mut window_start = 0;
        for window_end in 0..candidates.len() {
            while candidates[window_end].duration_seconds - candidates[window_start].duration_seconds
                > self.config.tv_duration_variance
            {
                window_start += 1;
            }
            if window_end + 1 - window_start > best.len() {
                best = candidates[window_start..=window_end].to_vec();
            }
        }
        best
    }

    fn classify_as_tv(
        &self,
        titles: &[TitleInfo],
        cluster: &[&TitleInfo],
        label: &label::LabelParse,
    ) -> AnalystResult {
        let strong = cluster.len() >= self.config.tv_min_cluster_size && label.season.is_some();
        let confidence = if strong {
            0.85
        } else if cluster.len() >= self.config.tv_min_cluster_size {
            0.75
        } else {
            0.60
        };

        let play_all = self.detect_play_all(titles, cluster);

        AnalystResult {
            content_type: ContentType::Tv,
            confidence,
            detected_name: label.name.clone(),
            detected_season: label.season,
            detected_disc: label.disc,
            needs_review: !strong && cluster.len() < self.config.tv_min_cluster_size,
            review_reason: if cluster.len() < self.config.tv_min_cluster_size {
                Some("Weak episode cluster, label-only TV inference".to_string())
            } else {
                None
            },
            play_all_title_indices: play_all,
        }
    }

    fn classify_as_single_movie(
        &self,
        titles: &[TitleInfo],
        dominant: &TitleInfo,
        label: &label::LabelParse,
    ) -> AnalystResult {
        let total: u64 = titles.iter().map(|t| t.duration_seconds as u64).sum();
        let share = if total == 0 {
            0.0
        } else {
            dominant.duration_seconds as f64 / total as f64
        };

        if share >= self.config.movie_dominance_threshold {
            AnalystResult {
                content_type: ContentType::Movie,
                confidence: 0.85,
                detected_name: label.name.clone(),
                detected_season: None,
                detected_disc: label.disc,
                needs_review: false,
                review_reason: None,
                play_all_title_indices: HashSet::new(),
            }
        } else {
            AnalystResult {
                content_type: ContentType::Movie,
                confidence: 0.55,
                detected_name: label.name.clone(),
                detected_season: None,
                detected_disc: label.disc,
                needs_review: true,
                review_reason: Some("Dominant title share below threshold".to_string()),
                play_all_title_indices: HashSet::new(),
            }
        }
    }

    /// A title whose duration approximates the episode cluster's total
    /// runtime, and exceeds any single cluster member, is a Play-All
    /// concatenation rather than a distinct episode (spec.md §4.3).
    fn detect_play_all(&self, titles: &[TitleInfo], cluster: &[&TitleInfo]) -> HashSet<u32> {
        if cluster.is_empty() {
            return HashSet::new();
        }
        let sum: u64 = cluster.iter().map(|t| t.duration_seconds as u64).sum();
        let max_member = cluster.iter().map(|t| t.duration_seconds).max().unwrap_or(0);
        let low = (sum as f64 * 0.8) as u64;
        let high = (sum as f64 * 1.2) as u64;

        titles
            .iter()
            .filter(|t| {
                let d = t.duration_seconds as u64;
                d >= low && d <= high && t.duration_seconds > max_member
            })
            .map(|t| t.index)
            .collect()
    }

    /// TMDB corroboration overrides the heuristic verdict only when it
    /// disagrees and carries higher confidence; a strong heuristic
    /// contradicted by TMDB is flagged for review rather than silently
    /// discarded.
    fn apply_tmdb_signal(&self, result: &mut AnalystResult, signal: TmdbSignal) {
        if signal.content_type == result.content_type {
            result.confidence = result.confidence.max(signal.confidence);
            return;
        }

        debug!(
            heuristic = ?result.content_type,
            tmdb = ?signal.content_type,
            "TMDB signal disagrees with heuristic classification"
        );

        if signal.confidence > result.confidence {
            let heuristic_was_strong = !result.needs_review;
            result.content_type = signal.content_type;
            result.confidence = signal.confidence;
            if signal.tmdb_name.is_some() {
                result.detected_name = signal.tmdb_name;
            }
            if heuristic_was_strong {
                result.needs_review = true;
                result.review_reason = Some("TMDB contradicts a strong heuristic match".to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn title(index: u32, duration_seconds: u32) -> TitleInfo {
        TitleInfo {
            index,
            duration_seconds,
            size_bytes: duration_seconds as u64 * 4_000_000,
            chapter_count: 1,
            name: None,
        }
    }

    #[test]
    fn strong_tv_cluster_with_season_label() {
        let analyst = Analyst::new(AnalystConfig::default());
        let titles = vec![title(1, 1320), title(2, 1350), title(3, 1290), title(4, 1310)];
        let result = analyst.classify(&titles, "ARRESTED_DEVELOPMENT_S01", None);
        assert_eq!(result.content_type, ContentType::Tv);
        assert!(result.confidence >= 0.80);
        assert!(!result.needs_review);
        assert_eq!(result.detected_season, Some(1));
    }

    #[test]
    fn play_all_title_is_flagged() {
        let analyst = Analyst::new(AnalystConfig::default());
        let episodes = vec![title(1, 1320), title(2, 1350), title(3, 1290)];
        let play_all_duration: u32 = episodes.iter().map(|t| t.duration_seconds).sum();
        let mut titles = episodes;
        titles.push(title(4, play_all_duration));

        let result = analyst.classify(&titles, "SOME_SHOW_S01", None);
        assert!(result.play_all_title_indices.contains(&4));
    }

    #[test]
    fn single_dominant_title_is_a_confident_movie() {
        let analyst = Analyst::new(AnalystConfig::default());
        let titles = vec![title(1, 7200), title(2, 120), title(3, 90)];
        let result = analyst.classify(&titles, "THE_ITALIAN_JOB", None);
        assert_eq!(result.content_type, ContentType::Movie);
        assert!(result.confidence >= 0.80);
        assert!(!result.needs_review);
    }

    #[test]
    fn multiple_long_titles_is_ambiguous_movie_needing_review() {
        let analyst = Analyst::new(AnalystConfig::default());
        let titles = vec![title(1, 6423), title(2, 6423), title(3, 90)];
        let result = analyst.classify(&titles, "THE_TERMINATOR", None);
        assert_eq!(result.content_type, ContentType::Movie);
        assert!(result.needs_review);
        assert_eq!(result.review_reason.as_deref(), Some("Multiple long titles"));
    }

    #[test]
    fn empty_titles_is_unknown_needing_review() {
        let analyst = Analyst::new(AnalystConfig::default());
        let result = analyst.classify(&[], "WHATEVER", None);
        assert_eq!(result.content_type, ContentType::Unknown);
        assert!(result.needs_review);
        assert_eq!(result.review_reason.as_deref(), Some("No titles"));
    }

    #[test]
    fn generic_label_never_fabricates_a_name() {
        let analyst = Analyst::new(AnalystConfig::default());
        let titles = vec![title(1, 7200), title(2, 120)];
        let result = analyst.classify(&titles, "LOGICAL_VOLUME_ID", None);
        assert!(result.detected_name.is_none());
    }

    #[test]
    fn tmdb_signal_overrides_weak_heuristic() {
        let analyst = Analyst::new(AnalystConfig::default());
        let titles = vec![title(1, 7200), title(2, 7100), title(3, 90)];
        let signal = TmdbSignal {
            content_type: ContentType::Tv,
            confidence: 0.90,
            tmdb_id: Some(1),
            tmdb_name: Some("Some Show".to_string()),
        };
        let result = analyst.classify(&titles, "TERMINATOR", Some(signal));
        assert_eq!(result.content_type, ContentType::Tv);
        assert!(result.needs_review);
    }
}
