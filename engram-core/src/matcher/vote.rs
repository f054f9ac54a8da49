//! Vote aggregation and cross-title conflict resolution (spec.md §4.5).

use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::{info, warn};

use crate::matcher::fingerprint::ChunkCandidate;
use crate::models::MatchCandidate;

/// Per-episode accumulation across all chunks of one title.
#[derive(Debug, Clone, Default)]
struct Accumulator {
    vote_count: u32,
    best_score: f64,
    covered_chunks: u32,
}

/// Orders two candidates by `(vote_count desc, score desc, file_coverage
/// desc)`, the ranking key used everywhere in the matcher (spec.md §4.5).
fn rank_cmp(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    a.vote_count
        .cmp(&b.vote_count)
        .then_with(|| a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal))
        .then_with(|| {
            a.file_coverage
                .partial_cmp(&b.file_coverage)
                .unwrap_or(Ordering::Equal)
        })
}

/// Collapses a title's chunk-level candidates into ranked episode
/// candidates via `vote_count` (chunks that voted for it), `score` (max
/// per-chunk similarity), and `file_coverage` (union of matched ranges
/// over total chunks, used as a proxy for matched-time-range coverage).
pub fn aggregate_votes(chunk_candidates: &[ChunkCandidate], total_chunks: u32) -> Vec<MatchCandidate> {
    let mut by_episode: HashMap<String, Accumulator> = HashMap::new();

    for candidate in chunk_candidates {
        let entry = by_episode.entry(candidate.episode_code.clone()).or_default();
        entry.vote_count += 1;
        entry.best_score = entry.best_score.max(candidate.score);
        entry.covered_chunks += 1;
    }

    let mut ranked: Vec<MatchCandidate> = by_episode
        .into_iter()
        .map(|(episode_code, acc)| MatchCandidate {
            episode_code,
            vote_count: acc.vote_count,
            score: acc.best_score,
            file_coverage: if total_chunks == 0 {
                0.0
            } else {
                acc.covered_chunks as f64 / total_chunks as f64
            },
        })
        .collect();

    ranked.sort_by(|a, b| rank_cmp(b, a));
    ranked
}

/// The matcher's decision for one title after vote aggregation.
#[derive(Debug, Clone)]
pub enum TitleDecision {
    Matched { episode_code: String, confidence: f64 },
    NeedsReview,
}

/// Picks the title's winner if its ranking key clears
/// `matcher_min_confidence`, using `score` as the confidence proxy.
pub fn decide_title(ranked: &[MatchCandidate], min_confidence: f64) -> TitleDecision {
    match ranked.first() {
        Some(top) if top.score >= min_confidence => TitleDecision::Matched {
            episode_code: top.episode_code.clone(),
            confidence: top.score,
        },
        _ => TitleDecision::NeedsReview,
    }
}

#[derive(Debug, Clone)]
pub struct TitleClaim {
    pub title_id: i64,
    pub candidate: MatchCandidate,
}

/// After every title in a job is matched, at most one title may keep each
/// `episode_code`. Ranks competing claims by the same ordered key and
/// reverts all but the winner to review. Adjacent ranks within 0.05 score
/// and equal vote counts are logged as ambiguous (spec.md §4.5).
pub fn resolve_conflicts(claims: Vec<TitleClaim>) -> (Vec<i64> /* winners */, Vec<i64> /* reverted */) {
    let mut by_episode: HashMap<String, Vec<TitleClaim>> = HashMap::new();
    for claim in claims {
        by_episode
            .entry(claim.candidate.episode_code.clone())
            .or_default()
            .push(claim);
    }

    let mut winners = Vec::new();
    let mut reverted = Vec::new();

    for (episode_code, mut group) in by_episode {
        group.sort_by(|a, b| rank_cmp(&b.candidate, &a.candidate));

        if group.len() > 1 {
            let (top, runner_up) = (&group[0], &group[1]);
            if top.candidate.vote_count == runner_up.candidate.vote_count
                && (top.candidate.score - runner_up.candidate.score).abs() < 0.05
            {
                warn!(
                    episode_code,
                    top_title = top.title_id,
                    runner_up_title = runner_up.title_id,
                    "ambiguous episode claim: adjacent ranks within tolerance"
                );
            }
        }

        winners.push(group[0].title_id);
        for claim in group.into_iter().skip(1) {
            info!(
                episode_code,
                title_id = claim.title_id,
                "reverted to review: another title outranked this claim"
            );
            reverted.push(claim.title_id);
        }
    }

    (winners, reverted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(code: &str, votes: u32, score: f64, coverage: f64) -> ChunkCandidate {
        ChunkCandidate {
            episode_code: code.to_string(),
            score,
            coverage,
        }
    }

    #[test]
    fn aggregates_votes_and_ranks_by_tuple() {
        let chunks = vec![
            candidate("S01E01", 1, 0.9, 1.0),
            candidate("S01E01", 1, 0.8, 1.0),
            candidate("S01E02", 1, 0.95, 1.0),
        ];
        let ranked = aggregate_votes(&chunks, 3);
        assert_eq!(ranked[0].episode_code, "S01E01");
        assert_eq!(ranked[0].vote_count, 2);
    }

    #[test]
    fn decide_title_requires_minimum_confidence() {
        let ranked = vec![MatchCandidate {
            episode_code: "S01E01".into(),
            vote_count: 2,
            score: 0.4,
            file_coverage: 1.0,
        }];
        match decide_title(&ranked, 0.6) {
            TitleDecision::NeedsReview => {}
            _ => panic!("expected review"),
        }
    }

    #[test]
    fn conflict_resolution_keeps_top_ranked_claim() {
        let claims = vec![
            TitleClaim {
                title_id: 1,
                candidate: MatchCandidate {
                    episode_code: "S01E01".into(),
                    vote_count: 3,
                    score: 0.9,
                    file_coverage: 1.0,
                },
            },
            TitleClaim {
                title_id: 2,
                candidate: MatchCandidate {
                    episode_code: "S01E01".into(),
                    vote_count: 1,
                    score: 0.5,
                    file_coverage: 0.5,
                },
            },
        ];
        let (winners, reverted) = resolve_conflicts(claims);
        assert_eq!(winners, vec![1]);
        assert_eq!(reverted, vec![2]);
    }
}
