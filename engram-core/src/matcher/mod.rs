//! TV matcher (spec.md §4.5): fingerprints ripped titles against a
//! subtitle reference corpus and assigns canonical episode codes.

pub mod fingerprint;
pub mod subtitle;
pub mod vote;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::error::{EngramError, Result};
use fingerprint::{fingerprint_chunks, ChunkExtractor, ChunkPlan, Transcriber};
use subtitle::SubtitleCorpusBuilder;
use vote::{aggregate_votes, decide_title, resolve_conflicts, TitleClaim, TitleDecision};

#[derive(Debug, Clone)]
pub struct MatcherConfig {
    pub min_confidence: f64,
    pub max_concurrent_matches: usize,
    pub chunk_plan: ChunkPlan,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            max_concurrent_matches: 2,
            chunk_plan: ChunkPlan::default(),
        }
    }
}

pub struct RippedTitle {
    pub title_id: i64,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct TitleMatchOutcome {
    pub title_id: i64,
    pub decision: TitleDecision,
}

pub struct Matcher {
    config: MatcherConfig,
    corpus: SubtitleCorpusBuilder,
    extractor: ChunkExtractor,
    transcriber: Arc<dyn Transcriber>,
    concurrency: Arc<Semaphore>,
    scratch_root: PathBuf,
}

impl Matcher {
    pub fn new(
        config: MatcherConfig,
        corpus: SubtitleCorpusBuilder,
        extractor: ChunkExtractor,
        transcriber: Arc<dyn Transcriber>,
        scratch_root: PathBuf,
    ) -> Self {
        let concurrency = Arc::new(Semaphore::new(config.max_concurrent_matches));
        Self {
            config,
            corpus,
            extractor,
            transcriber,
            concurrency,
            scratch_root,
        }
    }

    /// Matches every ripped title of a job against the show/season's
    /// subtitle corpus, bounding simultaneous transcriptions by
    /// `max_concurrent_matches`, then runs cross-title conflict
    /// resolution over the results (spec.md §4.5).
    pub async fn match_titles(
        &self,
        titles: Vec<RippedTitle>,
        show_name: &str,
        season: u32,
        canonical_episode_count: Option<u32>,
    ) -> Result<Vec<TitleMatchOutcome>> {
        let corpus = self
            .corpus
            .build(show_name, season, canonical_episode_count)
            .await?;

        if corpus.is_empty() {
            warn!(show_name, season, "subtitle corpus is empty; all titles will need review");
        }

        let mut handles = Vec::with_capacity(titles.len());
        for title in titles {
            let permit = Arc::clone(&self.concurrency).acquire_owned().await;
            let corpus = corpus.clone();
            let extractor = self.extractor.clone();
            let transcriber = Arc::clone(&self.transcriber);
            let plan = self.config.chunk_plan.clone();
            let scratch_dir = self.scratch_root.join(format!("title-{}", title.title_id));

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let _ = tokio::fs::create_dir_all(&scratch_dir).await;
                let chunks = extractor.extract(&title.path, &plan, &scratch_dir).await;
                if chunks.is_empty() {
                    return (title.title_id, None);
                }
                let candidates = fingerprint_chunks(transcriber.as_ref(), &chunks, &corpus).await;
                (title.title_id, Some((candidates, chunks.len() as u32)))
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        let mut claims = Vec::new();

        for handle in handles {
            let (title_id, result) = handle
                .await
                .map_err(|e| EngramError::Matching(format!("match task panicked: {e}")))?;

            match result {
                None => {
                    info!(title_id, "no chunks survived extraction; sending to review");
                    outcomes.push(TitleMatchOutcome {
                        title_id,
                        decision: TitleDecision::NeedsReview,
                    });
                }
                Some((candidates, total_chunks)) => {
                    let ranked = aggregate_votes(&candidates, total_chunks);
                    let decision = decide_title(&ranked, self.config.min_confidence);
                    if let TitleDecision::Matched { .. } = &decision {
                        if let Some(top) = ranked.first() {
                            claims.push(TitleClaim {
                                title_id,
                                candidate: top.clone(),
                            });
                        }
                    }
                    outcomes.push(TitleMatchOutcome { title_id, decision });
                }
            }
        }

        let (_, reverted) = resolve_conflicts(claims);
        for outcome in outcomes.iter_mut() {
            if reverted.contains(&outcome.title_id) {
                outcome.decision = TitleDecision::NeedsReview;
            }
        }

        Ok(outcomes)
    }
}
