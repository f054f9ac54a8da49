//! TMDB content-type corroboration signal (spec.md §4.3, §9 supplement).
//!
//! The analyst's heuristics run on duration/chapter data alone; TMDB is an
//! optional second opinion queried by parsed name. Mirrors the dual
//! TV/movie search-and-compare-popularity approach of the Python
//! original's TMDB classifier, ported onto the `tmdb-api` crate.

use tmdb_api::client::reqwest::ReqwestExecutor;
use tmdb_api::client::Client;
use tmdb_api::movie::search::MovieSearch;
use tmdb_api::prelude::Command;
use tmdb_api::tvshow::search::TVShowSearch;
use tracing::{debug, info};

use crate::models::ContentType;

const HIGH_POPULARITY_THRESHOLD: f64 = 50.0;

/// A content-type opinion sourced from TMDB search results.
#[derive(Debug, Clone)]
pub struct TmdbSignal {
    pub content_type: ContentType,
    pub confidence: f64,
    pub tmdb_id: Option<u64>,
    pub tmdb_name: Option<String>,
}

pub struct TmdbClassifier {
    client: Client<ReqwestExecutor>,
}

impl TmdbClassifier {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::<ReqwestExecutor>::new(api_key),
        }
    }

    /// Searches both the TV and movie endpoints for `name` and returns the
    /// stronger signal by popularity. Close popularity (< 2x ratio) is
    /// reported as ambiguous at reduced confidence. Network or parse
    /// failures yield `None` rather than an error: TMDB corroboration is
    /// always optional.
    pub async fn classify(&self, name: &str) -> Option<TmdbSignal> {
        if name.trim().is_empty() {
            return None;
        }

        let tv = self.search_tv(name).await;
        let movie = self.search_movie(name).await;

        match (tv, movie) {
            (Some(tv), Some(movie)) => {
                let tv_pop = tv.1;
                let movie_pop = movie.1;
                if tv_pop > 0.0 && movie_pop > 0.0 {
                    let ratio = tv_pop.max(movie_pop) / tv_pop.min(movie_pop);
                    if ratio < 2.0 {
                        return Some(if tv_pop >= movie_pop {
                            tv_signal(tv, true)
                        } else {
                            movie_signal(movie, true)
                        });
                    }
                }
                Some(if tv_pop >= movie_pop {
                    tv_signal(tv, false)
                } else {
                    movie_signal(movie, false)
                })
            }
            (Some(tv), None) => Some(tv_signal(tv, false)),
            (None, Some(movie)) => Some(movie_signal(movie, false)),
            (None, None) => {
                debug!(name, "TMDB: no results for either endpoint");
                None
            }
        }
    }

    async fn search_tv(&self, name: &str) -> Option<(u64, f64, String)> {
        let search = TVShowSearch::new(name.to_string());
        let result = search.execute(&self.client).await.ok()?;
        let top = result.results.into_iter().next()?;
        Some((top.inner.id, top.inner.popularity, top.inner.name))
    }

    async fn search_movie(&self, name: &str) -> Option<(u64, f64, String)> {
        let search = MovieSearch::new(name.to_string());
        let result = search.execute(&self.client).await.ok()?;
        let top = result.results.into_iter().next()?;
        Some((top.inner.id, top.inner.popularity, top.inner.title))
    }
}

fn confidence_for(popularity: f64, ambiguous: bool) -> f64 {
    if ambiguous {
        0.60
    } else if popularity > HIGH_POPULARITY_THRESHOLD {
        0.85
    } else {
        0.70
    }
}

fn tv_signal((id, popularity, name): (u64, f64, String), ambiguous: bool) -> TmdbSignal {
    info!(id, popularity, %name, "TMDB matched as TV");
    TmdbSignal {
        content_type: ContentType::Tv,
        confidence: confidence_for(popularity, ambiguous),
        tmdb_id: Some(id),
        tmdb_name: Some(name),
    }
}

fn movie_signal((id, popularity, name): (u64, f64, String), ambiguous: bool) -> TmdbSignal {
    info!(id, popularity, %name, "TMDB matched as movie");
    TmdbSignal {
        content_type: ContentType::Movie,
        confidence: confidence_for(popularity, ambiguous),
        tmdb_id: Some(id),
        tmdb_name: Some(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn popular_result_is_high_confidence() {
        assert_eq!(confidence_for(80.0, false), 0.85);
    }

    #[test]
    fn ambiguous_result_is_capped_at_sixty_percent() {
        assert_eq!(confidence_for(80.0, true), 0.60);
    }

    #[test]
    fn unpopular_result_is_medium_confidence() {
        assert_eq!(confidence_for(5.0, false), 0.70);
    }
}
