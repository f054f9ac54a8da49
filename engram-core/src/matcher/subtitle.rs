//! Subtitle reference corpus (spec.md §4.5): local cache lookup with a
//! remote-provider fallback, gated by credentials and rate-limited per
//! provider.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{EngramError, Result};

/// Canonical `SxxEyy` episode code, zero-padded.
pub fn canonical_episode_code(season: u32, episode: u32) -> String {
    format!("S{season:02}E{episode:02}")
}

static SXXEYY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)[Ss](\d{1,2})[Ee](\d{1,2})").unwrap());
static NXNN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{1,2})x(\d{1,2})").unwrap());

/// Parses `SxxEyy` or `NxNN` out of a subtitle filename.
pub fn parse_episode_from_filename(filename: &str) -> Option<(u32, u32)> {
    if let Some(caps) = SXXEYY_RE.captures(filename) {
        return Some((caps[1].parse().ok()?, caps[2].parse().ok()?));
    }
    if let Some(caps) = NXNN_RE.captures(filename) {
        return Some((caps[1].parse().ok()?, caps[2].parse().ok()?));
    }
    None
}

/// One cached or freshly-downloaded subtitle.
#[derive(Debug, Clone)]
pub struct SubtitleFile {
    pub path: PathBuf,
    pub season: u32,
    pub episode: u32,
    pub text: String,
}

/// Sanitizes `show_name` into the directory-safe form used under
/// `<cache_root>/data/<sanitized_show>/`.
pub fn sanitize_show_dir(show_name: &str) -> String {
    crate::organizer::sanitize_component(show_name)
}

/// Remote subtitle source, queried in a fixed provider order when the
/// local cache is incomplete. Implementations should rate-limit
/// themselves; the corpus builder does not impose its own limiter.
#[async_trait::async_trait]
pub trait RemoteSubtitleProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, show_name: &str, season: u32, episode: u32) -> Result<Option<String>>;
}

/// Builds the per-`(show, season)` reference corpus used by the matcher.
pub struct SubtitleCorpusBuilder {
    cache_root: PathBuf,
    providers: Vec<Box<dyn RemoteSubtitleProvider>>,
}

impl SubtitleCorpusBuilder {
    pub fn new(cache_root: PathBuf, providers: Vec<Box<dyn RemoteSubtitleProvider>>) -> Self {
        Self { cache_root, providers }
    }

    /// Scans the local cache for `show_name`/`season`. Missing episodes
    /// are then requested from each provider in order, newly fetched
    /// subtitles are written back into the cache.
    ///
    /// The corpus is "complete" when every episode in `canonical_episode_count`
    /// has at least one subtitle; partial corpora are returned rather than
    /// erroring; spec.md §9 treats missing episodes as a warning, not a
    /// hard gate.
    pub async fn build(
        &self,
        show_name: &str,
        season: u32,
        canonical_episode_count: Option<u32>,
    ) -> Result<Vec<SubtitleFile>> {
        let mut subtitles = self.scan_local(show_name, season).await?;

        if let Some(total) = canonical_episode_count {
            let have: std::collections::HashSet<u32> =
                subtitles.iter().map(|s| s.episode).collect();
            let missing: Vec<u32> = (1..=total).filter(|e| !have.contains(e)).collect();

            if !missing.is_empty() {
                for episode in &missing {
                    for provider in &self.providers {
                        match provider.fetch(show_name, season, *episode).await {
                            Ok(Some(text)) => {
                                if let Ok(path) = self
                                    .write_to_cache(show_name, season, *episode, &text)
                                    .await
                                {
                                    subtitles.push(SubtitleFile {
                                        path,
                                        season,
                                        episode: *episode,
                                        text,
                                    });
                                }
                                break;
                            }
                            Ok(None) => continue,
                            Err(e) => {
                                warn!(provider = provider.name(), %e, "subtitle provider failed");
                                continue;
                            }
                        }
                    }
                }

                let still_missing = total as usize - subtitles.len().min(total as usize);
                if still_missing > 0 {
                    info!(
                        show_name,
                        season,
                        still_missing,
                        "subtitle corpus is incomplete; matching continues with partial coverage"
                    );
                }
            }
        }

        Ok(subtitles)
    }

    async fn scan_local(&self, show_name: &str, season: u32) -> Result<Vec<SubtitleFile>> {
        let dir = self.cache_root.join("data").join(sanitize_show_dir(show_name));
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(Vec::new()),
        };

        let mut subtitles = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EngramError::Subtitle(e.to_string()))?
        {
            let path = entry.path();
            let is_srt = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("srt"))
                .unwrap_or(false);
            if !is_srt {
                continue;
            }
            let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if let Some((parsed_season, episode)) = parse_episode_from_filename(filename) {
                if parsed_season != season {
                    continue;
                }
                let text = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| EngramError::Subtitle(e.to_string()))?;
                subtitles.push(SubtitleFile {
                    path,
                    season,
                    episode,
                    text,
                });
            }
        }
        Ok(subtitles)
    }

    async fn write_to_cache(
        &self,
        show_name: &str,
        season: u32,
        episode: u32,
        text: &str,
    ) -> Result<PathBuf> {
        let dir = self.cache_root.join("data").join(sanitize_show_dir(show_name));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| EngramError::Subtitle(e.to_string()))?;
        let path = dir.join(format!(
            "{} - {}.srt",
            show_name,
            canonical_episode_code(season, episode)
        ));
        tokio::fs::write(&path, text)
            .await
            .map_err(|e| EngramError::Subtitle(e.to_string()))?;
        debug!(path = %path.display(), "cached new subtitle");
        Ok(path)
    }
}

/// [`RemoteSubtitleProvider`] backed by a REST subtitle search API,
/// gated by an API key the way the original's `SubtitleProvider`
/// implementations are gated by credentials stored in settings. Without
/// a key this provider is a soft no-op rather than a hard error, so a
/// fresh install with no subtitle credentials still matches against
/// whatever the local cache already has (spec.md §4.5 "a provider
/// outage does not fail the title if the local cache is non-empty").
pub struct HttpSubtitleProvider {
    name: &'static str,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpSubtitleProvider {
    pub fn new(name: &'static str, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            name,
            base_url: base_url.into(),
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl RemoteSubtitleProvider for HttpSubtitleProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch(&self, show_name: &str, season: u32, episode: u32) -> Result<Option<String>> {
        let Some(api_key) = &self.api_key else {
            return Ok(None);
        };

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("api_key", api_key.as_str()),
                ("query", show_name),
                ("season", &season.to_string()),
                ("episode", &episode.to_string()),
            ])
            .send()
            .await
            .map_err(|e| EngramError::Subtitle(format!("{} request failed: {e}", self.name)))?;

        if !response.status().is_success() {
            return Ok(None);
        }

        let text = response
            .text()
            .await
            .map_err(|e| EngramError::Subtitle(format!("{} response read failed: {e}", self.name)))?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sxxeyy_filenames() {
        assert_eq!(
            parse_episode_from_filename("Arrested Development - S01E03.srt"),
            Some((1, 3))
        );
    }

    #[test]
    fn parses_nxnn_filenames() {
        assert_eq!(parse_episode_from_filename("show.1x07.srt"), Some((1, 7)));
    }

    #[test]
    fn unrecognized_filenames_yield_none() {
        assert_eq!(parse_episode_from_filename("random.srt"), None);
    }

    #[test]
    fn canonical_code_is_zero_padded() {
        assert_eq!(canonical_episode_code(1, 3), "S01E03");
        assert_eq!(canonical_episode_code(12, 108), "S12E108");
    }
}
