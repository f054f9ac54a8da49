//! Organizer (spec.md §4.6): deterministic path computation, name
//! sanitization, conflict resolution, and the atomic move into the
//! library.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::error::{EngramError, Result};
use crate::models::ConflictResolution;

const RESERVED_CHARS: &[char] = &[':', '?', '"', '<', '>', '|', '*', '\\'];

const SMALL_WORDS: &[&str] = &[
    "a", "an", "the", "of", "and", "or", "for", "to", "in", "on", "at", "by",
];

static COLLAPSE_WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Strips reserved filesystem characters and leading dots, collapses
/// whitespace, and title-cases with the organizer's small-word
/// exceptions. Idempotent: `sanitize(sanitize(x)) == sanitize(x)`.
pub fn sanitize_component(name: &str) -> String {
    let without_reserved: String = name.chars().filter(|c| !RESERVED_CHARS.contains(c)).collect();
    let trimmed = without_reserved.trim_start_matches('.').trim();
    let collapsed = COLLAPSE_WHITESPACE_RE.replace_all(trimmed, " ");

    let words: Vec<&str> = collapsed.split(' ').filter(|w| !w.is_empty()).collect();
    let last = words.len().saturating_sub(1);

    words
        .iter()
        .enumerate()
        .map(|(i, word)| {
            let lower = word.to_ascii_lowercase();
            if i != 0 && i != last && SMALL_WORDS.contains(&lower.as_str()) {
                lower
            } else {
                let mut chars = lower.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                }
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// A computed organizer destination, prior to conflict resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub path: PathBuf,
}

/// `<movies_root>/<Name> (<year>)/<Name> (<year>).mkv`, or
/// `<movies_root>/<Name>/<Name>.mkv` when no year is known.
pub fn movie_path(movies_root: &Path, name: &str, year: Option<u32>) -> Destination {
    let clean = sanitize_component(name);
    let path = match year {
        Some(year) => {
            let labeled = format!("{clean} ({year})");
            movies_root.join(&labeled).join(format!("{labeled}.mkv"))
        }
        None => movies_root.join(&clean).join(format!("{clean}.mkv")),
    };
    Destination { path }
}

/// `<tv_root>/<Show>/Season <ss>/<Show> - S<ss>E<ee>.mkv`
pub fn tv_episode_path(tv_root: &Path, show: &str, season: u32, episode: u32) -> Destination {
    let clean = sanitize_component(show);
    let season_dir = format!("Season {season:02}");
    let filename = format!("{clean} - S{season:02}E{episode:02}.mkv");
    Destination {
        path: tv_root.join(&clean).join(season_dir).join(filename),
    }
}

/// `<tv_root>/<Show>/Season <ss>/Extras/Disc <n>/extra_<i>.mkv`
pub fn tv_extra_path(tv_root: &Path, show: &str, season: u32, disc: u32, extra_index: u32) -> Destination {
    let clean = sanitize_component(show);
    let season_dir = format!("Season {season:02}");
    let disc_dir = format!("Disc {disc}");
    let filename = format!("extra_{extra_index}.mkv");
    Destination {
        path: tv_root
            .join(&clean)
            .join(season_dir)
            .join("Extras")
            .join(disc_dir)
            .join(filename),
    }
}

/// Appends ` (2)`, ` (3)`, ... at the filename stem until an unused path
/// is found (`rename` conflict policy).
fn rename_to_avoid_conflict(path: &Path) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("mkv");
    let parent = path.parent().unwrap_or_else(|| Path::new("."));

    let mut counter = 2;
    loop {
        let candidate = parent.join(format!("{stem} ({counter}).{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Outcome of applying a title's conflict resolution policy against an
/// already-computed destination.
#[derive(Debug, Clone)]
pub enum ResolvedDestination {
    Proceed(PathBuf),
    Skip,
    Review(PathBuf),
}

pub fn resolve_conflict(destination: &Path, policy: ConflictResolution) -> ResolvedDestination {
    if !destination.exists() {
        return ResolvedDestination::Proceed(destination.to_path_buf());
    }

    match policy {
        ConflictResolution::Overwrite => ResolvedDestination::Proceed(destination.to_path_buf()),
        ConflictResolution::Rename => ResolvedDestination::Proceed(rename_to_avoid_conflict(destination)),
        ConflictResolution::Skip => ResolvedDestination::Skip,
        ConflictResolution::Ask => ResolvedDestination::Review(destination.to_path_buf()),
    }
}

/// Moves `source` to `destination`, creating parent directories as
/// needed. Renames when both paths are on the same device; falls back to
/// copy-then-delete across devices. On failure the source is left intact.
pub async fn move_into_library(source: &Path, destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| EngramError::Organization(format!("creating {}: {e}", parent.display())))?;
    }

    match tokio::fs::rename(source, destination).await {
        Ok(()) => {
            info!(from = %source.display(), to = %destination.display(), "organized via rename");
            Ok(())
        }
        Err(rename_err) => {
            warn!(error = %rename_err, "rename failed, falling back to copy-then-delete");
            tokio::fs::copy(source, destination)
                .await
                .map_err(|e| EngramError::Organization(format!("copying into library: {e}")))?;
            tokio::fs::remove_file(source)
                .await
                .map_err(|e| EngramError::Organization(format!("removing staged source: {e}")))?;
            info!(from = %source.display(), to = %destination.display(), "organized via copy+delete");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_reserved_characters() {
        assert_eq!(sanitize_component("Who's Line: Is It?"), "Who's Line Is It");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let name = "  ..the_matrix:   Reloaded??  ";
        let once = sanitize_component(name);
        let twice = sanitize_component(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn sanitize_applies_small_word_titlecase() {
        assert_eq!(sanitize_component("lord of the rings"), "Lord of the Rings");
    }

    #[test]
    fn movie_path_with_year_matches_grammar() {
        let dest = movie_path(Path::new("/lib/movies"), "The Terminator", Some(1984));
        assert_eq!(
            dest.path,
            PathBuf::from("/lib/movies/The Terminator (1984)/The Terminator (1984).mkv")
        );
    }

    #[test]
    fn movie_path_without_year_matches_grammar() {
        let dest = movie_path(Path::new("/lib/movies"), "The Terminator", None);
        assert_eq!(
            dest.path,
            PathBuf::from("/lib/movies/The Terminator/The Terminator.mkv")
        );
    }

    #[test]
    fn tv_episode_path_matches_grammar() {
        let dest = tv_episode_path(Path::new("/lib/tv"), "Arrested Development", 1, 3);
        assert_eq!(
            dest.path,
            PathBuf::from("/lib/tv/Arrested Development/Season 01/Arrested Development - S01E03.mkv")
        );
    }

    #[test]
    fn tv_extra_path_matches_grammar() {
        let dest = tv_extra_path(Path::new("/lib/tv"), "Arrested Development", 1, 1, 2);
        assert_eq!(
            dest.path,
            PathBuf::from("/lib/tv/Arrested Development/Season 01/Extras/Disc 1/extra_2.mkv")
        );
    }
}
