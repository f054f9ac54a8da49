//! Volume label parsing (spec.md §4.3).

use once_cell::sync::Lazy;
use regex::Regex;

const GENERIC_LABELS: &[&str] = &[
    "LOGICAL_VOLUME_ID",
    "VIDEO_TS",
    "BDMV",
    "DISC",
    "DVD",
    "BLURAY",
    "BD",
    "NO_LABEL",
    "UNTITLED",
    "VOLUME",
    "NEW_VOLUME",
];

static TRAILING_DISC_OR_DIGITS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[_\s-]*(DISC\s*\d*|\d+)$").unwrap());

static SEASON_DISC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?P<name>.+?)[_\s-]+S(?P<season>\d{1,2})D(?P<disc>\d{1,2})$").unwrap());

static SEASON_EPISODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?P<name>.+?)[_\s-]+S(?P<season>\d{1,2})E\d{1,3}$").unwrap());

static SEASON_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?P<name>.+?)[_\s-]+SEASON[_\s-]*(?P<season>\d{1,3})$").unwrap());

static TRAILING_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<name>.+?)[_\s-]+(?P<num>\d{1,4})$").unwrap());

static VOLUME_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[_\s-]*(DISC\s*\d*|BLU[_\s-]?RAY|BD\d{2}|BD|DVD\d?)$").unwrap()
});

static COLLAPSE_WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[_\s-]+").unwrap());

const SMALL_WORDS: &[&str] = &[
    "a", "an", "and", "as", "at", "but", "by", "for", "in", "nor", "of", "on", "or", "the", "to",
    "with",
];

/// Outcome of parsing a raw volume label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelParse {
    pub name: Option<String>,
    pub season: Option<u32>,
    pub disc: Option<u32>,
}

/// True when `label`, after stripping a trailing disc/number suffix, is
/// one of the fixed generic-label tokens (case-insensitive).
fn is_generic(label: &str) -> bool {
    let stripped = TRAILING_DISC_OR_DIGITS.replace(label.trim(), "");
    let normalized = stripped.trim().to_ascii_uppercase();
    GENERIC_LABELS.contains(&normalized.as_str())
}

fn strip_volume_suffix(name: &str) -> String {
    VOLUME_SUFFIX_RE.replace(name, "").trim().to_string()
}

fn normalize_and_titlecase(raw: &str) -> String {
    let collapsed = COLLAPSE_WHITESPACE_RE.replace_all(raw, " ");
    let words: Vec<&str> = collapsed.trim().split(' ').filter(|w| !w.is_empty()).collect();
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

fn clean_name(raw: &str) -> Option<String> {
    let stripped = strip_volume_suffix(raw);
    let title = normalize_and_titlecase(&stripped);
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

/// Parses a raw optical volume label into an optional show/movie name,
/// season, and disc number, per spec.md §4.3's accepted grammars:
/// `NAME_SxxDyy`, `NAME_SEASON_N`, `NAME_SxxEyy`, and `NAME` plus a
/// trailing number interpreted as a season (years 100..9999 rejected).
pub fn parse_volume_label(label: &str) -> LabelParse {
    let trimmed = label.trim();
    if trimmed.is_empty() || is_generic(trimmed) {
        return LabelParse::default();
    }

    if let Some(caps) = SEASON_DISC_RE.captures(trimmed) {
        let season: u32 = caps["season"].parse().unwrap_or(1);
        let disc: u32 = caps["disc"].parse().unwrap_or(1);
        return LabelParse {
            name: clean_name(&caps["name"]),
            season: Some(season),
            disc: Some(disc),
        };
    }

    if let Some(caps) = SEASON_EPISODE_RE.captures(trimmed) {
        let season: u32 = caps["season"].parse().unwrap_or(1);
        return LabelParse {
            name: clean_name(&caps["name"]),
            season: Some(season),
            disc: None,
        };
    }

    if let Some(caps) = SEASON_WORD_RE.captures(trimmed) {
        let season: u32 = caps["season"].parse().unwrap_or(1);
        return LabelParse {
            name: clean_name(&caps["name"]),
            season: Some(season),
            disc: None,
        };
    }

    if let Some(caps) = TRAILING_NUMBER_RE.captures(trimmed) {
        let num: u32 = caps["num"].parse().unwrap_or(0);
        if (1..=99).contains(&num) {
            return LabelParse {
                name: clean_name(&caps["name"]),
                season: Some(num),
                disc: None,
            };
        }
        // 100..9999 reads as a year, not a season; keep the whole label as the name.
        return LabelParse {
            name: clean_name(trimmed),
            season: None,
            disc: None,
        };
    }

    LabelParse {
        name: clean_name(trimmed),
        season: None,
        disc: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_season_disc_grammar() {
        let parsed = parse_volume_label("STAR_TREK_PICARD_S03D02");
        assert_eq!(parsed.name.as_deref(), Some("Star Trek Picard"));
        assert_eq!(parsed.season, Some(3));
        assert_eq!(parsed.disc, Some(2));
    }

    #[test]
    fn parses_season_word_grammar() {
        let parsed = parse_volume_label("ARRESTED_DEVELOPMENT_SEASON_1");
        assert_eq!(parsed.name.as_deref(), Some("Arrested Development"));
        assert_eq!(parsed.season, Some(1));
    }

    #[test]
    fn parses_season_episode_grammar() {
        let parsed = parse_volume_label("THE_OFFICE_S02E01");
        assert_eq!(parsed.name.as_deref(), Some("The Office"));
        assert_eq!(parsed.season, Some(2));
    }

    #[test]
    fn trailing_small_number_is_a_season() {
        let parsed = parse_volume_label("BREAKING_BAD_3");
        assert_eq!(parsed.name.as_deref(), Some("Breaking Bad"));
        assert_eq!(parsed.season, Some(3));
    }

    #[test]
    fn trailing_large_number_is_a_year_not_a_season() {
        let parsed = parse_volume_label("TERMINATOR_1991");
        assert_eq!(parsed.season, None);
        assert!(parsed.name.is_some());
    }

    #[test]
    fn generic_labels_yield_nothing() {
        for label in ["LOGICAL_VOLUME_ID", "disc", "DVD_1", "NEW_VOLUME"] {
            let parsed = parse_volume_label(label);
            assert_eq!(parsed, LabelParse::default(), "label {label} should be generic");
        }
    }

    #[test]
    fn strips_volume_suffix_and_titlecases_with_small_words() {
        let parsed = parse_volume_label("LORD_OF_THE_RINGS_DISC1");
        assert_eq!(parsed.name.as_deref(), Some("Lord of the Rings"));
    }
}
