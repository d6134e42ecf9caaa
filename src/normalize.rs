//! Text normalization cascade for scraped track strings.
//!
//! Scraped titles arrive as free-form strings like
//! `"FISHER & Chris Lake - Losing It (Original Mix)"`. Before any matching
//! happens they are folded through a deterministic pipeline: Unicode NFD
//! decomposition with combining marks stripped, version/remix extraction,
//! artist/title splitting, collaborator separator standardization, lowercase
//! punctuation stripping, and whitespace collapse.
//!
//! The cascade is idempotent: normalizing an already-normalized string is a
//! no-op. Empty input yields empty fields, never an error.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Result of normalizing a full `"Artist - Title (Version)"` string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedTrack {
    pub artist: String,
    pub title: String,
    pub version: Option<String>,
    pub remix_type: Option<String>,
    pub is_remix: bool,
    pub normalized_full: String,
}

/// Result of normalizing a title on its own.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedTitle {
    pub title: String,
    pub version: Option<String>,
    pub is_remix: bool,
}

struct VersionPattern {
    regex: Regex,
    version: &'static str,
    is_remix: bool,
}

/// Ordered version/remix patterns; the first match wins and is removed.
static VERSION_PATTERNS: Lazy<Vec<VersionPattern>> = Lazy::new(|| {
    let entry = |pattern: &str, version: &'static str, is_remix: bool| VersionPattern {
        regex: Regex::new(pattern).expect("version pattern"),
        version,
        is_remix,
    };
    vec![
        // Remix variants, capture the remixer when present.
        entry(r"(?i)\((.*?)\s*remix\)", "remix", true),
        entry(r"(?i)\[(.*?)\s*remix\]", "remix", true),
        entry(r"(?i)-\s*(.*?)\s*remix", "remix", true),
        // Named mix/edit types.
        entry(r"(?i)\(original\s*mix\)", "original mix", false),
        entry(r"(?i)\(extended\s*mix\)", "extended mix", false),
        entry(r"(?i)\(club\s*mix\)", "club mix", false),
        entry(r"(?i)\(radio\s*edit\)", "radio edit", false),
        entry(r"(?i)\(dub\s*mix\)", "dub mix", false),
        entry(r"(?i)\(vocal\s*mix\)", "vocal mix", false),
        entry(r"(?i)\(vip\s*mix\)", "vip mix", false),
        entry(r"(?i)\(vip\)", "vip", false),
        entry(r"(?i)\(instrumental\)", "instrumental", false),
        entry(r"(?i)\(acapella\)", "acapella", false),
        // Generic fallbacks.
        entry(r"(?i)\((.*?)\s*version\)", "version", false),
        entry(r"(?i)\((.*?)\s*edit\)", "edit", false),
        entry(r"(?i)\[(.*?)\s*edit\]", "edit", false),
    ]
});

/// Artist collaborator separators, standardized in order.
static ARTIST_SEPARATORS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (Regex::new(r"(?i)\s*&\s*").unwrap(), " and "),
        (Regex::new(r"(?i)\s*\bfeat\.?\s+").unwrap(), " featuring "),
        (Regex::new(r"(?i)\s*\bft\.?\s+").unwrap(), " featuring "),
        (Regex::new(r"(?i)\s*\bvs\.?\s+").unwrap(), " versus "),
        (Regex::new(r"(?i)\s+x\s+").unwrap(), " and "),
        (Regex::new(r"\s*,\s*").unwrap(), " and "),
    ]
});

static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Artist/title separators, tried in order against the first occurrence.
const SPLIT_SEPARATORS: [&str; 5] = [" - ", " \u{2013} ", " \u{2014} ", ": ", " | "];

/// Full normalization pipeline for a scraped track string.
pub fn normalize_track_string(raw: &str) -> NormalizedTrack {
    if raw.trim().is_empty() {
        return NormalizedTrack::default();
    }

    let unicode_folded = fold_unicode(raw);
    let extraction = extract_version(&unicode_folded);
    let (artist_raw, title_raw) = split_artist_title(&extraction.clean);

    let artist = collapse_whitespace(&strip_punctuation(&standardize_separators(&artist_raw)));
    let title = collapse_whitespace(&strip_punctuation(&title_raw));

    let normalized_full = format!("{} {}", artist, title).trim().to_string();

    NormalizedTrack {
        artist,
        title,
        version: extraction.version,
        remix_type: extraction.remix_type,
        is_remix: extraction.is_remix,
        normalized_full,
    }
}

/// Normalize an artist name on its own.
pub fn normalize_artist_name(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }
    let folded = fold_unicode(raw);
    let standardized = standardize_separators(&folded);
    collapse_whitespace(&strip_punctuation(&standardized))
}

/// Normalize a track title on its own, optionally extracting version info.
pub fn normalize_title_only(raw: &str, extract: bool) -> NormalizedTitle {
    if raw.trim().is_empty() {
        return NormalizedTitle::default();
    }
    let folded = fold_unicode(raw);
    let (clean, version, is_remix) = if extract {
        let extraction = extract_version(&folded);
        (extraction.clean, extraction.version, extraction.is_remix)
    } else {
        (folded, None, false)
    };
    NormalizedTitle {
        title: collapse_whitespace(&strip_punctuation(&clean)),
        version,
        is_remix,
    }
}

/// Bare fold used by the fuzzy matcher: unicode, case, punctuation,
/// whitespace. No version extraction or splitting.
pub fn clean_for_comparison(raw: &str) -> String {
    collapse_whitespace(&strip_punctuation(&fold_unicode(raw)))
}

/// Strip tracklist formatting artifacts from a scraped artist credit:
/// leading position numbering ("03. "), trailing "- Topic" channel suffixes,
/// and bracketed platform tags.
pub fn clean_artist_credit(raw: &str) -> String {
    static LEADING_NUMBER: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^\s*\d{1,3}[.)]\s+").unwrap());
    static TOPIC_SUFFIX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)\s*-\s*topic\s*$").unwrap());
    static BRACKET_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\[[^\]]*\]\s*$").unwrap());

    let mut out = LEADING_NUMBER.replace(raw, "").to_string();
    out = TOPIC_SUFFIX.replace(&out, "").to_string();
    out = BRACKET_TAG.replace(&out, "").to_string();
    out.trim().to_string()
}

struct VersionExtraction {
    clean: String,
    version: Option<String>,
    remix_type: Option<String>,
    is_remix: bool,
}

fn extract_version(text: &str) -> VersionExtraction {
    for pattern in VERSION_PATTERNS.iter() {
        if let Some(captures) = pattern.regex.captures(text) {
            let remix_type = captures
                .get(1)
                .map(|m| m.as_str().trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| pattern.version.to_string());
            let clean = pattern.regex.replace(text, "").trim().to_string();
            return VersionExtraction {
                clean,
                version: Some(pattern.version.to_string()),
                remix_type: Some(remix_type),
                is_remix: pattern.is_remix,
            };
        }
    }
    VersionExtraction {
        clean: text.trim().to_string(),
        version: None,
        remix_type: None,
        is_remix: false,
    }
}

fn split_artist_title(text: &str) -> (String, String) {
    for sep in SPLIT_SEPARATORS {
        if let Some(idx) = text.find(sep) {
            let artist = text[..idx].trim().to_string();
            let title = text[idx + sep.len()..].trim().to_string();
            return (artist, title);
        }
    }
    (String::new(), text.trim().to_string())
}

fn standardize_separators(artist: &str) -> String {
    let mut out = artist.to_string();
    for (regex, replacement) in ARTIST_SEPARATORS.iter() {
        out = regex.replace_all(&out, *replacement).to_string();
    }
    out
}

/// NFD decomposition with combining marks removed: "Beyoncé" -> "Beyonce".
fn fold_unicode(text: &str) -> String {
    text.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Lowercase and drop punctuation, preserving hyphens between word
/// characters ("drum-n-bass" survives, trailing "-" does not).
fn strip_punctuation(text: &str) -> String {
    let lowered = text.to_lowercase();
    let chars: Vec<char> = lowered.chars().collect();
    let mut out = String::with_capacity(chars.len());
    for (i, &c) in chars.iter().enumerate() {
        if c.is_alphanumeric() || c.is_whitespace() {
            out.push(c);
        } else if c == '-' {
            let prev_word = i > 0 && chars[i - 1].is_alphanumeric();
            let next_word = i + 1 < chars.len() && chars[i + 1].is_alphanumeric();
            if prev_word && next_word {
                out.push(c);
            } else {
                out.push(' ');
            }
        }
        // All other punctuation is dropped.
    }
    out
}

fn collapse_whitespace(text: &str) -> String {
    MULTI_SPACE.replace_all(text.trim(), " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_normalization() {
        let result = normalize_track_string("FISHER & Chris Lake - Losing It (Original Mix)");
        assert_eq!(result.artist, "fisher and chris lake");
        assert_eq!(result.title, "losing it");
        assert_eq!(result.version.as_deref(), Some("original mix"));
        assert!(!result.is_remix);
        assert_eq!(result.normalized_full, "fisher and chris lake losing it");
    }

    #[test]
    fn test_remix_extraction() {
        let result = normalize_track_string("Dom Dolla - Take It (Fisher Remix)");
        assert_eq!(result.version.as_deref(), Some("remix"));
        assert_eq!(result.remix_type.as_deref(), Some("Fisher"));
        assert!(result.is_remix);
        assert_eq!(result.title, "take it");
    }

    #[test]
    fn test_no_separator_is_all_title() {
        let result = normalize_track_string("Strobe");
        assert_eq!(result.artist, "");
        assert_eq!(result.title, "strobe");
        assert_eq!(result.normalized_full, "strobe");
    }

    #[test]
    fn test_alternate_separators() {
        for raw in [
            "Artist \u{2013} Title",
            "Artist \u{2014} Title",
            "Artist: Title",
            "Artist | Title",
        ] {
            let result = normalize_track_string(raw);
            assert_eq!(result.artist, "artist", "separator in {:?}", raw);
            assert_eq!(result.title, "title", "separator in {:?}", raw);
        }
    }

    #[test]
    fn test_split_on_first_separator_only() {
        let result = normalize_track_string("AC - DC - Thunderstruck");
        assert_eq!(result.artist, "ac");
        assert_eq!(result.title, "dc - thunderstruck");
    }

    #[test]
    fn test_collaborator_standardization() {
        assert_eq!(
            normalize_artist_name("Artist A feat. Artist B"),
            "artist a featuring artist b"
        );
        assert_eq!(
            normalize_artist_name("Artist A ft. Artist B"),
            "artist a featuring artist b"
        );
        assert_eq!(normalize_artist_name("A vs. B"), "a versus b");
        assert_eq!(normalize_artist_name("A x B"), "a and b");
        assert_eq!(normalize_artist_name("A, B"), "a and b");
    }

    #[test]
    fn test_unicode_folding() {
        let result = normalize_track_string("Beyonc\u{e9} - Halo");
        assert_eq!(result.artist, "beyonce");
        assert_eq!(result.title, "halo");
    }

    #[test]
    fn test_intra_word_hyphen_preserved() {
        let result = normalize_title_only("Drum-n-Bass Anthem!!!", false);
        assert_eq!(result.title, "drum-n-bass anthem");
    }

    #[test]
    fn test_empty_input() {
        let result = normalize_track_string("");
        assert_eq!(result, NormalizedTrack::default());
        assert_eq!(normalize_artist_name("   "), "");
        assert_eq!(normalize_title_only("", true), NormalizedTitle::default());
    }

    #[test]
    fn test_idempotence() {
        let inputs = [
            "FISHER & Chris Lake - Losing It (Original Mix)",
            "Beyonc\u{e9} - Halo",
            "Artist A feat. Artist B - Some Title (Extended Mix)",
            "plain title",
        ];
        for raw in inputs {
            let first = normalize_track_string(raw);
            let second = normalize_track_string(&first.normalized_full);
            assert_eq!(
                second.normalized_full, first.normalized_full,
                "not idempotent for {:?}",
                raw
            );
        }
    }

    #[test]
    fn test_alphanumeric_tokens_preserved() {
        let raw = "Some Artist - Some Title 2024";
        let result = normalize_track_string(raw);
        let mut input_tokens: Vec<String> = raw
            .to_lowercase()
            .split_whitespace()
            .filter(|t| *t != "-")
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
            .collect();
        input_tokens.sort();
        let mut output_tokens: Vec<String> = result
            .normalized_full
            .split_whitespace()
            .map(|t| t.to_string())
            .collect();
        output_tokens.sort();
        assert_eq!(input_tokens, output_tokens);
    }

    #[test]
    fn test_title_only_version_extraction() {
        let result = normalize_title_only("Losing It (Extended Mix)", true);
        assert_eq!(result.title, "losing it");
        assert_eq!(result.version.as_deref(), Some("extended mix"));
        assert!(!result.is_remix);

        let no_extract = normalize_title_only("Losing It (Extended Mix)", false);
        assert_eq!(no_extract.title, "losing it extended mix");
        assert_eq!(no_extract.version, None);
    }

    #[test]
    fn test_clean_artist_credit() {
        assert_eq!(clean_artist_credit("03. Adam Beyer"), "Adam Beyer");
        assert_eq!(clean_artist_credit("Adam Beyer - Topic"), "Adam Beyer");
        assert_eq!(clean_artist_credit("Adam Beyer [SoundCloud]"), "Adam Beyer");
    }

    #[test]
    fn test_clean_for_comparison() {
        assert_eq!(
            clean_for_comparison("  Losing It!  (whatever)"),
            "losing it whatever"
        );
    }
}
