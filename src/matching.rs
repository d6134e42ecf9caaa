//! Multi-stage fuzzy matching cascade for track and artist resolution.
//!
//! A scraped `(artist, title)` pair is scored against database candidates
//! through ordered stages, each with its own acceptance threshold:
//!
//! | Stage        | Threshold | Technique                                  |
//! |--------------|-----------|--------------------------------------------|
//! | Exact        | 1.00      | Normalized equality on both fields         |
//! | High fuzzy   | 0.95      | Weighted bigram similarity (0.6/0.4)       |
//! | Token set    | 0.85      | Token Jaccard over "artist title"          |
//! | Jaro-Winkler | 0.90      | Prefix-weighted similarity (0.6/0.4)       |
//! | Levenshtein  | 0.85      | 1 - edit_distance / max_len (0.6/0.4)      |
//!
//! The best score across all tiers is tracked so a later, higher-scoring
//! stage can win; anything below the global floor of 0.80 is rejected.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::normalize::clean_for_comparison;

/// Global minimum confidence for any accepted match.
pub const MIN_ACCEPTABLE_CONFIDENCE: f64 = 0.80;

const EXACT_THRESHOLD: f64 = 1.0;
const HIGH_FUZZY_THRESHOLD: f64 = 0.95;
const TOKEN_SET_THRESHOLD: f64 = 0.85;
const JARO_WINKLER_THRESHOLD: f64 = 0.90;
const LEVENSHTEIN_THRESHOLD: f64 = 0.85;

/// Artist-only matching acceptance threshold.
pub const ARTIST_MIN_CONFIDENCE: f64 = 0.85;

const ARTIST_WEIGHT: f64 = 0.6;
const TITLE_WEIGHT: f64 = 0.4;

/// Which cascade stage produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStage {
    Exact,
    HighFuzzy,
    TokenSet,
    JaroWinkler,
    Levenshtein,
}

impl MatchStage {
    /// Cascade position, used to break confidence ties.
    fn order(self) -> u8 {
        match self {
            Self::Exact => 0,
            Self::HighFuzzy => 1,
            Self::TokenSet => 2,
            Self::JaroWinkler => 3,
            Self::Levenshtein => 4,
        }
    }
}

/// A candidate track pulled from the silver layer for matching.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackCandidate {
    pub track_id: Uuid,
    pub artist: String,
    pub title: String,
}

/// A scored match result.
#[derive(Debug, Clone)]
pub struct TrackMatch {
    pub candidate: TrackCandidate,
    pub confidence: f64,
    pub stage: MatchStage,
}

/// An artist candidate with aliases.
#[derive(Debug, Clone)]
pub struct ArtistCandidate {
    pub artist_id: Uuid,
    pub name: String,
    pub aliases: Vec<String>,
}

/// A scored artist match.
#[derive(Debug, Clone)]
pub struct ArtistMatch {
    pub candidate: ArtistCandidate,
    pub confidence: f64,
}

/// Cascade matcher over `(artist, title)` pairs.
#[derive(Debug, Clone, Default)]
pub struct FuzzyTrackMatcher;

impl FuzzyTrackMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Match a scraped pair against candidates, returning the best candidate
    /// at or above the global floor, or `None`.
    pub fn match_track(
        &self,
        scraped_artist: &str,
        scraped_title: &str,
        candidates: &[TrackCandidate],
    ) -> Option<TrackMatch> {
        if candidates.is_empty() {
            return None;
        }

        let artist = clean_for_comparison(scraped_artist);
        let title = clean_for_comparison(scraped_title);

        let mut best: Option<TrackMatch> = None;

        for candidate in candidates {
            let cand_artist = clean_for_comparison(&candidate.artist);
            let cand_title = clean_for_comparison(&candidate.title);

            if artist == cand_artist && title == cand_title {
                return Some(TrackMatch {
                    candidate: candidate.clone(),
                    confidence: EXACT_THRESHOLD,
                    stage: MatchStage::Exact,
                });
            }

            let stages = [
                (
                    MatchStage::HighFuzzy,
                    HIGH_FUZZY_THRESHOLD,
                    weighted_pair(&artist, &cand_artist, &title, &cand_title, bigram_similarity),
                ),
                (
                    MatchStage::TokenSet,
                    TOKEN_SET_THRESHOLD,
                    token_set_similarity(
                        &format!("{} {}", artist, title),
                        &format!("{} {}", cand_artist, cand_title),
                    ),
                ),
                (
                    MatchStage::JaroWinkler,
                    JARO_WINKLER_THRESHOLD,
                    weighted_pair(&artist, &cand_artist, &title, &cand_title, strsim::jaro_winkler),
                ),
                (
                    MatchStage::Levenshtein,
                    LEVENSHTEIN_THRESHOLD,
                    weighted_pair(
                        &artist,
                        &cand_artist,
                        &title,
                        &cand_title,
                        levenshtein_similarity,
                    ),
                ),
            ];

            for (stage, threshold, score) in stages {
                if score < threshold {
                    continue;
                }
                let better = match &best {
                    None => true,
                    Some(current) => {
                        score > current.confidence
                            || (score == current.confidence
                                && stage.order() < current.stage.order())
                    }
                };
                if better {
                    best = Some(TrackMatch {
                        candidate: candidate.clone(),
                        confidence: score,
                        stage,
                    });
                }
            }
        }

        best.filter(|m| m.confidence >= MIN_ACCEPTABLE_CONFIDENCE)
    }
}

/// Artist matcher that also scans each candidate's aliases.
#[derive(Debug, Clone, Default)]
pub struct FuzzyArtistMatcher;

impl FuzzyArtistMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Match a scraped artist name against candidates; the score for each
    /// candidate is the maximum over its canonical name and aliases.
    pub fn match_artist(
        &self,
        scraped_name: &str,
        candidates: &[ArtistCandidate],
    ) -> Option<ArtistMatch> {
        if candidates.is_empty() {
            return None;
        }

        let scraped = clean_for_comparison(scraped_name);
        let mut best: Option<ArtistMatch> = None;

        for candidate in candidates {
            let mut score = name_similarity(&scraped, &clean_for_comparison(&candidate.name));
            for alias in &candidate.aliases {
                let alias_score = name_similarity(&scraped, &clean_for_comparison(alias));
                score = score.max(alias_score);
            }

            let better = best.as_ref().map_or(true, |b| score > b.confidence);
            if better {
                best = Some(ArtistMatch {
                    candidate: candidate.clone(),
                    confidence: score,
                });
            }
        }

        best.filter(|m| m.confidence >= ARTIST_MIN_CONFIDENCE)
    }
}

fn weighted_pair(
    artist_a: &str,
    artist_b: &str,
    title_a: &str,
    title_b: &str,
    similarity: fn(&str, &str) -> f64,
) -> f64 {
    similarity(artist_a, artist_b) * ARTIST_WEIGHT + similarity(title_a, title_b) * TITLE_WEIGHT
}

/// Character-bigram Dice similarity, the sequence-level stage of the cascade.
fn bigram_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    strsim::sorensen_dice(a, b)
}

/// Bag-of-tokens set ratio; insensitive to word order, and generous when one
/// side's tokens are a subset of the other's (collaborator credits dropped by
/// one source should still match).
pub fn token_set_similarity(a: &str, b: &str) -> f64 {
    let tokens_a: HashSet<&str> = a.split_whitespace().collect();
    let tokens_b: HashSet<&str> = b.split_whitespace().collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let mut intersection: Vec<&str> = tokens_a.intersection(&tokens_b).copied().collect();
    let mut only_a: Vec<&str> = tokens_a.difference(&tokens_b).copied().collect();
    let mut only_b: Vec<&str> = tokens_b.difference(&tokens_a).copied().collect();
    intersection.sort_unstable();
    only_a.sort_unstable();
    only_b.sort_unstable();

    let base = intersection.join(" ");
    let combined_a = join_nonempty(&base, &only_a.join(" "));
    let combined_b = join_nonempty(&base, &only_b.join(" "));

    let ratios = [
        levenshtein_similarity(&base, &combined_a),
        levenshtein_similarity(&base, &combined_b),
        levenshtein_similarity(&combined_a, &combined_b),
    ];
    ratios.into_iter().fold(0.0, f64::max)
}

fn join_nonempty(a: &str, b: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_string(),
        (_, true) => a.to_string(),
        _ => format!("{} {}", a, b),
    }
}

/// `1 - edit_distance / max_len`, the typo-tolerance stage.
pub fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 0.0;
    }
    let distance = levenshtein::levenshtein(a, b);
    1.0 - distance as f64 / max_len as f64
}

/// Single-name similarity used by the artist matcher: the best of exact,
/// bigram, and token-set comparisons.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return if a.is_empty() { 0.0 } else { 1.0 };
    }
    bigram_similarity(a, b).max(token_set_similarity(a, b))
}

/// Plain normalized title similarity used by recovery lookups. Callers must
/// still apply their own acceptance thresholds.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let a = clean_for_comparison(a);
    let b = clean_for_comparison(b);
    if a == b {
        return if a.is_empty() { 0.0 } else { 1.0 };
    }
    bigram_similarity(&a, &b).max(token_set_similarity(&a, &b))
}
