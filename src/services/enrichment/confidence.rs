//! Confidence scoring for enrichment results.
//!
//! The best applicable attribution tier sets the base score; a contextual
//! boost of up to +0.10 applies only when DJ-artist affinity and setlist
//! coherence both agree. Final scores are bucketed into tiers.

use serde::{Deserialize, Serialize};

use crate::matching::MIN_ACCEPTABLE_CONFIDENCE;
use crate::models::ConfidenceTier;

/// How a track's metadata was attributed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionMethod {
    /// ISRC or platform-ID lookup against Spotify/MusicBrainz.
    ExactApiMatch,
    /// Text match disambiguated by normalized title plus label.
    DisambiguatedText,
    /// Fuzzy cascade match; carries the raw similarity score.
    FuzzyMatch { similarity: f64 },
    /// Community source (Discogs, Last.fm) with an external link.
    CommunitySource,
    /// Inference from context only.
    ContextualInference,
}

/// A scored attribution, before and after contextual boosting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceScore {
    pub method_score: f64,
    pub contextual_boost: f64,
}

impl ConfidenceScore {
    pub fn final_score(&self) -> f64 {
        (self.method_score + self.contextual_boost).min(1.0)
    }

    pub fn tier(&self) -> ConfidenceTier {
        ConfidenceTier::from_score(self.final_score())
    }
}

/// Base score for an attribution method.
pub fn score_method(method: AttributionMethod) -> f64 {
    match method {
        AttributionMethod::ExactApiMatch => 0.95,
        AttributionMethod::DisambiguatedText => 0.80,
        AttributionMethod::FuzzyMatch { similarity } => scale_fuzzy(similarity),
        AttributionMethod::CommunitySource => 0.60,
        AttributionMethod::ContextualInference => 0.30,
    }
}

/// Fuzzy similarities scale linearly from the acceptance threshold to 1.0
/// onto [0.70, 0.90].
fn scale_fuzzy(similarity: f64) -> f64 {
    let floor = MIN_ACCEPTABLE_CONFIDENCE;
    let clamped = similarity.clamp(floor, 1.0);
    0.70 + (clamped - floor) / (1.0 - floor) * 0.20
}

/// Compose the final score: best method wins, then the contextual boost is
/// added only when both context signals agree, capped at 1.0.
pub fn score_with_context(
    method: AttributionMethod,
    dj_affinity: bool,
    setlist_coherence: bool,
) -> ConfidenceScore {
    let method_score = score_method(method);
    let contextual_boost = if dj_affinity && setlist_coherence {
        0.10
    } else {
        0.0
    };
    ConfidenceScore {
        method_score,
        contextual_boost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_base_scores() {
        assert_eq!(score_method(AttributionMethod::ExactApiMatch), 0.95);
        assert_eq!(score_method(AttributionMethod::DisambiguatedText), 0.80);
        assert_eq!(score_method(AttributionMethod::CommunitySource), 0.60);
        assert_eq!(score_method(AttributionMethod::ContextualInference), 0.30);
    }

    #[test]
    fn test_fuzzy_scaling() {
        assert!((score_method(AttributionMethod::FuzzyMatch { similarity: 0.80 }) - 0.70).abs() < 1e-9);
        assert!((score_method(AttributionMethod::FuzzyMatch { similarity: 1.0 }) - 0.90).abs() < 1e-9);
        let mid = score_method(AttributionMethod::FuzzyMatch { similarity: 0.90 });
        assert!((mid - 0.80).abs() < 1e-9);
    }

    #[test]
    fn test_contextual_boost_requires_both_signals() {
        let both = score_with_context(AttributionMethod::CommunitySource, true, true);
        assert!((both.final_score() - 0.70).abs() < 1e-9);

        let one = score_with_context(AttributionMethod::CommunitySource, true, false);
        assert!((one.final_score() - 0.60).abs() < 1e-9);
    }

    #[test]
    fn test_boost_caps_at_one() {
        let score = score_with_context(AttributionMethod::ExactApiMatch, true, true);
        assert_eq!(score.final_score(), 1.0);
    }

    #[test]
    fn test_tier_bucketing() {
        assert_eq!(
            score_with_context(AttributionMethod::ExactApiMatch, false, false).tier(),
            ConfidenceTier::High
        );
        assert_eq!(
            score_with_context(AttributionMethod::DisambiguatedText, false, false).tier(),
            ConfidenceTier::Medium
        );
        assert_eq!(
            score_with_context(AttributionMethod::CommunitySource, false, false).tier(),
            ConfidenceTier::Low
        );
        assert_eq!(
            score_with_context(AttributionMethod::ContextualInference, false, false).tier(),
            ConfidenceTier::Unreliable
        );
    }
}
