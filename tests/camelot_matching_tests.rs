//! Invariant tests for the pure resolution core: Camelot wheel, text
//! normalization, and the fuzzy matching cascade.

use music_metadata_pipeline::camelot::CamelotKey;
use music_metadata_pipeline::matching::{FuzzyTrackMatcher, MatchStage, TrackCandidate};
use music_metadata_pipeline::normalize::{normalize_track_string, NormalizedTrack};
use rstest::rstest;
use uuid::Uuid;

#[test]
fn camelot_compatibility_universal_invariants() {
    for pitch in 0..12 {
        for mode in 0..2 {
            let key = CamelotKey::from_pitch_class(pitch, mode).unwrap();
            let compatible = key.compatible_keys();
            assert_eq!(compatible.len(), 4, "{} neighborhood size", key);
            assert!(compatible.contains(&key), "{} contains itself", key);
            assert_eq!(key.compatibility_score(key), 1.0);
            for neighbor in compatible.iter().skip(1) {
                assert_eq!(key.compatibility_score(*neighbor), 0.8);
            }
        }
    }
}

#[rstest]
#[case("1A", &["1A", "12A", "2A", "1B"])]
#[case("12B", &["12B", "11B", "1B", "12A"])]
#[case("8B", &["8B", "7B", "9B", "8A"])]
fn camelot_wheel_wraparound(#[case] code: &str, #[case] expected: &[&str]) {
    let key = CamelotKey::parse(code).unwrap();
    let neighbors: Vec<String> = key
        .compatible_keys()
        .iter()
        .map(|k| k.to_string())
        .collect();
    assert_eq!(neighbors, expected);
}

#[test]
fn camelot_key_name_consistency() {
    // A track's camelot_key must always equal the mapping of its key name.
    for (name, code) in [
        ("C major", "8B"),
        ("A minor", "8A"),
        ("C# minor", "12A"),
        ("Ebm", "2A"),
        ("F", "7B"),
    ] {
        assert_eq!(
            CamelotKey::from_key_name(name).unwrap().to_string(),
            code,
            "key {}",
            name
        );
    }
}

#[test]
fn normalizer_is_idempotent_over_varied_inputs() {
    let inputs = [
        "FISHER & Chris Lake - Losing It (Original Mix)",
        "Beyonc\u{e9} feat. JAY-Z \u{2013} Crazy In Love",
        "Artist: Title",
        "Unsplit Title With (Chris Lake Remix)",
        "",
        "   ",
    ];
    for input in inputs {
        let once = normalize_track_string(input);
        let twice = normalize_track_string(&once.normalized_full);
        assert_eq!(
            once.normalized_full, twice.normalized_full,
            "idempotence violated for {:?}",
            input
        );
    }
}

#[test]
fn normalizer_empty_input_yields_empty_record() {
    assert_eq!(normalize_track_string(""), NormalizedTrack::default());
}

#[test]
fn normalize_then_fuzzy_match_scenario() {
    // Spec scenario: scraped string against a single-artist candidate.
    let normalized = normalize_track_string("FISHER & Chris Lake - Losing It (Original Mix)");
    assert_eq!(normalized.artist, "fisher and chris lake");
    assert_eq!(normalized.title, "losing it");
    assert_eq!(normalized.version.as_deref(), Some("original mix"));
    assert!(!normalized.is_remix);

    let candidates = vec![TrackCandidate {
        track_id: Uuid::new_v4(),
        artist: "fisher".to_string(),
        title: "losing it".to_string(),
    }];
    let matcher = FuzzyTrackMatcher::new();
    let result = matcher
        .match_track(&normalized.artist, &normalized.title, &candidates)
        .expect("expected a match above the acceptance floor");

    assert!(result.confidence >= 0.85, "confidence {}", result.confidence);
    assert!(
        matches!(result.stage, MatchStage::HighFuzzy | MatchStage::TokenSet),
        "unexpected stage {:?}",
        result.stage
    );
}

#[test]
fn fuzzy_match_rejects_below_global_floor() {
    let matcher = FuzzyTrackMatcher::new();
    let candidates = vec![TrackCandidate {
        track_id: Uuid::new_v4(),
        artist: "completely unrelated".to_string(),
        title: "nothing in common".to_string(),
    }];
    assert!(matcher
        .match_track("fisher", "losing it", &candidates)
        .is_none());
}

#[rstest]
#[case("deadmau5", "strobe", "deadmau5", "strobe", true)]
#[case("deadmaus", "strobe", "deadmau5", "strobe", true)]
#[case("amelie lens", "higher", "charlotte de witte", "formula", false)]
fn fuzzy_cascade_accepts_and_rejects(
    #[case] scraped_artist: &str,
    #[case] scraped_title: &str,
    #[case] candidate_artist: &str,
    #[case] candidate_title: &str,
    #[case] should_match: bool,
) {
    let matcher = FuzzyTrackMatcher::new();
    let candidates = vec![TrackCandidate {
        track_id: Uuid::new_v4(),
        artist: candidate_artist.to_string(),
        title: candidate_title.to_string(),
    }];
    let result = matcher.match_track(scraped_artist, scraped_title, &candidates);
    assert_eq!(result.is_some(), should_match);
}
