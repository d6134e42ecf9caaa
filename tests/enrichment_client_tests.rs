//! Enrichment client tests against mocked HTTP services, including the
//! circuit-breaker behavior around a failing provider.

use std::time::Duration;

use music_metadata_pipeline::camelot::CamelotKey;
use music_metadata_pipeline::config::SpotifyCredentials;
use music_metadata_pipeline::error::PipelineError;
use music_metadata_pipeline::services::circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
};
use music_metadata_pipeline::services::enrichment::discogs::DiscogsClient;
use music_metadata_pipeline::services::enrichment::lastfm::LastfmClient;
use music_metadata_pipeline::services::enrichment::musicbrainz::MusicBrainzClient;
use music_metadata_pipeline::services::enrichment::spotify::SpotifyClient;
use serde_json::json;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_credentials() -> SpotifyCredentials {
    SpotifyCredentials {
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
    }
}

async fn spotify_with_mock(server: &MockServer) -> SpotifyClient {
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-token",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .mount(server)
        .await;

    SpotifyClient::with_urls(
        test_credentials(),
        reqwest::Client::new(),
        &format!("{}/v1", server.uri()),
        &format!("{}/api/token", server.uri()),
    )
}

#[tokio::test]
async fn spotify_track_with_features_exact_match() {
    let server = MockServer::start().await;
    let spotify = spotify_with_mock(&server).await;

    Mock::given(method("GET"))
        .and(path("/v1/tracks/abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "abc123",
            "name": "Losing It",
            "duration_ms": 248000,
            "artists": [{"name": "FISHER"}],
            "external_ids": {"isrc": "US1234567890"},
            "popularity": 80
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/audio-features/abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tempo": 128.0,
            "key": 1,
            "mode": 0,
            "energy": 0.9,
            "danceability": 0.85,
            "valence": 0.6
        })))
        .mount(&server)
        .await;

    let data = spotify.track_with_features("abc123").await.unwrap();
    assert_eq!(data.isrc.as_deref(), Some("US1234567890"));
    assert_eq!(data.bpm, Some(128.0));
    assert_eq!(data.artists, vec!["FISHER"]);
    assert_eq!(data.key_pitch_class, Some(1));
    assert_eq!(data.mode, Some(0));

    // Pitch class 1 in minor mode sits at 12A on the wheel.
    let camelot = CamelotKey::from_pitch_class(1, 0).unwrap();
    assert_eq!(camelot.to_string(), "12A");
}

#[tokio::test]
async fn spotify_isrc_search_returns_first_hit() {
    let server = MockServer::start().await;
    let spotify = spotify_with_mock(&server).await;

    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tracks": {"items": [{
                "id": "xyz",
                "name": "Losing It",
                "duration_ms": 248000,
                "artists": [{"name": "FISHER"}],
                "external_ids": {"isrc": "US1234567890"},
                "popularity": 75
            }]}
        })))
        .mount(&server)
        .await;

    let hit = spotify.search_by_isrc("US1234567890").await.unwrap().unwrap();
    assert_eq!(hit.external_id.as_deref(), Some("xyz"));
    assert_eq!(hit.title.as_deref(), Some("Losing It"));
}

#[tokio::test]
async fn spotify_404_maps_to_not_found() {
    let server = MockServer::start().await;
    let spotify = spotify_with_mock(&server).await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/v1/tracks/.*"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/v1/audio-features/.*"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let result = spotify.track_with_features("missing").await;
    assert!(matches!(result, Err(PipelineError::NotFound { .. })));
}

#[tokio::test]
async fn musicbrainz_isrc_lookup_parses_recording() {
    let server = MockServer::start().await;
    let client = MusicBrainzClient::with_base_url(reqwest::Client::new(), &server.uri());

    Mock::given(method("GET"))
        .and(path("/isrc/US1234567890"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "recordings": [{
                "id": "mbid-1",
                "title": "Losing It",
                "artist-credit": [{"name": "FISHER"}],
                "length": 248000
            }]
        })))
        .mount(&server)
        .await;

    let data = client.lookup_by_isrc("US1234567890").await.unwrap().unwrap();
    assert_eq!(data.external_id.as_deref(), Some("mbid-1"));
    assert_eq!(data.isrc.as_deref(), Some("US1234567890"));
    assert_eq!(data.artists, vec!["FISHER"]);
}

#[tokio::test]
async fn discogs_search_extracts_label_and_artist() {
    let server = MockServer::start().await;
    let client = DiscogsClient::with_base_url(
        "token".to_string(),
        reqwest::Client::new(),
        &server.uri(),
    );

    Mock::given(method("GET"))
        .and(path("/database/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{
                "id": 4242,
                "title": "FISHER - Losing It",
                "label": ["Catch & Release"],
                "genre": ["Electronic"],
                "year": "2018"
            }]
        })))
        .mount(&server)
        .await;

    let data = client
        .search_release("FISHER Losing It", Some("Catch & Release"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(data.external_id.as_deref(), Some("4242"));
    assert_eq!(data.label.as_deref(), Some("Catch & Release"));
    assert_eq!(data.artists, vec!["FISHER"]);
    assert_eq!(data.title.as_deref(), Some("Losing It"));
    assert_eq!(data.release_year, Some(2018));
}

#[tokio::test]
async fn lastfm_track_info_collects_tags() {
    let server = MockServer::start().await;
    let client = LastfmClient::with_base_url(
        "key".to_string(),
        reqwest::Client::new(),
        &server.uri(),
    );

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "track": {
                "name": "Losing It",
                "listeners": "500000",
                "toptags": {"tag": [{"name": "tech house"}, {"name": "dance"}]}
            }
        })))
        .mount(&server)
        .await;

    let data = client.track_info("FISHER", "Losing It").await.unwrap().unwrap();
    assert_eq!(data.popularity, Some(500_000));
    assert_eq!(data.tags, vec!["tech house", "dance"]);
}

#[tokio::test]
async fn circuit_breaker_opens_on_consecutive_5xx_and_recovers() {
    let server = MockServer::start().await;
    let spotify = spotify_with_mock(&server).await;

    // Spotify detail endpoint is down.
    let failing = Mock::given(method("GET"))
        .and(path_regex(r"^/v1/tracks/.*"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .named("failing spotify")
        .mount_as_scoped(&server)
        .await;

    let breaker = CircuitBreakerRegistry::with_config(CircuitBreakerConfig {
        failure_threshold: 3,
        failure_window: Duration::from_secs(60),
        open_timeout: Duration::from_millis(0),
        half_open_success_threshold: 2,
        half_open_probe_interval: Duration::from_millis(0),
    });

    // Three consecutive 5xx responses for distinct tracks trip the circuit.
    for track in ["t1", "t2", "t3"] {
        let result = breaker
            .execute("spotify", || spotify.track_with_features(track))
            .await;
        assert!(result.is_err());
    }
    assert_eq!(breaker.state("spotify").await, CircuitState::Open);
    drop(failing);

    // While open (before the timeout elapses in a real deployment), calls
    // fail fast with the retriable CircuitOpen error. Here the timeout is
    // zero so the circuit goes straight to probing; mock recovery first.
    Mock::given(method("GET"))
        .and(path_regex(r"^/v1/tracks/.*"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "t4",
            "name": "Recovered",
            "duration_ms": 200000,
            "artists": [{"name": "FISHER"}],
            "external_ids": {"isrc": "US0000000001"},
            "popularity": 10
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/v1/audio-features/.*"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    // Two successful probes close the circuit again.
    for track in ["t4", "t5"] {
        breaker
            .execute("spotify", || spotify.track_with_features(track))
            .await
            .unwrap();
    }
    assert_eq!(breaker.state("spotify").await, CircuitState::Closed);
}

#[tokio::test]
async fn circuit_open_error_is_retriable() {
    let breaker = CircuitBreakerRegistry::new();
    for _ in 0..3 {
        breaker.record_failure("spotify").await;
    }
    let result: music_metadata_pipeline::Result<()> =
        breaker.execute("spotify", || async { Ok(()) }).await;
    match result {
        Err(e) => assert!(e.is_retriable(), "CircuitOpen must be retriable"),
        Ok(_) => panic!("expected the open circuit to block the call"),
    }
}
