//! Silver-layer playlist, membership, and transition models.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::SourceId;

/// Namespace for deriving stable playlist IDs from `(name, source)`.
const PLAYLIST_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0xa7, 0xb8, 0x14, 0x9d, 0xad, 0x11, 0xd1, 0x80, 0xb4, 0x00, 0xc0, 0x4f, 0xd4, 0x30,
    0xc8,
]);

/// A playlist or DJ setlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    pub playlist_id: Uuid,
    pub name: String,
    pub source: SourceId,
    pub source_url: Option<String>,
    pub dj_artist_id: Option<Uuid>,
    pub event_date: Option<NaiveDate>,
    pub venue: Option<String>,
    pub track_count: i32,
    pub data_quality_score: f64,
}

impl Playlist {
    /// Stable playlist identity: replays of the same `(name, source)` pair
    /// upsert instead of creating duplicates.
    pub fn stable_id(name: &str, source: SourceId) -> Uuid {
        let material = format!("{}\u{1f}{}", source.as_str(), name.trim().to_lowercase());
        Uuid::new_v5(&PLAYLIST_ID_NAMESPACE, material.as_bytes())
    }
}

/// Membership of a track in a playlist at a zero-based position.
/// `(playlist_id, position)` is unique; positions are monotonic but not
/// necessarily contiguous.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistTrack {
    pub playlist_id: Uuid,
    pub position: i32,
    pub track_id: Uuid,
}

/// An unordered, counted adjacency edge between two tracks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackTransition {
    pub track_a_id: Uuid,
    pub track_b_id: Uuid,
    pub occurrence_count: i64,
    pub avg_distance: f64,
    pub last_observed_at: DateTime<Utc>,
}

impl TrackTransition {
    /// Canonicalize an edge: order the pair by id and reject self-loops.
    pub fn canonical_pair(a: Uuid, b: Uuid) -> Option<(Uuid, Uuid)> {
        if a == b {
            return None;
        }
        if a < b {
            Some((a, b))
        } else {
            Some((b, a))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_playlist_id_deterministic() {
        let a = Playlist::stable_id("ASOT 1000", SourceId::Tracklists1001);
        let b = Playlist::stable_id("ASOT 1000", SourceId::Tracklists1001);
        assert_eq!(a, b);
        // Case and whitespace variations collapse to the same identity.
        assert_eq!(a, Playlist::stable_id("  asot 1000 ", SourceId::Tracklists1001));
        // Different source yields a different identity.
        assert_ne!(a, Playlist::stable_id("ASOT 1000", SourceId::Mixesdb));
    }

    #[test]
    fn test_canonical_pair_ordering() {
        let low = Uuid::from_u128(1);
        let high = Uuid::from_u128(2);
        assert_eq!(TrackTransition::canonical_pair(high, low), Some((low, high)));
        assert_eq!(TrackTransition::canonical_pair(low, high), Some((low, high)));
    }

    #[test]
    fn test_self_loop_rejected() {
        let id = Uuid::new_v4();
        assert_eq!(TrackTransition::canonical_pair(id, id), None);
    }
}
