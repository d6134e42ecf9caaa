//! Silver-layer artist models.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PipelineError;

/// A deduplicated silver artist. `normalized_name` is the unique key;
/// `bronze_ids` records lineage back to contributing bronze rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artist {
    pub artist_id: Uuid,
    pub canonical_name: String,
    pub normalized_name: String,
    pub aliases: Vec<String>,
    pub spotify_id: Option<String>,
    pub musicbrainz_id: Option<String>,
    pub bronze_ids: Vec<Uuid>,
}

impl Artist {
    pub fn new(canonical_name: &str, normalized_name: &str) -> Self {
        Self {
            artist_id: Uuid::new_v4(),
            canonical_name: canonical_name.to_string(),
            normalized_name: normalized_name.to_string(),
            aliases: Vec::new(),
            spotify_id: None,
            musicbrainz_id: None,
            bronze_ids: Vec::new(),
        }
    }
}

/// Role an artist plays on a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtistRole {
    Primary,
    Featured,
    Remixer,
    Producer,
}

impl ArtistRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Featured => "featured",
            Self::Remixer => "remixer",
            Self::Producer => "producer",
        }
    }
}

impl fmt::Display for ArtistRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtistRole {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(Self::Primary),
            "featured" => Ok(Self::Featured),
            "remixer" => Ok(Self::Remixer),
            "producer" => Ok(Self::Producer),
            other => Err(PipelineError::Validation(format!(
                "unknown artist role: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [
            ArtistRole::Primary,
            ArtistRole::Featured,
            ArtistRole::Remixer,
            ArtistRole::Producer,
        ] {
            assert_eq!(role.as_str().parse::<ArtistRole>().unwrap(), role);
        }
        assert!("vocalist".parse::<ArtistRole>().is_err());
    }
}
