use crate::error::DiscoveryError;
use crate::models::Track;
use crate::playlist::strategy::PlaylistStrategy;
use crate::request::PlaylistRequest;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A track from outside the library, suggested by the discovery collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryCandidate {
    /// Stable id across calls; used for deduplication
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    pub duration_seconds: Option<u32>,
    pub score: f32,
}

/// Context handed to the discovery collaborator for one lookup
pub struct DiscoveryQuery<'a> {
    pub library_track: &'a Track,
    pub user_library: &'a [Track],
    pub request: &'a PlaylistRequest,
    pub strategy: &'a PlaylistStrategy,
    pub exclude_ids: &'a HashSet<String>,
}

/// External discovery capability. Lookups are sequential (the collaborator
/// imposes its own rate limits) and never retried within a generation.
pub trait DiscoverySource {
    fn find_discovery_tracks(
        &self,
        query: &DiscoveryQuery<'_>,
    ) -> Result<Vec<DiscoveryCandidate>, DiscoveryError>;

    fn generate_explanation(
        &self,
        candidate: &DiscoveryCandidate,
        library_track: &Track,
        request: &PlaylistRequest,
    ) -> Result<String, DiscoveryError>;
}

/// A discovery candidate placed into the final playlist, directly after the
/// library track that inspired it
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryTrack {
    /// Entry id in the final track sequence: `discovery:` + stable id
    pub entry_id: String,
    pub candidate: DiscoveryCandidate,
    /// Library track file id this suggestion follows
    pub inspired_by: String,
    pub explanation: String,
}

impl DiscoveryTrack {
    pub fn new(candidate: DiscoveryCandidate, inspired_by: &str, explanation: String) -> Self {
        DiscoveryTrack {
            entry_id: format!("discovery:{}", candidate.id),
            candidate,
            inspired_by: inspired_by.to_string(),
            explanation,
        }
    }

    /// Fallback explanation when the collaborator cannot produce one
    pub fn templated_explanation(candidate: &DiscoveryCandidate, library_track: &Track) -> String {
        format!(
            "Suggested because you selected {} by {}: {} by {} is a close match outside your library.",
            library_track.title, library_track.artist, candidate.title, candidate.artist
        )
    }
}
