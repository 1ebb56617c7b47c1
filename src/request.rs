use crate::error::EngineError;
use crate::matching::normalize::{normalize_activities, normalize_genres, normalize_moods};
use crate::models::{BpmRange, TempoBucket};
use serde::{Deserialize, Serialize};
use std::hash::{DefaultHasher, Hash, Hasher};

/// Requested playlist length, either a track count or a minute budget
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PlaylistLength {
    Minutes(u32),
    Tracks(usize),
}

impl PlaylistLength {
    fn value(&self) -> u64 {
        match self {
            PlaylistLength::Minutes(minutes) => *minutes as u64,
            PlaylistLength::Tracks(tracks) => *tracks as u64,
        }
    }
}

/// Tempo preference: a named bucket, a BPM range, or both
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TempoPreference {
    pub bucket: Option<TempoBucket>,
    pub bpm_range: Option<BpmRange>,
}

/// A user's playlist request. All collection fields default to empty so JSON
/// requests only spell out what they care about.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistRequest {
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub mood: Vec<String>,
    #[serde(default)]
    pub activity: Vec<String>,
    #[serde(default)]
    pub tempo: TempoPreference,
    pub length: PlaylistLength,
    /// How far from exact matches the selection may wander, in [0, 1]
    #[serde(default)]
    pub surprise: f32,
    pub min_artists: Option<usize>,
    #[serde(default)]
    pub suggested_artists: Vec<String>,
    #[serde(default)]
    pub suggested_albums: Vec<String>,
    #[serde(default)]
    pub suggested_tracks: Vec<String>,
    #[serde(default)]
    pub disallowed_artists: Vec<String>,
    #[serde(default)]
    pub enable_discovery: bool,
    pub llm_additional_instructions: Option<String>,
    /// Opaque configuration handed to the refiner collaborator; the engine
    /// never interprets it
    pub refiner_config: Option<serde_json::Value>,
}

impl Default for PlaylistRequest {
    fn default() -> Self {
        PlaylistRequest {
            genres: Vec::new(),
            mood: Vec::new(),
            activity: Vec::new(),
            tempo: TempoPreference::default(),
            length: PlaylistLength::Tracks(20),
            surprise: 0.0,
            min_artists: None,
            suggested_artists: Vec::new(),
            suggested_albums: Vec::new(),
            suggested_tracks: Vec::new(),
            disallowed_artists: Vec::new(),
            enable_discovery: false,
            llm_additional_instructions: None,
            refiner_config: None,
        }
    }
}

impl PlaylistRequest {
    /// Entry validation. Rejected requests never start a generation.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.length.value() == 0 {
            return Err(EngineError::InvalidRequest(
                "length value must be positive".to_string(),
            ));
        }
        if !self.surprise.is_finite() || !(0.0..=1.0).contains(&self.surprise) {
            return Err(EngineError::InvalidRequest(
                "surprise must be within [0, 1]".to_string(),
            ));
        }
        if let Some(min_artists) = self.min_artists {
            if min_artists == 0 {
                return Err(EngineError::InvalidRequest(
                    "minArtists must be positive".to_string(),
                ));
            }
        }
        if let Some(range) = self.tempo.bpm_range {
            if range.min > range.max {
                return Err(EngineError::InvalidRequest(
                    "bpmRange min must not exceed max".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Canonicalize the request once at entry: genres through the genre
    /// normalization map, mood/activity to their category sets, artist lists
    /// trimmed. Scoring and filtering assume a normalized request.
    pub fn normalized(&self) -> PlaylistRequest {
        let trim = |values: &[String]| -> Vec<String> {
            values
                .iter()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect()
        };

        PlaylistRequest {
            genres: normalize_genres(&self.genres),
            mood: normalize_moods(&self.mood),
            activity: normalize_activities(&self.activity),
            suggested_artists: trim(&self.suggested_artists),
            suggested_albums: trim(&self.suggested_albums),
            suggested_tracks: trim(&self.suggested_tracks),
            disallowed_artists: trim(&self.disallowed_artists),
            ..self.clone()
        }
    }

    /// Deterministic seed for a request, used when the caller does not pass
    /// an explicit seed. The oracle is the only entropy outside the seed.
    pub fn derive_seed(&self) -> u64 {
        // The canonical JSON form makes the hash independent of in-memory
        // representation details
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = DefaultHasher::new();
        canonical.hash(&mut hasher);
        hasher.finish()
    }

    /// Load a JSON array of requests from a file
    pub fn load_all_from_file(path: &str) -> Result<Vec<PlaylistRequest>, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let requests: Vec<PlaylistRequest> = serde_json::from_str(&content)?;
        Ok(requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_length() {
        let request = PlaylistRequest {
            length: PlaylistLength::Tracks(0),
            ..Default::default()
        };
        assert!(matches!(
            request.validate(),
            Err(EngineError::InvalidRequest(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_surprise() {
        let request = PlaylistRequest {
            surprise: 1.5,
            ..Default::default()
        };
        assert!(request.validate().is_err());

        let request = PlaylistRequest {
            surprise: -0.1,
            ..Default::default()
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn rejects_inverted_bpm_range() {
        let request = PlaylistRequest {
            tempo: TempoPreference {
                bucket: None,
                bpm_range: Some(BpmRange { min: 160, max: 120 }),
            },
            ..Default::default()
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn normalization_canonicalizes_tags() {
        let request = PlaylistRequest {
            genres: vec!["Hip-Hop".to_string(), "hip hop".to_string()],
            mood: vec!["Chill".to_string()],
            activity: vec!["Gym".to_string()],
            disallowed_artists: vec!["  Bob  ".to_string()],
            ..Default::default()
        };
        let normalized = request.normalized();
        assert_eq!(normalized.genres, vec!["hip hop"]);
        assert_eq!(normalized.mood, vec!["relaxed"]);
        assert_eq!(normalized.activity, vec!["workout"]);
        assert_eq!(normalized.disallowed_artists, vec!["Bob"]);
    }

    #[test]
    fn seed_is_stable_for_identical_requests() {
        let request = PlaylistRequest {
            genres: vec!["Rock".to_string()],
            length: PlaylistLength::Tracks(10),
            ..Default::default()
        };
        assert_eq!(request.derive_seed(), request.clone().derive_seed());

        let other = PlaylistRequest {
            genres: vec!["Jazz".to_string()],
            ..request.clone()
        };
        assert_ne!(request.derive_seed(), other.derive_seed());
    }

    #[test]
    fn length_round_trips_through_json() {
        let json = r#"{"length":{"type":"tracks","value":12}}"#;
        let request: PlaylistRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.length, PlaylistLength::Tracks(12));

        let json = r#"{"length":{"type":"minutes","value":45},"surprise":0.4}"#;
        let request: PlaylistRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.length, PlaylistLength::Minutes(45));
    }
}
