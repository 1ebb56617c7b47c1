use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Duration assumed for tracks without a known length. Used in scoring and
/// summaries only, never written back to the catalog.
pub const DEFAULT_DURATION_SECONDS: u32 = 180;

/// A track as stored in the catalog, with the fields the engine consumes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub track_file_id: String,
    pub library_root_id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Raw genre tags in first-seen order; matching is case-insensitive,
    /// display preserves casing
    #[serde(default)]
    pub genres: Vec<String>,
    pub year: Option<u32>,
    pub track_no: Option<u32>,
    pub duration_seconds: Option<u32>,
    pub bpm: Option<u32>,
    /// Optional enhanced metadata, possibly manually edited
    pub enhanced: Option<EnhancedMetadata>,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Enhanced metadata attached to a track by enrichment or manual editing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedMetadata {
    #[serde(default)]
    pub mood: Vec<String>,
    #[serde(default)]
    pub activity: Vec<String>,
    pub tempo: Option<TempoTag>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub similar_artists: Vec<String>,
    /// Field names the user edited by hand; enrichment must not overwrite them
    #[serde(default)]
    pub manual_fields: HashSet<String>,
}

/// An enhanced tempo tag: either a measured BPM or a named bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TempoTag {
    Bpm(u32),
    Bucket(TempoBucket),
}

/// Tempo bucket with fixed BPM thresholds (slow < 90, medium < 140, fast >= 140)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TempoBucket {
    Slow,
    Medium,
    Fast,
    Unknown,
}

impl TempoBucket {
    /// Ordinal used for bucket-delta transition scoring; `None` for unknown
    pub fn ordinal(&self) -> Option<i32> {
        match self {
            TempoBucket::Slow => Some(0),
            TempoBucket::Medium => Some(1),
            TempoBucket::Fast => Some(2),
            TempoBucket::Unknown => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TempoBucket::Slow => "slow",
            TempoBucket::Medium => "medium",
            TempoBucket::Fast => "fast",
            TempoBucket::Unknown => "unknown",
        }
    }
}

/// An inclusive BPM range requested by the user or suggested by a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BpmRange {
    pub min: u32,
    pub max: u32,
}

impl BpmRange {
    pub fn contains(&self, bpm: u32) -> bool {
        bpm >= self.min && bpm <= self.max
    }
}

impl Track {
    /// Composite identity, unique across library roots
    pub fn composite_key(&self) -> String {
        format!("{}-{}", self.track_file_id, self.library_root_id)
    }

    /// All genre tags for this track, combining the raw tags and the enhanced
    /// genres, duplicates removed case-insensitively
    pub fn all_genres(&self) -> Vec<String> {
        let mut all_genres: Vec<String> = self.genres.clone();
        if let Some(ref enhanced) = self.enhanced {
            all_genres.extend(enhanced.genres.iter().cloned());
        }

        // Keep first-seen casing, drop case-insensitive duplicates
        let mut seen = HashSet::new();
        all_genres.retain(|g| seen.insert(g.to_lowercase()));
        all_genres
    }

    /// The BPM the engine should trust: an enhanced numeric tempo tag wins
    /// over the raw `bpm` field
    pub fn effective_bpm(&self) -> Option<u32> {
        if let Some(EnhancedMetadata {
            tempo: Some(TempoTag::Bpm(bpm)),
            ..
        }) = self.enhanced
        {
            return Some(bpm);
        }
        self.bpm
    }

    /// Duration in seconds, defaulting when the tag is missing
    pub fn effective_duration(&self) -> u32 {
        self.duration_seconds.unwrap_or(DEFAULT_DURATION_SECONDS)
    }

    pub fn mood_tags(&self) -> &[String] {
        self.enhanced.as_ref().map(|e| e.mood.as_slice()).unwrap_or(&[])
    }

    pub fn activity_tags(&self) -> &[String] {
        self.enhanced
            .as_ref()
            .map(|e| e.activity.as_slice())
            .unwrap_or(&[])
    }

    pub fn similar_artists(&self) -> &[String] {
        self.enhanced
            .as_ref()
            .map(|e| e.similar_artists.as_slice())
            .unwrap_or(&[])
    }
}

/// Aggregate description of a library, produced by the catalog layer and fed
/// to strategy derivation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibrarySummary {
    pub total_tracks: usize,
    #[serde(default)]
    pub genre_counts: HashMap<String, usize>,
    #[serde(default)]
    pub tempo_distribution: TempoDistribution,
    #[serde(default)]
    pub duration_stats: DurationStats,
    pub artist_counts: Option<HashMap<String, usize>>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TempoDistribution {
    pub slow: usize,
    pub medium: usize,
    pub fast: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DurationStats {
    pub avg: f32,
    pub min: u32,
    pub max: u32,
}

impl LibrarySummary {
    /// Build a summary from a catalog snapshot
    pub fn from_tracks(tracks: &[Track]) -> Self {
        use crate::matching::normalize::{normalize_genre, tempo_bucket};

        let mut genre_counts: HashMap<String, usize> = HashMap::new();
        let mut artist_counts: HashMap<String, usize> = HashMap::new();
        let mut tempo_distribution = TempoDistribution::default();
        let mut total_duration: u64 = 0;
        let mut min_duration = u32::MAX;
        let mut max_duration = 0;

        for track in tracks {
            for genre in track.all_genres() {
                *genre_counts.entry(normalize_genre(&genre)).or_insert(0) += 1;
            }
            *artist_counts.entry(track.artist.clone()).or_insert(0) += 1;
            match tempo_bucket(track.effective_bpm()) {
                TempoBucket::Slow => tempo_distribution.slow += 1,
                TempoBucket::Medium => tempo_distribution.medium += 1,
                TempoBucket::Fast => tempo_distribution.fast += 1,
                TempoBucket::Unknown => {}
            }
            let duration = track.effective_duration();
            total_duration += duration as u64;
            min_duration = min_duration.min(duration);
            max_duration = max_duration.max(duration);
        }

        let duration_stats = if tracks.is_empty() {
            DurationStats::default()
        } else {
            DurationStats {
                avg: total_duration as f32 / tracks.len() as f32,
                min: min_duration,
                max: max_duration,
            }
        };

        LibrarySummary {
            total_tracks: tracks.len(),
            genre_counts,
            tempo_distribution,
            duration_stats,
            artist_counts: Some(artist_counts),
        }
    }

    /// Average track duration with a sane fallback for empty or untagged libraries
    pub fn avg_duration_or_default(&self) -> f32 {
        if self.duration_stats.avg > 0.0 {
            self.duration_stats.avg
        } else {
            DEFAULT_DURATION_SECONDS as f32
        }
    }
}
