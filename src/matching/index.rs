use crate::matching::normalize::{
    infer_activities, normalize_activities, normalize_genres, normalize_moods, tempo_bucket,
};
use crate::models::{TempoBucket, TempoTag, Track};
use std::collections::{HashMap, HashSet};

/// Derived metadata for one track, computed once at index build
#[derive(Debug, Clone)]
pub struct TrackFacts {
    pub artist: String,
    pub album: String,
    pub normalized_genres: Vec<String>,
    pub tempo_bucket: TempoBucket,
    pub effective_bpm: Option<u32>,
    pub mapped_mood: Vec<String>,
    pub mapped_activity: Vec<String>,
    pub year: Option<u32>,
}

/// Immutable inverted indexes over a catalog snapshot. Built in one linear
/// pass, read-only for the lifetime of a generation, discarded when the
/// catalog changes materially.
#[derive(Debug, Default)]
pub struct MatchingIndex {
    all_track_ids: HashSet<String>,
    by_genre: HashMap<String, HashSet<String>>,
    by_tempo: HashMap<TempoBucket, HashSet<String>>,
    by_mood: HashMap<String, HashSet<String>>,
    by_activity: HashMap<String, HashSet<String>>,
    facts: HashMap<String, TrackFacts>,
}

impl MatchingIndex {
    /// Build the index from a catalog snapshot. O(tracks x avg tags).
    pub fn build(tracks: &[Track]) -> Self {
        let mut index = MatchingIndex::default();

        for track in tracks {
            let id = track.track_file_id.clone();
            let normalized_genres = normalize_genres(&track.all_genres());

            // An enhanced named tempo tag overrides the BPM-derived bucket
            let bucket = match track.enhanced.as_ref().and_then(|e| e.tempo) {
                Some(TempoTag::Bucket(named)) => named,
                _ => tempo_bucket(track.effective_bpm()),
            };

            let mapped_mood = normalize_moods(track.mood_tags());
            let mapped_activity = {
                let tagged = normalize_activities(track.activity_tags());
                if tagged.is_empty() {
                    infer_activities(bucket, &normalized_genres)
                } else {
                    tagged
                }
            };

            for genre in &normalized_genres {
                index
                    .by_genre
                    .entry(genre.clone())
                    .or_default()
                    .insert(id.clone());
            }
            index.by_tempo.entry(bucket).or_default().insert(id.clone());
            for mood in &mapped_mood {
                index
                    .by_mood
                    .entry(mood.clone())
                    .or_default()
                    .insert(id.clone());
            }
            for activity in &mapped_activity {
                index
                    .by_activity
                    .entry(activity.clone())
                    .or_default()
                    .insert(id.clone());
            }

            index.facts.insert(
                id.clone(),
                TrackFacts {
                    artist: track.artist.clone(),
                    album: track.album.clone(),
                    normalized_genres,
                    tempo_bucket: bucket,
                    effective_bpm: track.effective_bpm(),
                    mapped_mood,
                    mapped_activity,
                    year: track.year,
                },
            );
            index.all_track_ids.insert(id);
        }

        index
    }

    pub fn all_track_ids(&self) -> &HashSet<String> {
        &self.all_track_ids
    }

    pub fn len(&self) -> usize {
        self.all_track_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all_track_ids.is_empty()
    }

    /// Track ids carrying the given normalized genre
    pub fn tracks_for_genre(&self, genre: &str) -> Option<&HashSet<String>> {
        self.by_genre.get(genre)
    }

    pub fn tracks_for_tempo(&self, bucket: TempoBucket) -> Option<&HashSet<String>> {
        self.by_tempo.get(&bucket)
    }

    pub fn tracks_for_mood(&self, mood: &str) -> Option<&HashSet<String>> {
        self.by_mood.get(mood)
    }

    pub fn tracks_for_activity(&self, activity: &str) -> Option<&HashSet<String>> {
        self.by_activity.get(activity)
    }

    pub fn facts(&self, track_file_id: &str) -> Option<&TrackFacts> {
        self.facts.get(track_file_id)
    }

    pub fn iter_facts(&self) -> impl Iterator<Item = (&String, &TrackFacts)> {
        self.facts.iter()
    }

    /// Track ids whose artist matches, case-insensitively
    pub fn tracks_for_artist(&self, artist: &str) -> Vec<&str> {
        let wanted = artist.trim().to_lowercase();
        self.facts
            .iter()
            .filter(|(_, facts)| facts.artist.to_lowercase() == wanted)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}
