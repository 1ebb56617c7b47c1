use crate::discovery::DiscoveryTrack;
use crate::matching::MatchingIndex;
use crate::playlist::scoring::TrackSelection;
use crate::playlist::strategy::PlaylistStrategy;
use crate::playlist::transitions::OrderedTrack;
use crate::request::PlaylistRequest;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Composition statistics for a generated playlist. All mixes are plain
/// string-to-count maps and are emitted even when empty.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistSummary {
    pub total_duration: u32,
    pub track_count: usize,
    pub genre_mix: HashMap<String, usize>,
    pub tempo_mix: HashMap<String, usize>,
    pub artist_mix: HashMap<String, usize>,
    pub avg_duration: f32,
    pub min_duration: u32,
    pub max_duration: u32,
}

impl PlaylistSummary {
    pub fn from_selections(selections: &[TrackSelection], index: &MatchingIndex) -> Self {
        let mut genre_mix: HashMap<String, usize> = HashMap::new();
        let mut tempo_mix: HashMap<String, usize> = HashMap::new();
        let mut artist_mix: HashMap<String, usize> = HashMap::new();
        let mut total_duration: u32 = 0;
        let mut min_duration = u32::MAX;
        let mut max_duration = 0;

        for selection in selections {
            if let Some(facts) = index.facts(&selection.track_file_id) {
                for genre in &facts.normalized_genres {
                    *genre_mix.entry(genre.clone()).or_insert(0) += 1;
                }
                *tempo_mix
                    .entry(facts.tempo_bucket.as_str().to_string())
                    .or_insert(0) += 1;
            }
            *artist_mix
                .entry(selection.track.artist.clone())
                .or_insert(0) += 1;

            let duration = selection.track.effective_duration();
            total_duration += duration;
            min_duration = min_duration.min(duration);
            max_duration = max_duration.max(duration);
        }

        let track_count = selections.len();
        PlaylistSummary {
            total_duration,
            track_count,
            genre_mix,
            tempo_mix,
            artist_mix,
            avg_duration: if track_count == 0 {
                0.0
            } else {
                total_duration as f32 / track_count as f32
            },
            min_duration: if track_count == 0 { 0 } else { min_duration },
            max_duration,
        }
    }
}

/// A finished playlist: the ordered ids, the per-track selection records
/// with reasons, the arc-ordered entries, and the strategy that produced it
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedPlaylist {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Final playback order, including `discovery:` entries when enabled
    pub track_file_ids: Vec<String>,
    pub track_selections: Vec<TrackSelection>,
    pub ordered_tracks: Vec<OrderedTrack>,
    pub total_duration: u32,
    pub summary: PlaylistSummary,
    pub strategy: PlaylistStrategy,
    /// Informational blend of diversity, smoothness, coherence and era
    /// cohesion; never feeds selection
    pub quality_score: f32,
    pub created_at: DateTime<Utc>,
    pub discovery_tracks: Option<Vec<DiscoveryTrack>>,
}

/// Deterministic playlist identity over the request, the library root and
/// the creation instant. Identity only; selection never reads it.
pub fn playlist_id(
    request: &PlaylistRequest,
    library_root_id: &str,
    created_at: DateTime<Utc>,
) -> String {
    let request_json = serde_json::to_string(request).unwrap_or_default();
    let digest = md5::compute(format!(
        "{request_json}|{library_root_id}|{}",
        created_at.timestamp_millis()
    ));
    format!("{digest:x}")
}

/// Playlist-level quality score in [0, 1]: artist diversity, tempo
/// transition smoothness over the final order, genre coherence and era
/// cohesion, blended with fixed weights
pub fn quality_score(
    selections: &[TrackSelection],
    ordered: &[OrderedTrack],
    summary: &PlaylistSummary,
    index: &MatchingIndex,
) -> f32 {
    if selections.is_empty() {
        return 0.0;
    }

    const ARTIST_DIVERSITY_WEIGHT: f32 = 0.30;
    const SMOOTHNESS_WEIGHT: f32 = 0.25;
    const COHERENCE_WEIGHT: f32 = 0.25;
    const ERA_WEIGHT: f32 = 0.20;

    let diversity = artist_diversity(selections);
    let smoothness = tempo_smoothness(ordered, index);
    let coherence = genre_coherence(&summary.genre_mix, selections.len());
    let era = era_cohesion(selections);

    let total = ARTIST_DIVERSITY_WEIGHT * diversity
        + SMOOTHNESS_WEIGHT * smoothness
        + COHERENCE_WEIGHT * coherence
        + ERA_WEIGHT * era;
    let weight_sum =
        ARTIST_DIVERSITY_WEIGHT + SMOOTHNESS_WEIGHT + COHERENCE_WEIGHT + ERA_WEIGHT;
    (total / weight_sum).clamp(0.0, 1.0)
}

fn artist_diversity(selections: &[TrackSelection]) -> f32 {
    if selections.len() <= 1 {
        return 1.0;
    }
    let unique: HashSet<String> = selections
        .iter()
        .map(|s| s.track.artist.to_lowercase())
        .collect();
    unique.len() as f32 / selections.len() as f32
}

/// Smoothness over consecutive tempo buckets: staying put or moving one
/// bucket reads as smooth, slow-to-fast jumps do not
fn tempo_smoothness(ordered: &[OrderedTrack], index: &MatchingIndex) -> f32 {
    let buckets: Vec<i32> = ordered
        .iter()
        .filter_map(|o| index.facts(&o.track_file_id))
        .filter_map(|f| f.tempo_bucket.ordinal())
        .collect();
    if buckets.len() <= 1 {
        return 0.5;
    }
    let jumps: Vec<i32> = buckets.windows(2).map(|w| (w[0] - w[1]).abs()).collect();
    let avg_jump = jumps.iter().sum::<i32>() as f32 / jumps.len() as f32;
    (1.0 - avg_jump / 2.0).clamp(0.0, 1.0)
}

/// Entropy-based coherence: a single genre is maximally coherent, an even
/// spread across many genres is not
fn genre_coherence(genre_mix: &HashMap<String, usize>, track_count: usize) -> f32 {
    if genre_mix.is_empty() || track_count == 0 {
        return 0.5;
    }
    if genre_mix.len() == 1 {
        return 1.0;
    }

    let mut entropy = 0.0_f32;
    for &count in genre_mix.values() {
        let probability = count as f32 / track_count as f32;
        if probability > 0.0 {
            entropy -= probability * probability.log2();
        }
    }
    let max_entropy = (genre_mix.len() as f32).log2();
    if max_entropy > 0.0 {
        (1.0 - entropy / max_entropy).clamp(0.0, 1.0)
    } else {
        1.0
    }
}

fn era_cohesion(selections: &[TrackSelection]) -> f32 {
    let years: Vec<u32> = selections.iter().filter_map(|s| s.track.year).collect();
    let (Some(min), Some(max)) = (years.iter().min(), years.iter().max()) else {
        return 0.5;
    };
    let span = max - min;
    if span <= 2 {
        1.0
    } else if span <= 10 {
        0.8 - (span as f32 - 2.0) / 8.0 * 0.3
    } else if span <= 20 {
        0.5 - (span as f32 - 10.0) / 10.0 * 0.3
    } else {
        (0.2 - (span as f32 - 20.0) / 50.0 * 0.2).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::MatchingIndex;
    use crate::models::{LibrarySummary, Track};
    use crate::playlist::scoring::{AffinityContext, ScoringContext, TrackScoring};
    use crate::playlist::strategy::derive_strategy;
    use crate::request::{PlaylistLength, PlaylistRequest};
    use approx::assert_relative_eq;
    use chrono::Utc;

    fn track(id: &str, artist: &str, genres: Vec<&str>, duration: Option<u32>) -> Track {
        Track {
            track_file_id: id.to_string(),
            library_root_id: "root".to_string(),
            title: format!("Title {id}"),
            artist: artist.to_string(),
            album: "Album".to_string(),
            genres: genres.into_iter().map(String::from).collect(),
            year: Some(2020),
            track_no: None,
            duration_seconds: duration,
            bpm: Some(120),
            enhanced: None,
            added_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn score_all(tracks: &[Track]) -> (Vec<TrackSelection>, MatchingIndex) {
        let request = PlaylistRequest {
            length: PlaylistLength::Tracks(tracks.len()),
            ..Default::default()
        }
        .normalized();
        let summary = LibrarySummary::from_tracks(tracks);
        let strategy = derive_strategy(&request, &summary);
        let index = MatchingIndex::build(tracks);
        let affinity = AffinityContext::derive(&request, tracks);
        let ctx = ScoringContext {
            request: &request,
            strategy: &strategy,
            index: &index,
            previous: &[],
            current_duration: 0,
            target_duration: 4000,
            remaining_slots: tracks.len(),
            affinity: &affinity,
        };
        let selections = tracks
            .iter()
            .map(|t| TrackScoring::score_track(t, &ctx))
            .collect();
        (selections, index)
    }

    #[test]
    fn summary_counts_mixes_and_durations() {
        let tracks = vec![
            track("a", "Alice", vec!["Rock"], Some(180)),
            track("b", "Alice", vec!["Rock", "Jazz"], Some(240)),
            track("c", "Bob", vec!["Jazz"], None),
        ];
        let (selections, index) = score_all(&tracks);
        let summary = PlaylistSummary::from_selections(&selections, &index);

        assert_eq!(summary.track_count, 3);
        // The untagged track contributes the 180s default
        assert_eq!(summary.total_duration, 600);
        assert_eq!(summary.genre_mix["rock"], 2);
        assert_eq!(summary.genre_mix["jazz"], 2);
        assert_eq!(summary.artist_mix["Alice"], 2);
        assert_eq!(summary.tempo_mix["medium"], 3);
        assert_relative_eq!(summary.avg_duration, 200.0);
        assert_eq!(summary.min_duration, 180);
        assert_eq!(summary.max_duration, 240);
    }

    #[test]
    fn empty_selection_yields_empty_maps() {
        let index = MatchingIndex::build(&[]);
        let summary = PlaylistSummary::from_selections(&[], &index);
        assert_eq!(summary.track_count, 0);
        assert_eq!(summary.total_duration, 0);
        assert!(summary.genre_mix.is_empty());
        assert!(summary.tempo_mix.is_empty());
        assert!(summary.artist_mix.is_empty());
    }

    #[test]
    fn playlist_id_is_deterministic_per_instant() {
        let request = PlaylistRequest::default();
        let at = Utc::now();
        assert_eq!(
            playlist_id(&request, "root", at),
            playlist_id(&request, "root", at)
        );
        assert_ne!(
            playlist_id(&request, "root", at),
            playlist_id(&request, "other-root", at)
        );
    }

    #[test]
    fn single_genre_playlist_is_coherent() {
        let mix: HashMap<String, usize> = [("rock".to_string(), 10)].into_iter().collect();
        assert_relative_eq!(genre_coherence(&mix, 10), 1.0);

        let spread: HashMap<String, usize> = [
            ("rock".to_string(), 3),
            ("jazz".to_string(), 3),
            ("pop".to_string(), 3),
        ]
        .into_iter()
        .collect();
        assert!(genre_coherence(&spread, 9) < 0.2);
    }

    #[test]
    fn quality_score_stays_in_unit_range() {
        let tracks: Vec<Track> = (0..8)
            .map(|i| {
                track(
                    &format!("t{i}"),
                    &format!("Artist {i}"),
                    vec!["Rock"],
                    Some(200),
                )
            })
            .collect();
        let (selections, index) = score_all(&tracks);
        let summary = PlaylistSummary::from_selections(&selections, &index);
        let ordered: Vec<crate::playlist::transitions::OrderedTrack> = Vec::new();
        let score = quality_score(&selections, &ordered, &summary, &index);
        assert!((0.0..=1.0).contains(&score));
        assert!(score > 0.5, "all-distinct single-genre playlist scores well");
    }
}
