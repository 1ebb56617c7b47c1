use crate::error::EngineError;
use crate::matching::MatchingIndex;
use crate::playlist::scoring::AffinityContext;
use crate::playlist::strategy::PlaylistStrategy;
use crate::request::PlaylistRequest;
use log::debug;
use std::collections::HashSet;

/// Candidate pool construction: the hard filters applied before any scoring
pub struct CandidateFilters;

impl CandidateFilters {
    /// Build the candidate pool for one generation. The request is assumed
    /// normalized and the strategy sanitized. `exclude` carries ids already
    /// used (remix and replacement flows). Returns ids sorted for
    /// deterministic downstream iteration.
    pub fn build_pool(
        request: &PlaylistRequest,
        strategy: &PlaylistStrategy,
        index: &MatchingIndex,
        affinity: &AffinityContext,
        exclude: &HashSet<String>,
    ) -> Result<Vec<String>, EngineError> {
        let mut pool: HashSet<String> = HashSet::new();

        // Seed genres: strategy requirements take precedence over the
        // request, then the mix guidance widens the net
        let mut seed_genres: Vec<&String> = Vec::new();
        let required = strategy.required_genres();
        if !required.is_empty() {
            seed_genres.extend(required.iter());
        } else {
            seed_genres.extend(request.genres.iter());
        }
        seed_genres.extend(strategy.genre_mix_guidance.primary_genres.iter());
        seed_genres.extend(strategy.genre_mix_guidance.secondary_genres.iter());

        for genre in &seed_genres {
            if let Some(ids) = index.tracks_for_genre(genre) {
                pool.extend(ids.iter().cloned());
            }
        }
        if pool.is_empty() {
            // No genre signal (or nothing matched): the whole library is fair game
            pool = index.all_track_ids().clone();
        }

        // Affinity artists widen the pool even outside the requested genres
        if !affinity.artists.is_empty() {
            for (id, facts) in index.iter_facts() {
                if affinity.artists.contains(&facts.artist.to_lowercase()) {
                    pool.insert(id.clone());
                }
            }
        }

        // Excluded genres drop out unless the track also carries a required genre
        let excluded = strategy.excluded_genres();
        if !excluded.is_empty() {
            let mut dropped: HashSet<&String> = HashSet::new();
            for genre in excluded {
                if let Some(ids) = index.tracks_for_genre(genre) {
                    dropped.extend(ids.iter());
                }
            }
            let mut kept: HashSet<&String> = HashSet::new();
            for genre in required {
                if let Some(ids) = index.tracks_for_genre(genre) {
                    kept.extend(ids.iter());
                }
            }
            pool.retain(|id| !dropped.contains(id) || kept.contains(id));
        }

        // A pinned tempo bucket with no variation allowed is a hard filter
        let guidance = &strategy.tempo_guidance;
        if let Some(target) = guidance.target_bucket {
            if !guidance.allow_variation {
                match index.tracks_for_tempo(target) {
                    Some(ids) => pool.retain(|id| ids.contains(id)),
                    None => pool.clear(),
                }
            }
        }

        // Disallowed artists are dropped unconditionally
        if !request.disallowed_artists.is_empty() {
            let disallowed: HashSet<String> = request
                .disallowed_artists
                .iter()
                .map(|a| a.trim().to_lowercase())
                .collect();
            pool.retain(|id| {
                index
                    .facts(id)
                    .map(|facts| !disallowed.contains(&facts.artist.to_lowercase()))
                    .unwrap_or(false)
            });
        }

        pool.retain(|id| !exclude.contains(id));

        // Mood/activity narrowing: untagged tracks always survive, and when
        // the narrowed pool would be empty the unfiltered pool stands
        if !request.mood.is_empty() || !request.activity.is_empty() {
            let narrowed: HashSet<String> = pool
                .iter()
                .filter(|id| {
                    let Some(facts) = index.facts(id) else {
                        return false;
                    };
                    let mood_ok = request.mood.is_empty()
                        || facts.mapped_mood.is_empty()
                        || facts
                            .mapped_mood
                            .iter()
                            .any(|m| request.mood.contains(m));
                    let activity_ok = request.activity.is_empty()
                        || facts.mapped_activity.is_empty()
                        || facts
                            .mapped_activity
                            .iter()
                            .any(|a| request.activity.contains(a));
                    mood_ok && activity_ok
                })
                .cloned()
                .collect();
            if !narrowed.is_empty() {
                pool = narrowed;
            } else {
                debug!("mood/activity filter would empty the pool; keeping {} candidates", pool.len());
            }
        }

        if pool.is_empty() {
            return Err(EngineError::NoCandidates);
        }

        let mut candidates: Vec<String> = pool.into_iter().collect();
        candidates.sort();
        debug!("candidate pool holds {} tracks", candidates.len());
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LibrarySummary, TempoBucket, Track};
    use crate::playlist::strategy::{derive_strategy, StrategyConstraints};
    use crate::request::{PlaylistLength, PlaylistRequest, TempoPreference};
    use chrono::Utc;

    fn track(id: &str, artist: &str, genres: Vec<&str>, bpm: Option<u32>) -> Track {
        Track {
            track_file_id: id.to_string(),
            library_root_id: "root".to_string(),
            title: format!("Title {id}"),
            artist: artist.to_string(),
            album: "Album".to_string(),
            genres: genres.into_iter().map(String::from).collect(),
            year: None,
            track_no: None,
            duration_seconds: Some(200),
            bpm,
            enhanced: None,
            added_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn pool_for(tracks: &[Track], request: PlaylistRequest) -> Result<Vec<String>, EngineError> {
        let request = request.normalized();
        let summary = LibrarySummary::from_tracks(tracks);
        let strategy = derive_strategy(&request, &summary);
        let index = MatchingIndex::build(tracks);
        let affinity = AffinityContext::derive(&request, tracks);
        CandidateFilters::build_pool(&request, &strategy, &index, &affinity, &HashSet::new())
    }

    #[test]
    fn genre_request_narrows_the_pool() {
        let tracks = vec![
            track("rock1", "A", vec!["Rock"], Some(120)),
            track("rock2", "B", vec!["Rock"], Some(125)),
            track("jazz1", "C", vec!["Jazz"], Some(100)),
        ];
        let pool = pool_for(
            &tracks,
            PlaylistRequest {
                genres: vec!["Rock".to_string()],
                length: PlaylistLength::Tracks(2),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(pool, vec!["rock1", "rock2"]);
    }

    #[test]
    fn empty_genre_request_takes_everything() {
        let tracks = vec![
            track("a", "A", vec!["Rock"], Some(120)),
            track("b", "B", vec!["Jazz"], Some(100)),
        ];
        let pool = pool_for(
            &tracks,
            PlaylistRequest {
                length: PlaylistLength::Tracks(2),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn unmatched_genre_falls_back_to_everything() {
        let tracks = vec![track("a", "A", vec!["Rock"], Some(120))];
        let pool = pool_for(
            &tracks,
            PlaylistRequest {
                genres: vec!["Vaporwave".to_string()],
                length: PlaylistLength::Tracks(1),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn disallowed_artists_are_removed() {
        let tracks = vec![
            track("a", "Alice", vec!["Rock"], Some(120)),
            track("b", "Bob", vec!["Rock"], Some(125)),
        ];
        let pool = pool_for(
            &tracks,
            PlaylistRequest {
                genres: vec!["Rock".to_string()],
                disallowed_artists: vec![" bob ".to_string()],
                length: PlaylistLength::Tracks(2),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(pool, vec!["a"]);
    }

    #[test]
    fn excluded_genres_keep_required_overlap() {
        let tracks = vec![
            track("pure", "A", vec!["Rock"], Some(120)),
            track("cross", "B", vec!["Rock", "Pop"], Some(125)),
            track("pop", "C", vec!["Pop"], Some(110)),
        ];
        let request = PlaylistRequest {
            genres: vec!["Rock".to_string()],
            length: PlaylistLength::Tracks(3),
            ..Default::default()
        }
        .normalized();
        let summary = LibrarySummary::from_tracks(&tracks);
        let mut strategy = derive_strategy(&request, &summary);
        strategy.constraints = Some(StrategyConstraints {
            required_genres: vec!["rock".to_string()],
            excluded_genres: vec!["pop".to_string()],
            ..Default::default()
        });
        let index = MatchingIndex::build(&tracks);
        let affinity = AffinityContext::derive(&request, &tracks);
        let pool =
            CandidateFilters::build_pool(&request, &strategy, &index, &affinity, &HashSet::new())
                .unwrap();
        // "cross" carries the excluded genre but also the required one
        assert_eq!(pool, vec!["cross", "pure"]);
    }

    #[test]
    fn strict_tempo_guidance_intersects_bucket() {
        let tracks = vec![
            track("fast", "A", vec!["Rock"], Some(150)),
            track("slow", "B", vec!["Rock"], Some(80)),
        ];
        let request = PlaylistRequest {
            genres: vec!["Rock".to_string()],
            tempo: TempoPreference {
                bucket: Some(TempoBucket::Fast),
                bpm_range: None,
            },
            surprise: 0.0,
            length: PlaylistLength::Tracks(2),
            ..Default::default()
        };
        // surprise 0 + pinned bucket -> allow_variation false in the heuristic
        let pool = pool_for(&tracks, request).unwrap();
        assert_eq!(pool, vec!["fast"]);
    }

    #[test]
    fn mood_filter_falls_back_when_it_would_empty_the_pool() {
        let mut tagged = track("a", "A", vec!["Rock"], Some(120));
        tagged.enhanced = Some(crate::models::EnhancedMetadata {
            mood: vec!["energetic".to_string()],
            ..Default::default()
        });
        let tracks = vec![tagged];
        let pool = pool_for(
            &tracks,
            PlaylistRequest {
                genres: vec!["Rock".to_string()],
                mood: vec!["calm".to_string()],
                length: PlaylistLength::Tracks(1),
                ..Default::default()
            },
        )
        .unwrap();
        // The only candidate is tagged with a different mood; the filter
        // yields nothing, so the unfiltered pool stands
        assert_eq!(pool, vec!["a"]);
    }

    #[test]
    fn affinity_artists_join_the_pool() {
        let tracks = vec![
            track("rock", "A", vec!["Rock"], Some(120)),
            track("jazz", "Alice", vec!["Jazz"], Some(100)),
        ];
        let pool = pool_for(
            &tracks,
            PlaylistRequest {
                genres: vec!["Rock".to_string()],
                suggested_artists: vec!["Alice".to_string()],
                length: PlaylistLength::Tracks(2),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(pool.contains(&"jazz".to_string()));
    }

    #[test]
    fn empty_pool_is_a_fatal_error() {
        let tracks = vec![track("a", "Bob", vec!["Rock"], Some(120))];
        let result = pool_for(
            &tracks,
            PlaylistRequest {
                genres: vec!["Rock".to_string()],
                disallowed_artists: vec!["Bob".to_string()],
                length: PlaylistLength::Tracks(1),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(EngineError::NoCandidates)));
    }
}
