use crate::discovery::{DiscoveryQuery, DiscoverySource, DiscoveryTrack};
use crate::error::EngineError;
use crate::matching::MatchingIndex;
use crate::models::{LibrarySummary, TempoBucket, Track};
use crate::oracle::{build_strategy_prompt, parse_strategy, RefinerOracle};
use crate::playlist::filters::CandidateFilters;
use crate::playlist::scoring::{AffinityContext, ScoringContext, TrackScoring, TrackSelection};
use crate::playlist::selection::{sort_by_score, LengthBudget, SelectionLoop};
use crate::playlist::strategy::{derive_strategy, PlaylistStrategy};
use crate::playlist::summary::{playlist_id, quality_score, GeneratedPlaylist, PlaylistSummary};
use crate::playlist::transitions::{ArcOrdering, OrderedTrack};
use crate::request::{PlaylistLength, PlaylistRequest};
use chrono::Utc;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashMap, HashSet};

/// Per-generation options. The seed makes a run reproducible; without one it
/// derives deterministically from the request.
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub seed: Option<u64>,
    pub library_root_id: Option<String>,
}

/// The playlist construction engine. Collaborator capabilities are optional;
/// without them every path is deterministic.
#[derive(Default)]
pub struct PlaylistEngine {
    oracle: Option<Box<dyn RefinerOracle>>,
    discovery: Option<Box<dyn DiscoverySource>>,
}

impl PlaylistEngine {
    pub fn new() -> Self {
        PlaylistEngine::default()
    }

    pub fn with_oracle(mut self, oracle: Box<dyn RefinerOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_discovery(mut self, discovery: Box<dyn DiscoverySource>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Generate a playlist from a catalog snapshot
    pub fn generate(
        &self,
        tracks: &[Track],
        request: &PlaylistRequest,
        options: &GenerationOptions,
    ) -> Result<GeneratedPlaylist, EngineError> {
        self.generate_excluding(tracks, request, &HashSet::new(), options)
    }

    /// Rebuild a saved playlist: same vibe, entirely different tracks. Falls
    /// back to an unrestricted generation when excluding every existing track
    /// leaves nothing.
    pub fn remix(
        &self,
        playlist: &GeneratedPlaylist,
        tracks: &[Track],
        options: &GenerationOptions,
    ) -> Result<GeneratedPlaylist, EngineError> {
        let request = Self::request_from_playlist(playlist);
        let exclude: HashSet<String> = playlist
            .track_file_ids
            .iter()
            .filter(|id| !id.starts_with("discovery:"))
            .cloned()
            .collect();

        match self.generate_excluding(tracks, &request, &exclude, options) {
            Ok(remixed) => Ok(remixed),
            Err(EngineError::NoCandidates) | Err(EngineError::NoTracksAvailable) => {
                info!("remix exclusions emptied the pool; regenerating without them");
                self.generate_excluding(tracks, &request, &HashSet::new(), options)
            }
            Err(e) => Err(e),
        }
    }

    /// Produce up to `count` replacement selections for removed tracks,
    /// scored against the kept context. May return fewer when the pool runs
    /// out.
    pub fn replacements(
        &self,
        tracks: &[Track],
        request: &PlaylistRequest,
        kept: &[TrackSelection],
        removed_ids: &HashSet<String>,
        count: usize,
    ) -> Result<Vec<TrackSelection>, EngineError> {
        request.validate()?;
        let request = request.normalized();
        if tracks.is_empty() {
            return Err(EngineError::NoTracksAvailable);
        }

        let index = MatchingIndex::build(tracks);
        let summary = LibrarySummary::from_tracks(tracks);
        let strategy = self.resolve_strategy(&request, &summary);
        let affinity = AffinityContext::derive(&request, tracks);

        let mut exclude: HashSet<String> = removed_ids.clone();
        exclude.extend(kept.iter().map(|s| s.track_file_id.clone()));
        let pool = CandidateFilters::build_pool(&request, &strategy, &index, &affinity, &exclude)?;

        let tracks_by_id: HashMap<&str, &Track> = tracks
            .iter()
            .map(|t| (t.track_file_id.as_str(), t))
            .collect();
        let current_duration: u32 = kept.iter().map(|s| s.track.effective_duration()).sum();
        let pool_avg = Self::pool_avg_duration(&pool, &tracks_by_id);
        let budget = LengthBudget::from_request(&request, pool_avg);

        let ctx = ScoringContext {
            request: &request,
            strategy: &strategy,
            index: &index,
            previous: kept,
            current_duration,
            target_duration: budget.target_duration(),
            remaining_slots: count.max(1),
            affinity: &affinity,
        };
        let mut scored: Vec<TrackSelection> = pool
            .iter()
            .filter_map(|id| tracks_by_id.get(id.as_str()))
            .map(|track| TrackScoring::score_track(track, &ctx))
            .collect();
        sort_by_score(&mut scored);
        scored.truncate(count);
        Ok(scored)
    }

    fn generate_excluding(
        &self,
        tracks: &[Track],
        request: &PlaylistRequest,
        exclude: &HashSet<String>,
        options: &GenerationOptions,
    ) -> Result<GeneratedPlaylist, EngineError> {
        request.validate()?;
        let request = request.normalized();

        // The generation works off an immutable snapshot taken here
        let snapshot: Vec<Track> = tracks
            .iter()
            .filter(|t| !exclude.contains(t.track_file_id.as_str()))
            .cloned()
            .collect();
        if snapshot.is_empty() {
            return Err(EngineError::NoTracksAvailable);
        }

        let index = MatchingIndex::build(&snapshot);
        let summary = LibrarySummary::from_tracks(&snapshot);
        let strategy = self.resolve_strategy(&request, &summary);
        let affinity = AffinityContext::derive(&request, &snapshot);
        let pool =
            CandidateFilters::build_pool(&request, &strategy, &index, &affinity, &HashSet::new())?;

        let tracks_by_id: HashMap<&str, &Track> = snapshot
            .iter()
            .map(|t| (t.track_file_id.as_str(), t))
            .collect();
        let pool_avg = Self::pool_avg_duration(&pool, &tracks_by_id);
        let budget = LengthBudget::from_request(&request, pool_avg);

        let seed = options.seed.unwrap_or_else(|| request.derive_seed());
        let mut rng = StdRng::seed_from_u64(seed);

        let outcome = SelectionLoop::run(
            &tracks_by_id,
            &pool,
            &request,
            &strategy,
            &index,
            &affinity,
            self.oracle.as_deref(),
            &budget,
            &mut rng,
        );

        // Leftover pool tracks with a surprise score are eligible for
        // insertion during ordering
        let surprise_candidates = if request.surprise >= 0.3 {
            let selected: HashSet<&str> = outcome
                .selections
                .iter()
                .map(|s| s.track_file_id.as_str())
                .collect();
            let ctx = ScoringContext {
                request: &request,
                strategy: &strategy,
                index: &index,
                previous: &outcome.selections,
                current_duration: outcome.total_duration,
                target_duration: budget.target_duration(),
                remaining_slots: 1,
                affinity: &affinity,
            };
            pool.iter()
                .filter(|id| !selected.contains(id.as_str()))
                .filter_map(|id| tracks_by_id.get(id.as_str()))
                .map(|track| TrackScoring::score_track(track, &ctx))
                .filter(|s| s.component_scores.surprise > 0.0)
                .collect()
        } else {
            Vec::new()
        };

        let ordered = ArcOrdering::order(
            &outcome.selections,
            &strategy.ordering_plan,
            &index,
            request.surprise,
            &surprise_candidates,
        );

        // Surprise insertions joined the sequence; fold their records in
        let mut selections = outcome.selections;
        let known: HashSet<&str> = selections.iter().map(|s| s.track_file_id.as_str()).collect();
        let inserted: Vec<TrackSelection> = ordered
            .iter()
            .filter(|o| !known.contains(o.track_file_id.as_str()))
            .filter_map(|o| {
                surprise_candidates
                    .iter()
                    .find(|s| s.track_file_id == o.track_file_id)
                    .cloned()
            })
            .collect();
        selections.extend(inserted);

        let (ordered, track_file_ids, discovery_tracks) =
            self.interleave_discovery(ordered, &request, &strategy, &snapshot, &index);

        let playlist_summary = PlaylistSummary::from_selections(&selections, &index);
        let quality = quality_score(&selections, &ordered, &playlist_summary, &index);
        let total_duration = playlist_summary.total_duration;

        let library_root_id = options
            .library_root_id
            .clone()
            .or_else(|| snapshot.first().map(|t| t.library_root_id.clone()))
            .unwrap_or_default();
        let created_at = Utc::now();

        info!(
            "generated playlist with {} tracks ({} seconds)",
            playlist_summary.track_count, total_duration
        );

        Ok(GeneratedPlaylist {
            id: playlist_id(&request, &library_root_id, created_at),
            title: strategy.title.clone(),
            description: strategy.description.clone(),
            track_file_ids,
            track_selections: selections,
            ordered_tracks: ordered,
            total_duration,
            summary: playlist_summary,
            strategy,
            quality_score: quality,
            created_at,
            discovery_tracks,
        })
    }

    /// Oracle strategy when configured and well-formed, heuristic otherwise
    fn resolve_strategy(
        &self,
        request: &PlaylistRequest,
        summary: &LibrarySummary,
    ) -> PlaylistStrategy {
        if let Some(ref oracle) = self.oracle {
            let prompt = build_strategy_prompt(request, summary);
            match oracle
                .request_strategy(&prompt)
                .and_then(|json| parse_strategy(&json))
            {
                Ok(strategy) => return strategy,
                Err(e) => warn!("strategy oracle failed, using the heuristic fallback: {e}"),
            }
        }
        derive_strategy(request, summary)
    }

    /// Walk the ordered sequence and slot one discovery suggestion after
    /// each qualifying library track. Lookups are sequential, failures skip
    /// the slot, and stable ids never repeat.
    fn interleave_discovery(
        &self,
        ordered: Vec<OrderedTrack>,
        request: &PlaylistRequest,
        strategy: &PlaylistStrategy,
        snapshot: &[Track],
        index: &MatchingIndex,
    ) -> (Vec<OrderedTrack>, Vec<String>, Option<Vec<DiscoveryTrack>>) {
        let discovery = match (&self.discovery, request.enable_discovery) {
            (Some(discovery), true) => discovery,
            _ => {
                let ids = ordered.iter().map(|o| o.track_file_id.clone()).collect();
                return (ordered, ids, None);
            }
        };

        let tracks_by_id: HashMap<&str, &Track> = snapshot
            .iter()
            .map(|t| (t.track_file_id.as_str(), t))
            .collect();

        // With suggestions or genres in the request, only matching tracks
        // inspire suggestions; otherwise every track does
        let focused = !request.genres.is_empty() || !request.suggested_artists.is_empty();
        let qualifies = |id: &str| -> bool {
            if !focused {
                return true;
            }
            let Some(facts) = index.facts(id) else {
                return false;
            };
            let genre_hit = facts
                .normalized_genres
                .iter()
                .any(|g| request.genres.contains(g));
            let artist_hit = request
                .suggested_artists
                .iter()
                .any(|a| a.trim().to_lowercase() == facts.artist.to_lowercase());
            genre_hit || artist_hit
        };

        let mut used_ids: HashSet<String> = HashSet::new();
        let mut matches: HashMap<String, DiscoveryTrack> = HashMap::new();
        let mut warned = false;

        for entry in &ordered {
            if !qualifies(&entry.track_file_id) {
                continue;
            }
            let Some(library_track) = tracks_by_id.get(entry.track_file_id.as_str()) else {
                continue;
            };
            let query = DiscoveryQuery {
                library_track,
                user_library: snapshot,
                request,
                strategy,
                exclude_ids: &used_ids,
            };
            match discovery.find_discovery_tracks(&query) {
                Ok(candidates) => {
                    let fresh = candidates.into_iter().find(|c| !used_ids.contains(&c.id));
                    if let Some(candidate) = fresh {
                        used_ids.insert(candidate.id.clone());
                        let explanation = discovery
                            .generate_explanation(&candidate, library_track, request)
                            .unwrap_or_else(|_| {
                                DiscoveryTrack::templated_explanation(&candidate, library_track)
                            });
                        matches.insert(
                            entry.track_file_id.clone(),
                            DiscoveryTrack::new(candidate, &entry.track_file_id, explanation),
                        );
                    }
                }
                Err(e) => {
                    // Per-track recovery; a generation logs this at most once
                    if !warned {
                        warn!("discovery lookup failed, skipping: {e}");
                        warned = true;
                    }
                }
            }
        }

        if matches.is_empty() {
            let ids = ordered.iter().map(|o| o.track_file_id.clone()).collect();
            return (ordered, ids, Some(Vec::new()));
        }

        let mut interleaved: Vec<OrderedTrack> = Vec::with_capacity(ordered.len() + matches.len());
        let mut discovered: Vec<DiscoveryTrack> = Vec::with_capacity(matches.len());
        let mut ids: Vec<String> = Vec::new();
        for entry in ordered {
            let library_id = entry.track_file_id.clone();
            let section = entry.section;
            ids.push(library_id.clone());
            interleaved.push(entry);
            if let Some(found) = matches.remove(&library_id) {
                ids.push(found.entry_id.clone());
                interleaved.push(OrderedTrack {
                    position: 0,
                    track_file_id: found.entry_id.clone(),
                    section,
                    transition_score: 0.8,
                    reasons: Vec::new(),
                });
                discovered.push(found);
            }
        }
        for (position, entry) in interleaved.iter_mut().enumerate() {
            entry.position = position;
        }

        (interleaved, ids, Some(discovered))
    }

    /// Rebuild a request from a saved playlist's strategy and summary
    fn request_from_playlist(playlist: &GeneratedPlaylist) -> PlaylistRequest {
        let strategy = &playlist.strategy;
        let summary = &playlist.summary;

        let mut genres: Vec<String> = Vec::new();
        for genre in strategy
            .genre_mix_guidance
            .primary_genres
            .iter()
            .chain(strategy.genre_mix_guidance.secondary_genres.iter())
        {
            if !genres.contains(genre) {
                genres.push(genre.clone());
            }
        }
        let mut top_mix: Vec<(&String, &usize)> = summary.genre_mix.iter().collect();
        top_mix.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (genre, _) in top_mix.into_iter().take(3) {
            if !genres.contains(genre) {
                genres.push(genre.clone());
            }
        }

        let bucket = strategy.tempo_guidance.target_bucket.or_else(|| {
            summary
                .tempo_mix
                .iter()
                .filter(|(name, _)| name.as_str() != "unknown")
                .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
                .and_then(|(name, _)| match name.as_str() {
                    "slow" => Some(TempoBucket::Slow),
                    "medium" => Some(TempoBucket::Medium),
                    "fast" => Some(TempoBucket::Fast),
                    _ => None,
                })
        });

        let length = if summary.total_duration > 0 {
            PlaylistLength::Minutes((summary.total_duration as f32 / 60.0).round().max(1.0) as u32)
        } else {
            PlaylistLength::Tracks(summary.track_count.max(1))
        };

        PlaylistRequest {
            genres,
            tempo: crate::request::TempoPreference {
                bucket,
                bpm_range: strategy.tempo_guidance.bpm_range,
            },
            length,
            surprise: 0.3,
            enable_discovery: false,
            ..Default::default()
        }
    }

    fn pool_avg_duration(pool: &[String], tracks_by_id: &HashMap<&str, &Track>) -> f32 {
        if pool.is_empty() {
            return 0.0;
        }
        let total: u64 = pool
            .iter()
            .filter_map(|id| tracks_by_id.get(id.as_str()))
            .map(|t| t.effective_duration() as u64)
            .sum();
        total as f32 / pool.len() as f32
    }
}
