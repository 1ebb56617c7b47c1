use crate::matching::MatchingIndex;
use crate::models::Track;
use crate::oracle::{build_refinement_prompt, parse_refinement, RefinerOracle};
use crate::playlist::scoring::{AffinityContext, ScoringContext, TrackScoring, TrackSelection};
use crate::playlist::strategy::PlaylistStrategy;
use crate::request::{PlaylistLength, PlaylistRequest};
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::Rng;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// How many of the top candidates the oracle refinement sees
const REFINEMENT_CANDIDATES: usize = 25;
/// Blend between algorithmic and refined scores
const REFINEMENT_BLEND: f32 = 0.7;
/// Tolerance around a minute-mode target
const MINUTE_TOLERANCE: f32 = 0.05;
/// Hard ceiling on the surprise pick window
const MAX_PICK_WINDOW: usize = 10;

/// Resolved length budget for one generation, with the discovery halving
/// already applied
#[derive(Debug, Clone, Copy)]
pub enum LengthBudget {
    Tracks {
        target: usize,
        /// Estimated seconds, used only by the duration-fit scorer
        target_duration: u32,
    },
    Minutes {
        target_duration: u32,
        avg_track_duration: f32,
    },
}

impl LengthBudget {
    /// Resolve the request's length against the candidate pool's average
    /// track duration. Discovery halves the internal target since every
    /// library track will be followed by a suggestion.
    pub fn from_request(request: &PlaylistRequest, pool_avg_duration: f32) -> Self {
        let avg = if pool_avg_duration > 0.0 {
            pool_avg_duration
        } else {
            crate::models::DEFAULT_DURATION_SECONDS as f32
        };
        match request.length {
            PlaylistLength::Tracks(tracks) => {
                let target = if request.enable_discovery {
                    tracks.div_ceil(2)
                } else {
                    tracks
                }
                .max(1);
                LengthBudget::Tracks {
                    target,
                    target_duration: (target as f32 * avg).round() as u32,
                }
            }
            PlaylistLength::Minutes(minutes) => {
                let seconds = minutes * 60;
                let target_duration = if request.enable_discovery {
                    (seconds / 2).max(1)
                } else {
                    seconds
                };
                LengthBudget::Minutes {
                    target_duration,
                    avg_track_duration: avg,
                }
            }
        }
    }

    pub fn target_duration(&self) -> u32 {
        match self {
            LengthBudget::Tracks {
                target_duration, ..
            }
            | LengthBudget::Minutes {
                target_duration, ..
            } => *target_duration,
        }
    }

    /// Track-count estimate, used for iteration caps and seeding limits
    pub fn target_tracks(&self) -> usize {
        match self {
            LengthBudget::Tracks { target, .. } => *target,
            LengthBudget::Minutes {
                target_duration,
                avg_track_duration,
            } => ((*target_duration as f32 / avg_track_duration).ceil() as usize).max(1),
        }
    }

    fn remaining_slots(&self, selected: usize, current_duration: u32) -> usize {
        match self {
            LengthBudget::Tracks { target, .. } => target.saturating_sub(selected).max(1),
            LengthBudget::Minutes {
                target_duration,
                avg_track_duration,
            } => {
                let remaining = target_duration.saturating_sub(current_duration) as f32;
                ((remaining / avg_track_duration).round() as usize).max(1)
            }
        }
    }

    fn upper_bound(&self) -> f32 {
        self.target_duration() as f32 * (1.0 + MINUTE_TOLERANCE)
    }

    /// Whether one more track of the given duration still fits the budget
    fn has_room_for(&self, selected: usize, current_duration: u32, duration: u32) -> bool {
        match self {
            LengthBudget::Tracks { target, .. } => selected < *target,
            LengthBudget::Minutes { .. } => {
                (current_duration + duration) as f32 <= self.upper_bound()
            }
        }
    }
}

/// Result of the selection loop before ordering
#[derive(Debug)]
pub struct SelectionOutcome {
    pub selections: Vec<TrackSelection>,
    pub total_duration: u32,
}

/// The iterative selection loop of the engine
pub struct SelectionLoop;

impl SelectionLoop {
    /// Select tracks from the candidate pool under the length budget. The
    /// pool is pre-sorted; all randomness flows from `rng`.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        tracks_by_id: &HashMap<&str, &Track>,
        pool: &[String],
        request: &PlaylistRequest,
        strategy: &PlaylistStrategy,
        index: &MatchingIndex,
        affinity: &AffinityContext,
        oracle: Option<&dyn RefinerOracle>,
        budget: &LengthBudget,
        rng: &mut StdRng,
    ) -> SelectionOutcome {
        let mut selections: Vec<TrackSelection> = Vec::new();
        let mut selected_ids: HashSet<String> = HashSet::new();
        let mut current_duration: u32 = 0;
        let mut oracle_consumed = oracle.is_none();

        Self::seed_suggested(
            tracks_by_id,
            pool,
            request,
            strategy,
            index,
            affinity,
            budget,
            &mut selections,
            &mut selected_ids,
            &mut current_duration,
        );

        let target_tracks = budget.target_tracks();
        let max_iterations = (target_tracks * 2).max(1000);

        for _ in 0..max_iterations {
            match budget {
                LengthBudget::Tracks { target, .. } => {
                    if selections.len() >= *target {
                        break;
                    }
                }
                LengthBudget::Minutes {
                    target_duration, ..
                } => {
                    let lower = *target_duration as f32 * (1.0 - MINUTE_TOLERANCE);
                    if current_duration as f32 >= lower {
                        if current_duration as f32 > budget.upper_bound() {
                            // Overshot past tolerance: drop the last pick
                            if let Some(popped) = selections.pop() {
                                selected_ids.remove(&popped.track_file_id);
                                current_duration = current_duration
                                    .saturating_sub(popped.track.effective_duration());
                            }
                        }
                        break;
                    }
                }
            }

            let ctx = ScoringContext {
                request,
                strategy,
                index,
                previous: &selections,
                current_duration,
                target_duration: budget.target_duration(),
                remaining_slots: budget.remaining_slots(selections.len(), current_duration),
                affinity,
            };
            let mut scored: Vec<TrackSelection> = pool
                .iter()
                .filter(|id| !selected_ids.contains(id.as_str()))
                .filter_map(|id| tracks_by_id.get(id.as_str()))
                .map(|track| TrackScoring::score_track(track, &ctx))
                .collect();
            if scored.is_empty() {
                break;
            }
            sort_by_score(&mut scored);

            if !oracle_consumed {
                // The oracle is consulted exactly once per generation, on the
                // first pass, over the current top candidates
                oracle_consumed = true;
                if let Some(oracle) = oracle {
                    Self::blend_refinement(oracle, request, &selections, &mut scored);
                }
            }

            // The artist cap binds hard while alternatives remain; the
            // scoring penalty alone cannot guarantee it inside the window
            let rules = &strategy.diversity_rules;
            let (eligible, over_cap): (Vec<TrackSelection>, Vec<TrackSelection>) =
                scored.into_iter().partition(|candidate| {
                    let artist = candidate.track.artist.to_lowercase();
                    selections
                        .iter()
                        .filter(|s| s.track.artist.to_lowercase() == artist)
                        .count()
                        < rules.max_tracks_per_artist
                });
            let mut scored = if eligible.is_empty() { over_cap } else { eligible };

            let window = Self::pick_window(scored.len(), request.surprise);
            let pick = rng.gen_range(0..window);
            let selection = scored.swap_remove(pick);
            current_duration += selection.track.effective_duration();
            selected_ids.insert(selection.track_file_id.clone());
            selections.push(selection);
        }

        Self::enforce_min_artists(
            tracks_by_id,
            pool,
            request,
            strategy,
            index,
            affinity,
            budget,
            &mut selections,
            &mut selected_ids,
            &mut current_duration,
        );

        // Track-count mode never returns more than asked for
        if let LengthBudget::Tracks { target, .. } = budget {
            if selections.len() > *target {
                sort_by_score(&mut selections);
                selections.truncate(*target);
                current_duration = selections
                    .iter()
                    .map(|s| s.track.effective_duration())
                    .sum();
            }
        }

        debug!(
            "selected {} tracks, {} seconds",
            selections.len(),
            current_duration
        );
        SelectionOutcome {
            selections,
            total_duration: current_duration,
        }
    }

    /// Window the pick falls in: wide for low surprise, narrowed as the dial
    /// rises, never past the top ten
    fn pick_window(candidates: usize, surprise: f32) -> usize {
        let window = ((candidates as f32) * (1.0 - surprise * 0.5)).floor() as usize;
        window.max(1).min(MAX_PICK_WINDOW).min(candidates)
    }

    /// Seed tracks matching the user's explicit suggestions, capped at 40% of
    /// a track-count target (or 15 for minute mode)
    #[allow(clippy::too_many_arguments)]
    fn seed_suggested(
        tracks_by_id: &HashMap<&str, &Track>,
        pool: &[String],
        request: &PlaylistRequest,
        strategy: &PlaylistStrategy,
        index: &MatchingIndex,
        affinity: &AffinityContext,
        budget: &LengthBudget,
        selections: &mut Vec<TrackSelection>,
        selected_ids: &mut HashSet<String>,
        current_duration: &mut u32,
    ) {
        if request.suggested_artists.is_empty()
            && request.suggested_albums.is_empty()
            && request.suggested_tracks.is_empty()
        {
            return;
        }

        let cap = match budget {
            LengthBudget::Tracks { target, .. } => (*target as f32 * 0.4).floor() as usize,
            LengthBudget::Minutes { .. } => 15,
        };
        if cap == 0 {
            return;
        }

        let matches_ci = |values: &[String], wanted: &str| {
            let wanted = wanted.trim().to_lowercase();
            values.iter().any(|v| v.trim().to_lowercase() == wanted)
        };

        let suggested: Vec<&&Track> = pool
            .iter()
            .filter_map(|id| tracks_by_id.get(id.as_str()))
            .filter(|track| {
                matches_ci(&request.suggested_artists, &track.artist)
                    || matches_ci(&request.suggested_albums, &track.album)
                    || matches_ci(&request.suggested_tracks, &track.title)
            })
            .collect();
        if suggested.is_empty() {
            return;
        }

        // Rank the matches once, then admit them through the scorer so their
        // selection records carry reasons like everything else
        let initial_ctx = ScoringContext {
            request,
            strategy,
            index,
            previous: selections,
            current_duration: *current_duration,
            target_duration: budget.target_duration(),
            remaining_slots: budget.remaining_slots(selections.len(), *current_duration),
            affinity,
        };
        let mut ranked: Vec<TrackSelection> = suggested
            .iter()
            .map(|track| TrackScoring::score_track(track, &initial_ctx))
            .collect();
        sort_by_score(&mut ranked);

        for candidate in ranked.into_iter().take(cap) {
            let ctx = ScoringContext {
                request,
                strategy,
                index,
                previous: selections,
                current_duration: *current_duration,
                target_duration: budget.target_duration(),
                remaining_slots: budget.remaining_slots(selections.len(), *current_duration),
                affinity,
            };
            let selection = TrackScoring::score_track(&candidate.track, &ctx);
            *current_duration += selection.track.effective_duration();
            selected_ids.insert(selection.track_file_id.clone());
            selections.push(selection);
        }
        debug!("seeded {} suggested tracks", selections.len());
    }

    /// Single-shot oracle refinement over the top candidates, blended as
    /// 0.7 algorithmic + 0.3 refined. Any failure leaves the algorithmic
    /// scores standing.
    fn blend_refinement(
        oracle: &dyn RefinerOracle,
        request: &PlaylistRequest,
        previous: &[TrackSelection],
        scored: &mut Vec<TrackSelection>,
    ) {
        let top: Vec<&Track> = scored
            .iter()
            .take(REFINEMENT_CANDIDATES)
            .map(|s| &s.track)
            .collect();
        let top_count = top.len();
        let context: Vec<&Track> = previous.iter().map(|s| &s.track).collect();
        let prompt = build_refinement_prompt(request, &top, &context);
        drop(top);

        let refined = oracle
            .request_track_refinement(&prompt)
            .and_then(|json| parse_refinement(&json, top_count));
        match refined {
            Ok(refined) => {
                for (position, refined_score) in refined {
                    let entry = &mut scored[position];
                    entry.total_score = REFINEMENT_BLEND * entry.total_score
                        + (1.0 - REFINEMENT_BLEND) * refined_score;
                }
                sort_by_score(scored);
                debug!("blended oracle refinement over {top_count} candidates");
            }
            Err(e) => {
                warn!("oracle refinement failed, keeping algorithmic scores: {e}");
            }
        }
    }

    /// Best-effort widening of the artist set when the request asks for a
    /// minimum. Appends while the budget has room, otherwise swaps out the
    /// weakest selections of over-represented artists. The selection list is
    /// rebuilt, never mutated mid-iteration.
    #[allow(clippy::too_many_arguments)]
    fn enforce_min_artists(
        tracks_by_id: &HashMap<&str, &Track>,
        pool: &[String],
        request: &PlaylistRequest,
        strategy: &PlaylistStrategy,
        index: &MatchingIndex,
        affinity: &AffinityContext,
        budget: &LengthBudget,
        selections: &mut Vec<TrackSelection>,
        selected_ids: &mut HashSet<String>,
        current_duration: &mut u32,
    ) {
        let Some(min_artists) = request.min_artists else {
            return;
        };
        let mut distinct: HashSet<String> = selections
            .iter()
            .map(|s| s.track.artist.to_lowercase())
            .collect();
        if distinct.len() >= min_artists {
            return;
        }

        // Unused artists, most tracks first so the richest pools come in early
        let mut by_artist: HashMap<String, Vec<&String>> = HashMap::new();
        for id in pool {
            if selected_ids.contains(id.as_str()) {
                continue;
            }
            let Some(facts) = index.facts(id) else {
                continue;
            };
            let artist = facts.artist.to_lowercase();
            if !distinct.contains(&artist) {
                by_artist.entry(artist).or_default().push(id);
            }
        }
        let mut ordered_artists: Vec<(String, Vec<&String>)> = by_artist.into_iter().collect();
        ordered_artists.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));

        for (artist, ids) in ordered_artists {
            if distinct.len() >= min_artists {
                break;
            }
            let ctx = ScoringContext {
                request,
                strategy,
                index,
                previous: selections,
                current_duration: *current_duration,
                target_duration: budget.target_duration(),
                remaining_slots: budget.remaining_slots(selections.len(), *current_duration),
                affinity,
            };
            let mut candidates: Vec<TrackSelection> = ids
                .iter()
                .filter_map(|id| tracks_by_id.get(id.as_str()))
                .map(|track| TrackScoring::score_track(track, &ctx))
                .collect();
            sort_by_score(&mut candidates);
            let Some(best) = candidates.into_iter().next() else {
                continue;
            };

            let duration = best.track.effective_duration();
            if budget.has_room_for(selections.len(), *current_duration, duration) {
                *current_duration += duration;
                selected_ids.insert(best.track_file_id.clone());
                selections.push(best);
                distinct.insert(artist);
                continue;
            }

            // No room: replace the weakest selection of an artist that holds
            // more than one slot
            let mut counts: HashMap<String, usize> = HashMap::new();
            for selection in selections.iter() {
                *counts
                    .entry(selection.track.artist.to_lowercase())
                    .or_insert(0) += 1;
            }
            let victim = selections
                .iter()
                .enumerate()
                .filter(|(_, s)| counts[&s.track.artist.to_lowercase()] > 1)
                .min_by(|(_, a), (_, b)| {
                    a.total_score
                        .partial_cmp(&b.total_score)
                        .unwrap_or(Ordering::Equal)
                })
                .map(|(position, _)| position);
            let Some(victim) = victim else {
                // Every artist holds a single slot; replacing cannot help
                break;
            };

            let mut rebuilt: Vec<TrackSelection> = Vec::with_capacity(selections.len());
            for (position, selection) in selections.drain(..).enumerate() {
                if position == victim {
                    selected_ids.remove(&selection.track_file_id);
                    *current_duration =
                        current_duration.saturating_sub(selection.track.effective_duration());
                } else {
                    rebuilt.push(selection);
                }
            }
            *current_duration += duration;
            selected_ids.insert(best.track_file_id.clone());
            rebuilt.push(best);
            *selections = rebuilt;
            distinct.insert(artist);
        }
    }
}

/// Descending by score, track id as the deterministic tie-break
pub fn sort_by_score(selections: &mut [TrackSelection]) {
    selections.sort_by(|a, b| {
        b.total_score
            .partial_cmp(&a.total_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.track_file_id.cmp(&b.track_file_id))
    });
}
