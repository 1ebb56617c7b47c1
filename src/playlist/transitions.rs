use crate::matching::normalize::energy_level;
use crate::matching::{MatchingIndex, TrackFacts};
use crate::playlist::scoring::{TrackReason, TrackSelection};
use crate::playlist::selection::sort_by_score;
use crate::playlist::strategy::{OrderingPlan, SectionName};
use serde::Serialize;
use std::cmp::Ordering;

/// A track placed in the final sequence, with its arc section and the
/// transition score against its predecessor
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderedTrack {
    pub position: usize,
    pub track_file_id: String,
    pub section: SectionName,
    pub transition_score: f32,
    pub reasons: Vec<TrackReason>,
}

/// The flow-arc ordering agent: assigns selections to sections and orders
/// within each section by transition score
pub struct ArcOrdering;

impl ArcOrdering {
    /// Order the selections along the strategy's arc. `surprise_candidates`
    /// are scored pool tracks that were not selected, eligible for insertion
    /// when the surprise dial is high.
    pub fn order(
        selections: &[TrackSelection],
        plan: &OrderingPlan,
        index: &MatchingIndex,
        surprise: f32,
        surprise_candidates: &[TrackSelection],
    ) -> Vec<OrderedTrack> {
        if selections.is_empty() {
            return Vec::new();
        }

        let sections = Self::assign_sections(selections, plan, index);
        let mut ordered = Self::order_within_sections(sections, index);
        Self::insert_surprises(&mut ordered, surprise, surprise_candidates);
        Self::finalize(ordered, plan, index)
    }

    /// Score a transition from `prev` to `next`. The first track of a
    /// playlist has no predecessor and scores the neutral base.
    pub fn transition_score(prev: Option<&TrackFacts>, next: &TrackFacts) -> f32 {
        let Some(prev) = prev else {
            return 1.0;
        };
        let mut score = 1.0_f32;

        if prev.artist.to_lowercase() == next.artist.to_lowercase() {
            score *= 0.2;
        }
        if !prev.album.is_empty() && prev.album.to_lowercase() == next.album.to_lowercase() {
            score *= 0.5;
        }

        let genre_overlap = prev
            .normalized_genres
            .iter()
            .any(|g| next.normalized_genres.contains(g));
        score *= if genre_overlap { 1.1 } else { 0.9 };

        let mood_overlap = prev.mapped_mood.iter().any(|m| next.mapped_mood.contains(m));
        if mood_overlap {
            score *= 1.05;
        } else if !prev.mapped_mood.is_empty() && !next.mapped_mood.is_empty() {
            score *= 0.95;
        }

        let activity_overlap = prev
            .mapped_activity
            .iter()
            .any(|a| next.mapped_activity.contains(a));
        if activity_overlap {
            score *= 1.05;
        } else if !prev.mapped_activity.is_empty() && !next.mapped_activity.is_empty() {
            score *= 0.95;
        }

        if let (Some(a), Some(b)) = (prev.tempo_bucket.ordinal(), next.tempo_bucket.ordinal()) {
            match (a - b).abs() {
                0 => {}
                1 => score *= 1.2,
                _ => score *= 0.8,
            }
        }

        if let (Some(a), Some(b)) = (prev.year, next.year) {
            let delta = a.abs_diff(b);
            if delta < 5 {
                score *= 1.05;
            } else if delta > 20 {
                score *= 0.95;
            }
        }

        score
    }

    /// Distribute selections over the plan's sections by positional share,
    /// preferring tracks that match each section's tempo target and energy
    /// level. Whatever the plan does not cover lands in the peak.
    fn assign_sections(
        selections: &[TrackSelection],
        plan: &OrderingPlan,
        index: &MatchingIndex,
    ) -> Vec<(SectionName, Vec<TrackSelection>)> {
        let total = selections.len();
        let mut remaining: Vec<TrackSelection> = selections.to_vec();
        sort_by_score(&mut remaining);

        let mut assigned: Vec<(SectionName, Vec<TrackSelection>)> = Vec::new();
        for section in &plan.sections {
            let slots = ((section.end_position * total as f32).floor()
                - (section.start_position * total as f32).floor()) as usize;
            let slots = slots.min(remaining.len());
            if slots == 0 {
                assigned.push((section.name, Vec::new()));
                continue;
            }

            // Only restrict by tempo when enough matching tracks exist
            let tempo_matches = |selection: &TrackSelection| {
                section.tempo_target.is_some_and(|target| {
                    index
                        .facts(&selection.track_file_id)
                        .map(|f| f.tempo_bucket == target)
                        .unwrap_or(false)
                })
            };
            let matching = remaining.iter().filter(|s| tempo_matches(s)).count();
            let tempo_active = section.tempo_target.is_some() && matching >= slots;

            let energy_matches = |selection: &TrackSelection| {
                section.energy_level.is_some_and(|wanted| {
                    index
                        .facts(&selection.track_file_id)
                        .map(|f| energy_level(&f.mapped_mood, &f.mapped_activity) == wanted)
                        .unwrap_or(false)
                })
            };

            // Stable pick order: tempo preference, energy preference, then
            // the score ranking the list already carries
            let mut ranked: Vec<usize> = (0..remaining.len()).collect();
            ranked.sort_by_key(|&i| {
                let tempo_miss = if tempo_active && !tempo_matches(&remaining[i]) {
                    1
                } else {
                    0
                };
                let energy_miss = if energy_matches(&remaining[i]) { 0 } else { 1 };
                (tempo_miss, energy_miss, i)
            });

            let chosen_indices: Vec<usize> = ranked.into_iter().take(slots).collect();
            let mut chosen: Vec<TrackSelection> = Vec::with_capacity(slots);
            let mut kept: Vec<TrackSelection> = Vec::with_capacity(remaining.len() - slots);
            for (i, selection) in remaining.into_iter().enumerate() {
                if chosen_indices.contains(&i) {
                    chosen.push(selection);
                } else {
                    kept.push(selection);
                }
            }
            remaining = kept;
            assigned.push((section.name, chosen));
        }

        // Rounding gaps and plan holes overflow into the peak
        if !remaining.is_empty() {
            if let Some(peak) = assigned
                .iter_mut()
                .find(|(name, _)| *name == SectionName::Peak)
            {
                peak.1.append(&mut remaining);
            } else {
                assigned.push((SectionName::Peak, remaining));
            }
        }

        assigned
    }

    /// Greedy ordering: each next track is the remaining one with the best
    /// transition from the previous, carrying across section boundaries
    fn order_within_sections(
        sections: Vec<(SectionName, Vec<TrackSelection>)>,
        index: &MatchingIndex,
    ) -> Vec<(SectionName, TrackSelection, f32)> {
        let mut ordered: Vec<(SectionName, TrackSelection, f32)> = Vec::new();
        let mut prev_id: Option<String> = None;

        for (name, mut tracks) in sections {
            while !tracks.is_empty() {
                let prev_facts = prev_id.as_deref().and_then(|id| index.facts(id));
                let (best_position, best_score) = tracks
                    .iter()
                    .enumerate()
                    .map(|(position, selection)| {
                        let score = index
                            .facts(&selection.track_file_id)
                            .map(|facts| Self::transition_score(prev_facts, facts))
                            .unwrap_or(1.0);
                        (position, score)
                    })
                    .max_by(|(a_pos, a), (b_pos, b)| {
                        a.partial_cmp(b)
                            .unwrap_or(Ordering::Equal)
                            .then_with(|| {
                                let a_sel = &tracks[*a_pos];
                                let b_sel = &tracks[*b_pos];
                                a_sel
                                    .total_score
                                    .partial_cmp(&b_sel.total_score)
                                    .unwrap_or(Ordering::Equal)
                                    .then_with(|| {
                                        b_sel.track_file_id.cmp(&a_sel.track_file_id)
                                    })
                            })
                    })
                    .unwrap_or((0, 1.0));

                let selection = tracks.remove(best_position);
                prev_id = Some(selection.track_file_id.clone());
                ordered.push((name, selection, best_score));
            }
        }
        ordered
    }

    /// Insert up to three high-surprise leftovers at the quarter marks when
    /// the dial is high enough and the playlist long enough
    fn insert_surprises(
        ordered: &mut Vec<(SectionName, TrackSelection, f32)>,
        surprise: f32,
        surprise_candidates: &[TrackSelection],
    ) {
        if surprise < 0.3 || ordered.len() < 5 {
            return;
        }
        let count = ((ordered.len() as f32 * surprise * 0.1).floor() as usize)
            .min(3)
            .min(surprise_candidates.len());
        if count == 0 {
            return;
        }

        let mut eligible: Vec<TrackSelection> = surprise_candidates
            .iter()
            .filter(|s| s.component_scores.surprise > 0.0)
            .cloned()
            .collect();
        eligible.sort_by(|a, b| {
            b.component_scores
                .surprise
                .partial_cmp(&a.component_scores.surprise)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.track_file_id.cmp(&b.track_file_id))
        });

        let base_len = ordered.len();
        for (i, candidate) in eligible.into_iter().take(count).enumerate() {
            let fraction = 0.25 * (i + 1) as f32;
            let position = ((base_len as f32 * fraction) as usize + i).min(ordered.len());
            let section = ordered
                .get(position)
                .or_else(|| ordered.last())
                .map(|(name, _, _)| *name)
                .unwrap_or(SectionName::Peak);
            ordered.insert(position, (section, candidate, 1.0));
        }
    }

    /// Recompute section labels from final positions and transition scores
    /// against the actual predecessor
    fn finalize(
        ordered: Vec<(SectionName, TrackSelection, f32)>,
        plan: &OrderingPlan,
        index: &MatchingIndex,
    ) -> Vec<OrderedTrack> {
        let total = ordered.len();
        let mut out: Vec<OrderedTrack> = Vec::with_capacity(total);
        let mut prev_id: Option<String> = None;

        for (position, (_, selection, _)) in ordered.into_iter().enumerate() {
            let ratio = position as f32 / total as f32;
            let section = plan
                .sections
                .iter()
                .find(|s| ratio >= s.start_position && ratio < s.end_position)
                .or_else(|| plan.sections.last().filter(|s| ratio >= s.end_position))
                .map(|s| s.name)
                .unwrap_or(SectionName::Peak);

            let prev_facts = prev_id.as_deref().and_then(|id| index.facts(id));
            let transition_score = index
                .facts(&selection.track_file_id)
                .map(|facts| Self::transition_score(prev_facts, facts))
                .unwrap_or(1.0);

            prev_id = Some(selection.track_file_id.clone());
            out.push(OrderedTrack {
                position,
                track_file_id: selection.track_file_id.clone(),
                section,
                transition_score,
                reasons: selection.reasons.clone(),
            });
        }
        out
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

    fn track(id: &str, artist: &str, album: &str, genres: Vec<&str>, bpm: Option<u32>) -> Track {
        Track {
            track_file_id: id.to_string(),
            library_root_id: "root".to_string(),
            title: format!("Title {id}"),
            artist: artist.to_string(),
            album: album.to_string(),
            genres: genres.into_iter().map(String::from).collect(),
            year: Some(2020),
            track_no: None,
            duration_seconds: Some(200),
            bpm,
            enhanced: None,
            added_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn facts_pair(a: &Track, b: &Track) -> (MatchingIndex, String, String) {
        let index = MatchingIndex::build(&[a.clone(), b.clone()]);
        (index, a.track_file_id.clone(), b.track_file_id.clone())
    }

    #[test]
    fn same_artist_is_heavily_penalized() {
        let a = track("a", "Artist", "Album One", vec!["Rock"], Some(120));
        let b = track("b", "Artist", "Album Two", vec!["Rock"], Some(121));
        let (index, a_id, b_id) = facts_pair(&a, &b);
        let score = ArcOrdering::transition_score(
            Some(index.facts(&a_id).unwrap()),
            index.facts(&b_id).unwrap(),
        );
        // 0.2 artist x 1.1 genre overlap x 1.05 activity overlap (inferred,
        // same for both) x 1.05 year delta
        assert!(score < 0.3);
    }

    #[test]
    fn adjacent_tempo_bucket_is_a_bonus() {
        let a = track("a", "Artist A", "One", vec!["Rock"], Some(100));
        let b = track("b", "Artist B", "Two", vec!["Rock"], Some(150));
        let (index, a_id, b_id) = facts_pair(&a, &b);
        let adjacent = ArcOrdering::transition_score(
            Some(index.facts(&a_id).unwrap()),
            index.facts(&b_id).unwrap(),
        );

        let c = track("c", "Artist C", "Three", vec!["Rock"], Some(80));
        let d = track("d", "Artist D", "Four", vec!["Rock"], Some(150));
        let (index2, c_id, d_id) = facts_pair(&c, &d);
        let jump = ArcOrdering::transition_score(
            Some(index2.facts(&c_id).unwrap()),
            index2.facts(&d_id).unwrap(),
        );

        // medium -> fast carries the x1.2 flow bonus, slow -> fast the x0.8 penalty
        assert!(adjacent > jump);
    }

    #[test]
    fn first_track_scores_the_neutral_base() {
        let a = track("a", "Artist", "Album", vec!["Rock"], Some(120));
        let index = MatchingIndex::build(&[a.clone()]);
        assert_relative_eq!(
            ArcOrdering::transition_score(None, index.facts("a").unwrap()),
            1.0
        );
    }

    fn selections_for(tracks: &[Track], request: &PlaylistRequest) -> Vec<TrackSelection> {
        let request = request.normalized();
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
        tracks
            .iter()
            .map(|t| TrackScoring::score_track(t, &ctx))
            .collect()
    }

    #[test]
    fn every_selection_is_placed_exactly_once() {
        let tracks: Vec<Track> = (0..12)
            .map(|i| {
                track(
                    &format!("t{i:02}"),
                    &format!("Artist {i}"),
                    &format!("Album {i}"),
                    vec!["Rock"],
                    Some(100 + i * 5),
                )
            })
            .collect();
        let request = PlaylistRequest {
            genres: vec!["Rock".to_string()],
            length: PlaylistLength::Tracks(12),
            ..Default::default()
        };
        let selections = selections_for(&tracks, &request);
        let summary = LibrarySummary::from_tracks(&tracks);
        let strategy = derive_strategy(&request.normalized(), &summary);
        let index = MatchingIndex::build(&tracks);

        let ordered =
            ArcOrdering::order(&selections, &strategy.ordering_plan, &index, 0.0, &[]);
        assert_eq!(ordered.len(), 12);

        let mut ids: Vec<&str> = ordered.iter().map(|o| o.track_file_id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 12);

        // Positions are contiguous and labeled from the plan
        for (expected, entry) in ordered.iter().enumerate() {
            assert_eq!(entry.position, expected);
        }
    }

    #[test]
    fn greedy_start_of_section_is_locally_optimal() {
        // Three tracks, one section: after the best-scored track opens the
        // playlist, the follow-up must be the better transition of the two
        // remaining
        let tracks = vec![
            track("opener", "Artist A", "One", vec!["Rock"], Some(100)),
            track("same-artist", "Artist A", "Two", vec!["Rock"], Some(101)),
            track("fresh", "Artist B", "Three", vec!["Rock"], Some(102)),
        ];
        let request = PlaylistRequest {
            genres: vec!["Rock".to_string()],
            length: PlaylistLength::Tracks(3),
            ..Default::default()
        };
        let selections = selections_for(&tracks, &request);
        let summary = LibrarySummary::from_tracks(&tracks);
        let strategy = derive_strategy(&request.normalized(), &summary);
        let index = MatchingIndex::build(&tracks);

        let ordered =
            ArcOrdering::order(&selections, &strategy.ordering_plan, &index, 0.0, &[]);
        let first_artist = &ordered[0].track_file_id;
        let second = &ordered[1].track_file_id;
        // Whoever opens, the second pick never repeats the opener's artist
        // while a fresh artist remains
        let opener_facts = index.facts(first_artist).unwrap();
        let second_facts = index.facts(second).unwrap();
        assert_ne!(opener_facts.artist, second_facts.artist);
    }

    #[test]
    fn surprise_insertion_respects_threshold_and_count() {
        let tracks: Vec<Track> = (0..10)
            .map(|i| {
                track(
                    &format!("t{i:02}"),
                    &format!("Artist {i}"),
                    &format!("Album {i}"),
                    vec!["Rock"],
                    Some(100 + i),
                )
            })
            .collect();
        let request = PlaylistRequest {
            genres: vec!["Rock".to_string()],
            length: PlaylistLength::Tracks(10),
            surprise: 1.0,
            ..Default::default()
        };
        let selections = selections_for(&tracks, &request);
        let summary = LibrarySummary::from_tracks(&tracks);
        let strategy = derive_strategy(&request.normalized(), &summary);
        let index = MatchingIndex::build(&tracks);

        // One eligible leftover with a surprise score
        let extra = track("extra", "Artist X", "Elsewhere", vec!["Jazz"], Some(110));
        let mut extra_selection = selections_for(&[extra.clone()], &request)
            .into_iter()
            .next()
            .unwrap();
        extra_selection.component_scores.surprise = 0.5;

        let without = ArcOrdering::order(&selections, &strategy.ordering_plan, &index, 0.2, &[
            extra_selection.clone(),
        ]);
        assert_eq!(without.len(), 10, "below the dial threshold nothing is inserted");

        let with = ArcOrdering::order(&selections, &strategy.ordering_plan, &index, 1.0, &[
            extra_selection,
        ]);
        assert_eq!(with.len(), 11);
        assert!(with.iter().any(|o| o.track_file_id == "extra"));
    }
}
