use crate::matching::{MatchingIndex, TrackFacts};
use crate::matching::normalize::normalize_genres;
use crate::models::Track;
use crate::playlist::strategy::PlaylistStrategy;
use crate::request::PlaylistRequest;
use serde::Serialize;
use std::collections::HashSet;

/// Fixed weight of the duration-fit component in the aggregate score
pub const DURATION_FIT_WEIGHT: f32 = 0.15;

/// Why a track was chosen (or penalized), attached to every selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonKind {
    GenreMatch,
    TempoMatch,
    MoodMatch,
    ActivityMatch,
    DurationFit,
    Diversity,
    Surprise,
    Constraint,
    Affinity,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackReason {
    pub kind: ReasonKind,
    pub explanation: String,
    pub score: f32,
}

impl TrackReason {
    fn new(kind: ReasonKind, explanation: impl Into<String>, score: f32) -> Self {
        TrackReason {
            kind,
            explanation: explanation.into(),
            score,
        }
    }
}

/// Per-component scores kept alongside the total for debugging
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentScores {
    pub genre_match: f32,
    pub tempo_match: f32,
    pub mood_match: f32,
    pub activity_match: f32,
    pub duration_fit: f32,
    pub diversity: f32,
    pub surprise: f32,
}

/// A scored track with its reasons
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSelection {
    pub track_file_id: String,
    pub track: Track,
    pub total_score: f32,
    pub reasons: Vec<TrackReason>,
    pub component_scores: ComponentScores,
}

/// Artists and genres related to the user's suggestions, derived once per
/// generation and worth a small additive bonus
#[derive(Debug, Default)]
pub struct AffinityContext {
    pub artists: HashSet<String>,
    pub genres: HashSet<String>,
}

impl AffinityContext {
    /// Derive the affinity sets from suggested artists/albums/tracks and the
    /// `similarArtists` of the tracks they resolve to
    pub fn derive(request: &PlaylistRequest, tracks: &[Track]) -> Self {
        let mut artists: HashSet<String> = request
            .suggested_artists
            .iter()
            .map(|a| a.to_lowercase())
            .collect();

        let albums: HashSet<String> = request
            .suggested_albums
            .iter()
            .map(|a| a.to_lowercase())
            .collect();
        let titles: HashSet<String> = request
            .suggested_tracks
            .iter()
            .map(|t| t.to_lowercase())
            .collect();

        for track in tracks {
            if albums.contains(&track.album.to_lowercase())
                || titles.contains(&track.title.to_lowercase())
            {
                artists.insert(track.artist.to_lowercase());
            }
        }

        // Expand through similar artists, then collect the genres those
        // artists are tagged with
        let mut expanded = artists.clone();
        let mut genres: HashSet<String> = HashSet::new();
        for track in tracks {
            if artists.contains(&track.artist.to_lowercase()) {
                for similar in track.similar_artists() {
                    expanded.insert(similar.to_lowercase());
                }
                for genre in normalize_genres(&track.all_genres()) {
                    genres.insert(genre);
                }
            }
        }

        AffinityContext {
            artists: expanded,
            genres,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.artists.is_empty() && self.genres.is_empty()
    }
}

/// Everything a single scoring call reads. The request is assumed normalized.
pub struct ScoringContext<'a> {
    pub request: &'a PlaylistRequest,
    pub strategy: &'a PlaylistStrategy,
    pub index: &'a MatchingIndex,
    pub previous: &'a [TrackSelection],
    pub current_duration: u32,
    pub target_duration: u32,
    pub remaining_slots: usize,
    pub affinity: &'a AffinityContext,
}

/// The scoring kernel: component scorers with reasons, combined with the
/// strategy's weights
pub struct TrackScoring;

impl TrackScoring {
    /// Score one candidate against the request, strategy and selection state
    pub fn score_track(track: &Track, ctx: &ScoringContext<'_>) -> TrackSelection {
        let owned_facts;
        let facts = match ctx.index.facts(&track.track_file_id) {
            Some(facts) => facts,
            None => {
                // Candidates normally come from the index; recompute for the
                // odd caller that scores an out-of-snapshot track
                owned_facts = Self::facts_for(track);
                &owned_facts
            }
        };

        let mut reasons = Vec::new();

        let (genre, mut genre_reasons) = Self::genre_score(facts, ctx);
        reasons.append(&mut genre_reasons);
        let (tempo, mut tempo_reasons) = Self::tempo_score(facts, ctx);
        reasons.append(&mut tempo_reasons);
        let (mood, mut mood_reasons) = Self::mood_score(facts, ctx);
        reasons.append(&mut mood_reasons);
        let (activity, mut activity_reasons) = Self::activity_score(facts, ctx);
        reasons.append(&mut activity_reasons);
        let (duration_fit, mut duration_reasons) = Self::duration_fit(track, ctx);
        reasons.append(&mut duration_reasons);
        let (diversity, mut diversity_reasons) = Self::diversity_score(facts, ctx);
        reasons.append(&mut diversity_reasons);
        let (surprise, mut surprise_reasons) = Self::surprise_score(track, facts, ctx);
        reasons.append(&mut surprise_reasons);
        let (suggestion_bonus, mut suggestion_reasons) = Self::suggestion_bonus(track, ctx);
        reasons.append(&mut suggestion_reasons);
        let (affinity_bonus, mut affinity_reasons) = Self::affinity_bonus(facts, ctx);
        reasons.append(&mut affinity_reasons);
        let instruction = Self::instruction_score(track, ctx);

        let weights = &ctx.strategy.scoring_weights;
        let weighted = weights.genre_match * genre
            + weights.tempo_match * tempo
            + weights.mood_match * mood
            + weights.activity_match * activity
            + weights.diversity * diversity
            + DURATION_FIT_WEIGHT * duration_fit;

        let total_score = weighted
            + suggestion_bonus
            + affinity_bonus
            + surprise * ctx.request.surprise * 0.1
            + instruction * 0.1;

        TrackSelection {
            track_file_id: track.track_file_id.clone(),
            track: track.clone(),
            total_score,
            reasons,
            component_scores: ComponentScores {
                genre_match: genre,
                tempo_match: tempo,
                mood_match: mood,
                activity_match: activity,
                duration_fit,
                diversity,
                surprise,
            },
        }
    }

    fn facts_for(track: &Track) -> TrackFacts {
        use crate::matching::normalize::{
            infer_activities, normalize_activities, normalize_moods, tempo_bucket,
        };
        let normalized_genres = normalize_genres(&track.all_genres());
        let bucket = tempo_bucket(track.effective_bpm());
        let mapped_activity = {
            let tagged = normalize_activities(track.activity_tags());
            if tagged.is_empty() {
                infer_activities(bucket, &normalized_genres)
            } else {
                tagged
            }
        };
        TrackFacts {
            artist: track.artist.clone(),
            album: track.album.clone(),
            normalized_genres,
            tempo_bucket: bucket,
            effective_bpm: track.effective_bpm(),
            mapped_mood: normalize_moods(track.mood_tags()),
            mapped_activity,
            year: track.year,
        }
    }

    fn genre_score(facts: &TrackFacts, ctx: &ScoringContext<'_>) -> (f32, Vec<TrackReason>) {
        let requested = &ctx.request.genres;
        let mut reasons = Vec::new();

        let mut score = if requested.is_empty() {
            1.0
        } else {
            let exact = requested
                .iter()
                .filter(|g| facts.normalized_genres.contains(*g))
                .count();
            if exact > 0 {
                let score = exact as f32 / requested.len() as f32;
                reasons.push(TrackReason::new(
                    ReasonKind::GenreMatch,
                    format!("Matches {exact} requested genre(s)"),
                    score,
                ));
                score
            } else {
                let partial = requested
                    .iter()
                    .filter(|g| {
                        facts
                            .normalized_genres
                            .iter()
                            .any(|t| t.contains(g.as_str()) || g.contains(t.as_str()))
                    })
                    .count();
                if partial > 0 {
                    let score = 0.7 * partial as f32 / requested.len() as f32;
                    reasons.push(TrackReason::new(
                        ReasonKind::GenreMatch,
                        "Partial genre match",
                        score,
                    ));
                    score
                } else {
                    0.0
                }
            }
        };

        let required = ctx.strategy.required_genres();
        if !required.is_empty()
            && !required
                .iter()
                .any(|g| facts.normalized_genres.contains(g))
        {
            score *= 0.3;
            reasons.push(TrackReason::new(
                ReasonKind::Constraint,
                format!("Missing required genres ({})", required.join(", ")),
                0.3,
            ));
        }

        (score, reasons)
    }

    fn tempo_score(facts: &TrackFacts, ctx: &ScoringContext<'_>) -> (f32, Vec<TrackReason>) {
        use crate::models::TempoBucket;
        let mut reasons = Vec::new();

        let mut score: f32 = match ctx.request.tempo.bucket {
            Some(requested) => {
                if facts.tempo_bucket == requested {
                    reasons.push(TrackReason::new(
                        ReasonKind::TempoMatch,
                        format!("Matches the requested {} tempo", requested.as_str()),
                        1.0,
                    ));
                    1.0
                } else if facts.tempo_bucket == TempoBucket::Unknown {
                    0.5
                } else {
                    0.2
                }
            }
            None => 0.5,
        };

        if let (Some(range), Some(bpm)) = (ctx.request.tempo.bpm_range, facts.effective_bpm) {
            if range.contains(bpm) {
                if score < 1.0 {
                    reasons.push(TrackReason::new(
                        ReasonKind::TempoMatch,
                        format!("{bpm} BPM sits in the requested range"),
                        1.0,
                    ));
                }
                score = 1.0;
            } else {
                score = score.min(0.2);
            }
        }

        let guidance = &ctx.strategy.tempo_guidance;
        if let Some(target) = guidance.target_bucket {
            if facts.tempo_bucket == target {
                if score < 0.9 {
                    reasons.push(TrackReason::new(
                        ReasonKind::TempoMatch,
                        format!("Fits the {} tempo of this playlist", target.as_str()),
                        0.9,
                    ));
                    score = 0.9;
                }
            } else if guidance.allow_variation && facts.tempo_bucket != TempoBucket::Unknown {
                score = score.max(0.6);
            }
        }

        (score, reasons)
    }

    fn mood_score(facts: &TrackFacts, ctx: &ScoringContext<'_>) -> (f32, Vec<TrackReason>) {
        let requested = &ctx.request.mood;
        if requested.is_empty() {
            return (1.0, Vec::new());
        }
        if facts.mapped_mood.is_empty() {
            // No mood tags: neutral rather than disqualifying
            return (0.5, Vec::new());
        }

        let matched: Vec<&String> = requested
            .iter()
            .filter(|m| facts.mapped_mood.contains(*m))
            .collect();
        let score = matched.len() as f32 / requested.len() as f32;
        let reasons = if matched.is_empty() {
            Vec::new()
        } else {
            vec![TrackReason::new(
                ReasonKind::MoodMatch,
                format!(
                    "Matches the {} mood",
                    matched
                        .iter()
                        .map(|m| m.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                score,
            )]
        };
        (score, reasons)
    }

    fn activity_score(facts: &TrackFacts, ctx: &ScoringContext<'_>) -> (f32, Vec<TrackReason>) {
        let requested = &ctx.request.activity;
        if requested.is_empty() {
            return (1.0, Vec::new());
        }
        if facts.mapped_activity.is_empty() {
            return (0.5, Vec::new());
        }

        let matched: Vec<&String> = requested
            .iter()
            .filter(|a| facts.mapped_activity.contains(*a))
            .collect();
        let score = matched.len() as f32 / requested.len() as f32;
        let reasons = if matched.is_empty() {
            Vec::new()
        } else {
            vec![TrackReason::new(
                ReasonKind::ActivityMatch,
                format!(
                    "Suits {}",
                    matched
                        .iter()
                        .map(|a| a.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                score,
            )]
        };
        (score, reasons)
    }

    fn duration_fit(track: &Track, ctx: &ScoringContext<'_>) -> (f32, Vec<TrackReason>) {
        if ctx.target_duration <= ctx.current_duration {
            return (0.0, Vec::new());
        }
        let avg_remaining = (ctx.target_duration - ctx.current_duration) as f32
            / ctx.remaining_slots.max(1) as f32;
        let diff = (track.effective_duration() as f32 - avg_remaining).abs();
        let fit = (1.0 - diff / (avg_remaining * 0.5)).max(0.0);

        let mut reasons = Vec::new();
        if fit > 0.8 {
            reasons.push(TrackReason::new(
                ReasonKind::DurationFit,
                "Fills the remaining time well",
                fit,
            ));
        } else if fit > 0.5 {
            reasons.push(TrackReason::new(
                ReasonKind::DurationFit,
                "Reasonable length for the remaining time",
                fit,
            ));
        }
        (fit, reasons)
    }

    fn diversity_score(facts: &TrackFacts, ctx: &ScoringContext<'_>) -> (f32, Vec<TrackReason>) {
        let rules = &ctx.strategy.diversity_rules;
        let previous = ctx.previous;
        let artist_lower = facts.artist.to_lowercase();
        let mut reasons = Vec::new();
        let mut multiplier = 1.0;

        let artist_count = previous
            .iter()
            .filter(|s| s.track.artist.to_lowercase() == artist_lower)
            .count();
        let recent_artist = previous
            .iter()
            .rev()
            .take(rules.artist_spacing)
            .any(|s| s.track.artist.to_lowercase() == artist_lower);

        if artist_count >= rules.max_tracks_per_artist {
            multiplier *= 0.1;
            reasons.push(TrackReason::new(
                ReasonKind::Diversity,
                "Artist is already at its limit for this playlist",
                0.1,
            ));
        } else if recent_artist {
            multiplier *= 0.3;
            reasons.push(TrackReason::new(
                ReasonKind::Diversity,
                "Same artist appeared only a few tracks ago",
                0.3,
            ));
        } else {
            reasons.push(TrackReason::new(
                ReasonKind::Diversity,
                "Adds artist variety",
                1.0,
            ));
        }

        let shares_recent_genre = previous
            .iter()
            .rev()
            .take(rules.genre_spacing)
            .filter_map(|s| ctx.index.facts(&s.track_file_id))
            .any(|prev| {
                prev.normalized_genres
                    .iter()
                    .any(|g| facts.normalized_genres.contains(g))
            });
        if shares_recent_genre {
            multiplier *= 0.7;
            reasons.push(TrackReason::new(
                ReasonKind::Diversity,
                "Shares a genre with the last few tracks",
                0.7,
            ));
        }

        if !previous.is_empty() {
            let album_lower = facts.album.to_lowercase();
            let recent_album = previous
                .iter()
                .rev()
                .take(rules.artist_spacing)
                .any(|s| s.track.album.to_lowercase() == album_lower);
            if !recent_album {
                // Fresh album bonus may push the component above 1.0
                multiplier *= 1.1;
            }
        }

        (multiplier, reasons)
    }

    fn surprise_score(
        track: &Track,
        facts: &TrackFacts,
        ctx: &ScoringContext<'_>,
    ) -> (f32, Vec<TrackReason>) {
        let dial = ctx.request.surprise;
        if dial < 0.1 {
            return (0.0, Vec::new());
        }
        let requested = &ctx.request.genres;
        if requested.is_empty() {
            return (0.0, Vec::new());
        }
        if requested
            .iter()
            .any(|g| facts.normalized_genres.contains(g))
        {
            return (0.0, Vec::new());
        }

        // Out-of-genre track: is the artist known from the requested genres?
        let artist_lower = facts.artist.to_lowercase();
        let familiar_artist = requested
            .iter()
            .filter_map(|g| ctx.index.tracks_for_genre(g))
            .flatten()
            .filter(|id| id.as_str() != track.track_file_id)
            .filter_map(|id| ctx.index.facts(id))
            .any(|other| other.artist.to_lowercase() == artist_lower);
        if familiar_artist {
            let score = dial * 0.5;
            return (
                score,
                vec![TrackReason::new(
                    ReasonKind::Surprise,
                    "A familiar artist stepping outside the requested genres",
                    score,
                )],
            );
        }

        let related_to_selection = ctx
            .previous
            .iter()
            .filter_map(|s| ctx.index.facts(&s.track_file_id))
            .any(|prev| {
                prev.normalized_genres
                    .iter()
                    .any(|g| facts.normalized_genres.contains(g))
            });
        if related_to_selection {
            let score = dial * 0.3;
            return (
                score,
                vec![TrackReason::new(
                    ReasonKind::Surprise,
                    "Outside the request but related to earlier picks",
                    score,
                )],
            );
        }

        (0.0, Vec::new())
    }

    fn instruction_score(track: &Track, ctx: &ScoringContext<'_>) -> f32 {
        let Some(ref text) = ctx.request.llm_additional_instructions else {
            return 0.0;
        };
        let tokens: Vec<String> = text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() >= 3)
            .map(String::from)
            .collect();
        if tokens.is_empty() {
            return 0.0;
        }

        let haystack = format!(
            "{} {} {} {}",
            track.title,
            track.artist,
            track.album,
            track.all_genres().join(" ")
        )
        .to_lowercase();
        let matched = tokens.iter().filter(|t| haystack.contains(t.as_str())).count();
        matched as f32 / tokens.len() as f32
    }

    fn suggestion_bonus(track: &Track, ctx: &ScoringContext<'_>) -> (f32, Vec<TrackReason>) {
        let contains_ci = |values: &[String], wanted: &str| {
            let wanted = wanted.trim().to_lowercase();
            values.iter().any(|v| v.trim().to_lowercase() == wanted)
        };

        let mut bonus = 0.0;
        let mut reasons = Vec::new();
        if contains_ci(&ctx.request.suggested_artists, &track.artist) {
            bonus += 0.3;
            reasons.push(TrackReason::new(
                ReasonKind::Affinity,
                "You asked for this artist",
                0.3,
            ));
        }
        if contains_ci(&ctx.request.suggested_albums, &track.album) {
            bonus += 0.3;
            reasons.push(TrackReason::new(
                ReasonKind::Affinity,
                "From an album you suggested",
                0.3,
            ));
        }
        if contains_ci(&ctx.request.suggested_tracks, &track.title) {
            bonus += 0.5;
            reasons.push(TrackReason::new(
                ReasonKind::Affinity,
                "A track you asked for",
                0.5,
            ));
        }
        (bonus, reasons)
    }

    fn affinity_bonus(facts: &TrackFacts, ctx: &ScoringContext<'_>) -> (f32, Vec<TrackReason>) {
        if ctx.affinity.is_empty() {
            return (0.0, Vec::new());
        }
        let mut bonus: f32 = 0.0;
        let mut reasons = Vec::new();
        if ctx.affinity.artists.contains(&facts.artist.to_lowercase()) {
            bonus += 0.1;
            reasons.push(TrackReason::new(
                ReasonKind::Affinity,
                "By an artist close to your suggestions",
                0.1,
            ));
        }
        if facts
            .normalized_genres
            .iter()
            .any(|g| ctx.affinity.genres.contains(g))
        {
            bonus += 0.05;
            reasons.push(TrackReason::new(
                ReasonKind::Affinity,
                "Shares a genre with your suggestions",
                0.05,
            ));
        }
        (bonus.min(0.15), reasons)
    }
}
