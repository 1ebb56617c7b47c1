use crate::matching::normalize::{normalize_genres, EnergyLevel};
use crate::models::{BpmRange, LibrarySummary, TempoBucket};
use crate::playlist::utils::ToTitleCase;
use crate::request::{PlaylistLength, PlaylistRequest};
use serde::{Deserialize, Serialize};

/// A derived plan for one playlist generation: weights, constraints,
/// diversity rules and the flow-arc ordering plan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistStrategy {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub constraints: Option<StrategyConstraints>,
    pub scoring_weights: ScoringWeights,
    pub diversity_rules: DiversityRules,
    pub ordering_plan: OrderingPlan,
    #[serde(default)]
    pub vibe_tags: Vec<String>,
    #[serde(default)]
    pub tempo_guidance: TempoGuidance,
    #[serde(default)]
    pub genre_mix_guidance: GenreMixGuidance,
}

/// Optional hard constraints a strategy may impose on selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyConstraints {
    pub min_tracks: Option<usize>,
    pub max_tracks: Option<usize>,
    pub min_duration: Option<u32>,
    pub max_duration: Option<u32>,
    #[serde(default)]
    pub required_genres: Vec<String>,
    #[serde(default)]
    pub excluded_genres: Vec<String>,
}

/// Weights for the scored components, each in [0, 1], default sum ~= 1
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringWeights {
    pub genre_match: f32,
    pub tempo_match: f32,
    pub mood_match: f32,
    pub activity_match: f32,
    pub diversity: f32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        ScoringWeights {
            genre_match: 0.30,
            tempo_match: 0.25,
            mood_match: 0.20,
            activity_match: 0.15,
            diversity: 0.10,
        }
    }
}

impl ScoringWeights {
    fn clamped(self) -> Self {
        ScoringWeights {
            genre_match: self.genre_match.clamp(0.0, 1.0),
            tempo_match: self.tempo_match.clamp(0.0, 1.0),
            mood_match: self.mood_match.clamp(0.0, 1.0),
            activity_match: self.activity_match.clamp(0.0, 1.0),
            diversity: self.diversity.clamp(0.0, 1.0),
        }
    }
}

/// Rules bounding repetition of artists and genres within the selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiversityRules {
    pub max_tracks_per_artist: usize,
    pub artist_spacing: usize,
    pub genre_spacing: usize,
    pub max_tracks_per_genre: Option<usize>,
}

impl Default for DiversityRules {
    fn default() -> Self {
        DiversityRules {
            max_tracks_per_artist: 3,
            artist_spacing: 5,
            genre_spacing: 2,
            max_tracks_per_genre: None,
        }
    }
}

/// Flow-arc section names in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionName {
    Warmup,
    Build,
    Peak,
    Cooldown,
    Transition,
}

impl SectionName {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionName::Warmup => "warmup",
            SectionName::Build => "build",
            SectionName::Peak => "peak",
            SectionName::Cooldown => "cooldown",
            SectionName::Transition => "transition",
        }
    }
}

/// One section of the ordering plan, covering [startPosition, endPosition)
/// of the playlist as positional ratios
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArcSection {
    pub name: SectionName,
    pub start_position: f32,
    pub end_position: f32,
    pub tempo_target: Option<TempoBucket>,
    pub energy_level: Option<EnergyLevel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderingPlan {
    pub sections: Vec<ArcSection>,
}

impl Default for OrderingPlan {
    fn default() -> Self {
        OrderingPlan {
            sections: vec![ArcSection {
                name: SectionName::Peak,
                start_position: 0.0,
                end_position: 1.0,
                tempo_target: None,
                energy_level: None,
            }],
        }
    }
}

/// Tempo guidance carried by a strategy; `allow_variation` false pins the
/// candidate pool to the target bucket
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TempoGuidance {
    pub target_bucket: Option<TempoBucket>,
    pub bpm_range: Option<BpmRange>,
    pub allow_variation: bool,
}

impl Default for TempoGuidance {
    fn default() -> Self {
        TempoGuidance {
            target_bucket: None,
            bpm_range: None,
            allow_variation: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenreMixGuidance {
    #[serde(default)]
    pub primary_genres: Vec<String>,
    #[serde(default)]
    pub secondary_genres: Vec<String>,
    pub mix_ratio: Option<f32>,
}

impl PlaylistStrategy {
    /// Sanitize a strategy that arrived from outside (the oracle): clamp
    /// weights, drop degenerate sections, canonicalize genre lists. Returns
    /// an error message when nothing usable remains.
    pub fn sanitized(mut self) -> Result<Self, String> {
        if self.title.trim().is_empty() {
            return Err("strategy title is empty".to_string());
        }
        self.scoring_weights = self.scoring_weights.clamped();
        self.diversity_rules.max_tracks_per_artist =
            self.diversity_rules.max_tracks_per_artist.max(1);
        self.diversity_rules.artist_spacing = self.diversity_rules.artist_spacing.max(1);

        self.ordering_plan.sections.retain(|section| {
            section.start_position >= 0.0
                && section.end_position <= 1.0
                && section.start_position < section.end_position
        });
        if self.ordering_plan.sections.is_empty() {
            return Err("ordering plan has no usable sections".to_string());
        }

        if let Some(ref mut constraints) = self.constraints {
            constraints.required_genres = normalize_genres(&constraints.required_genres);
            constraints.excluded_genres = normalize_genres(&constraints.excluded_genres);
        }
        self.genre_mix_guidance.primary_genres =
            normalize_genres(&self.genre_mix_guidance.primary_genres);
        self.genre_mix_guidance.secondary_genres =
            normalize_genres(&self.genre_mix_guidance.secondary_genres);

        Ok(self)
    }

    pub fn required_genres(&self) -> &[String] {
        self.constraints
            .as_ref()
            .map(|c| c.required_genres.as_slice())
            .unwrap_or(&[])
    }

    pub fn excluded_genres(&self) -> &[String] {
        self.constraints
            .as_ref()
            .map(|c| c.excluded_genres.as_slice())
            .unwrap_or(&[])
    }
}

/// How many tracks the generation is aiming for, given the request and the
/// library's average track duration
pub fn target_track_count(request: &PlaylistRequest, summary: &LibrarySummary) -> usize {
    match request.length {
        PlaylistLength::Tracks(tracks) => tracks,
        PlaylistLength::Minutes(minutes) => {
            let avg = summary.avg_duration_or_default();
            ((minutes as f32 * 60.0) / avg).ceil().max(1.0) as usize
        }
    }
}

/// Deterministic heuristic strategy derivation, used when no oracle is
/// configured or the oracle path fails
pub fn derive_strategy(request: &PlaylistRequest, summary: &LibrarySummary) -> PlaylistStrategy {
    let target_tracks = target_track_count(request, summary);

    let low_energy_request = !request.mood.is_empty()
        && request
            .mood
            .iter()
            .all(|m| matches!(m.as_str(), "calm" | "relaxed" | "sad" | "nostalgic"));
    let peak_energy = if low_energy_request {
        EnergyLevel::Medium
    } else {
        EnergyLevel::High
    };
    let peak_tempo = request.tempo.bucket.or_else(|| {
        request
            .mood
            .iter()
            .any(|m| matches!(m.as_str(), "energetic" | "upbeat"))
            .then_some(TempoBucket::Fast)
    });

    // Short playlists get a single peak; longer ones a warmup/peak/cooldown arc
    let sections = if target_tracks >= 10 {
        vec![
            ArcSection {
                name: SectionName::Warmup,
                start_position: 0.0,
                end_position: 0.2,
                tempo_target: Some(TempoBucket::Medium),
                energy_level: Some(EnergyLevel::Medium),
            },
            ArcSection {
                name: SectionName::Peak,
                start_position: 0.2,
                end_position: 0.8,
                tempo_target: peak_tempo,
                energy_level: Some(peak_energy),
            },
            ArcSection {
                name: SectionName::Cooldown,
                start_position: 0.8,
                end_position: 1.0,
                tempo_target: Some(TempoBucket::Slow),
                energy_level: Some(EnergyLevel::Low),
            },
        ]
    } else {
        vec![ArcSection {
            name: SectionName::Peak,
            start_position: 0.0,
            end_position: 1.0,
            tempo_target: peak_tempo,
            energy_level: Some(peak_energy),
        }]
    };

    // More surprise loosens the repetition rules
    let diversity_multiplier = 0.5 + request.surprise * 0.5;
    let mut max_tracks_per_artist = ((3.0 * diversity_multiplier).round() as usize).max(1);
    let artist_spacing = ((5.0 * diversity_multiplier).round() as usize).max(1);
    if let Some(min_artists) = request.min_artists {
        let cap = (target_tracks / min_artists).max(1);
        max_tracks_per_artist = max_tracks_per_artist.min(cap);
    }

    let (title, description) = compose_title(request);

    PlaylistStrategy {
        title,
        description,
        constraints: None,
        scoring_weights: ScoringWeights::default(),
        diversity_rules: DiversityRules {
            max_tracks_per_artist,
            artist_spacing,
            genre_spacing: 2,
            max_tracks_per_genre: None,
        },
        ordering_plan: OrderingPlan { sections },
        vibe_tags: request
            .mood
            .iter()
            .chain(request.activity.iter())
            .cloned()
            .collect(),
        tempo_guidance: TempoGuidance {
            target_bucket: request.tempo.bucket,
            bpm_range: request.tempo.bpm_range,
            allow_variation: !(request.tempo.bucket.is_some() && request.surprise < 0.1),
        },
        genre_mix_guidance: GenreMixGuidance {
            primary_genres: request.genres.clone(),
            secondary_genres: Vec::new(),
            mix_ratio: None,
        },
    }
}

fn compose_title(request: &PlaylistRequest) -> (String, String) {
    let mut parts: Vec<String> = Vec::new();
    parts.extend(request.mood.iter().map(|m| m.to_title_case()));
    parts.extend(request.genres.iter().map(|g| g.to_title_case()));
    parts.extend(request.activity.iter().map(|a| a.to_title_case()));

    let title = if parts.is_empty() {
        "Library Mix".to_string()
    } else {
        format!("{} Mix", parts.join(" "))
    };

    let mut description = String::from("A playlist");
    if !request.genres.is_empty() {
        description.push_str(&format!(" built around {}", request.genres.join(", ")));
    }
    if !request.mood.is_empty() {
        description.push_str(&format!(" with a {} feel", request.mood.join(", ")));
    }
    if !request.activity.is_empty() {
        description.push_str(&format!(" for {}", request.activity.join(", ")));
    }
    description.push('.');

    (title, description)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DurationStats;
    use crate::request::TempoPreference;

    fn summary_with_avg(avg: f32) -> LibrarySummary {
        LibrarySummary {
            total_tracks: 100,
            duration_stats: DurationStats {
                avg,
                min: 120,
                max: 400,
            },
            ..Default::default()
        }
    }

    #[test]
    fn target_tracks_from_minutes_uses_average_duration() {
        let request = PlaylistRequest {
            length: PlaylistLength::Minutes(30),
            ..Default::default()
        };
        // 1800 seconds at 240s average -> 8 tracks (ceil)
        assert_eq!(target_track_count(&request, &summary_with_avg(240.0)), 8);
        // Untagged library falls back to the 180s default -> 10 tracks
        assert_eq!(target_track_count(&request, &summary_with_avg(0.0)), 10);
    }

    #[test]
    fn long_playlists_get_three_sections() {
        let request = PlaylistRequest {
            length: PlaylistLength::Tracks(12),
            ..Default::default()
        };
        let strategy = derive_strategy(&request, &summary_with_avg(200.0));
        let names: Vec<SectionName> = strategy
            .ordering_plan
            .sections
            .iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(
            names,
            vec![SectionName::Warmup, SectionName::Peak, SectionName::Cooldown]
        );
    }

    #[test]
    fn short_playlists_get_a_single_peak() {
        let request = PlaylistRequest {
            length: PlaylistLength::Tracks(5),
            ..Default::default()
        };
        let strategy = derive_strategy(&request, &summary_with_avg(200.0));
        assert_eq!(strategy.ordering_plan.sections.len(), 1);
        assert_eq!(strategy.ordering_plan.sections[0].name, SectionName::Peak);
    }

    #[test]
    fn surprise_loosens_diversity_rules() {
        let strict = derive_strategy(
            &PlaylistRequest {
                length: PlaylistLength::Tracks(20),
                surprise: 0.0,
                ..Default::default()
            },
            &summary_with_avg(200.0),
        );
        // multiplier 0.5 -> round(1.5) = 2 per artist, round(2.5) = 3 spacing
        assert_eq!(strict.diversity_rules.max_tracks_per_artist, 2);
        assert_eq!(strict.diversity_rules.artist_spacing, 3);

        let loose = derive_strategy(
            &PlaylistRequest {
                length: PlaylistLength::Tracks(20),
                surprise: 1.0,
                ..Default::default()
            },
            &summary_with_avg(200.0),
        );
        assert_eq!(loose.diversity_rules.max_tracks_per_artist, 3);
        assert_eq!(loose.diversity_rules.artist_spacing, 5);
    }

    #[test]
    fn min_artists_caps_tracks_per_artist() {
        let request = PlaylistRequest {
            length: PlaylistLength::Tracks(10),
            surprise: 1.0,
            min_artists: Some(5),
            ..Default::default()
        };
        let strategy = derive_strategy(&request, &summary_with_avg(200.0));
        assert_eq!(strategy.diversity_rules.max_tracks_per_artist, 2);
    }

    #[test]
    fn pinned_bucket_with_zero_surprise_disables_variation() {
        let request = PlaylistRequest {
            length: PlaylistLength::Tracks(10),
            tempo: TempoPreference {
                bucket: Some(TempoBucket::Fast),
                bpm_range: None,
            },
            surprise: 0.0,
            ..Default::default()
        };
        let strategy = derive_strategy(&request, &summary_with_avg(200.0));
        assert!(!strategy.tempo_guidance.allow_variation);
        assert_eq!(
            strategy.tempo_guidance.target_bucket,
            Some(TempoBucket::Fast)
        );
    }

    #[test]
    fn title_concatenates_mood_genre_activity() {
        let request = PlaylistRequest {
            genres: vec!["rock".to_string()],
            mood: vec!["relaxed".to_string()],
            activity: vec!["driving".to_string()],
            length: PlaylistLength::Tracks(10),
            ..Default::default()
        };
        let strategy = derive_strategy(&request, &summary_with_avg(200.0));
        assert_eq!(strategy.title, "Relaxed Rock Driving Mix");
        assert!(strategy.description.contains("rock"));
    }

    #[test]
    fn sanitize_drops_degenerate_sections_and_clamps_weights() {
        let strategy = PlaylistStrategy {
            title: "Test".to_string(),
            description: String::new(),
            constraints: None,
            scoring_weights: ScoringWeights {
                genre_match: 1.7,
                tempo_match: -0.2,
                mood_match: 0.2,
                activity_match: 0.15,
                diversity: 0.1,
            },
            diversity_rules: DiversityRules::default(),
            ordering_plan: OrderingPlan {
                sections: vec![
                    ArcSection {
                        name: SectionName::Warmup,
                        start_position: 0.5,
                        end_position: 0.2,
                        tempo_target: None,
                        energy_level: None,
                    },
                    ArcSection {
                        name: SectionName::Peak,
                        start_position: 0.0,
                        end_position: 1.0,
                        tempo_target: None,
                        energy_level: None,
                    },
                ],
            },
            vibe_tags: Vec::new(),
            tempo_guidance: TempoGuidance::default(),
            genre_mix_guidance: GenreMixGuidance::default(),
        };
        let sanitized = strategy.sanitized().unwrap();
        assert_eq!(sanitized.scoring_weights.genre_match, 1.0);
        assert_eq!(sanitized.scoring_weights.tempo_match, 0.0);
        assert_eq!(sanitized.ordering_plan.sections.len(), 1);
    }

    #[test]
    fn sanitize_rejects_empty_plan() {
        let strategy = PlaylistStrategy {
            title: "Test".to_string(),
            description: String::new(),
            constraints: None,
            scoring_weights: ScoringWeights::default(),
            diversity_rules: DiversityRules::default(),
            ordering_plan: OrderingPlan { sections: Vec::new() },
            vibe_tags: Vec::new(),
            tempo_guidance: TempoGuidance::default(),
            genre_mix_guidance: GenreMixGuidance::default(),
        };
        assert!(strategy.sanitized().is_err());
    }
}
