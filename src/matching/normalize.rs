use crate::models::TempoBucket;
use serde::{Deserialize, Serialize};

/// Coarse energy level derived from mood and activity categories, used by the
/// flow-arc ordering agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnergyLevel {
    Low,
    Medium,
    High,
}

/// Genre synonym table, keyed by the lowercased alphanumeric form of a tag.
/// Canonical forms are stable under re-normalization.
const GENRE_SYNONYMS: &[(&str, &str)] = &[
    ("hiphop", "hip hop"),
    ("rb", "r&b"),
    ("rnb", "r&b"),
    ("randb", "r&b"),
    ("rhythmandblues", "r&b"),
    ("drumandbass", "drum and bass"),
    ("drumnbass", "drum and bass"),
    ("dnb", "drum and bass"),
    ("electronica", "electronic"),
    ("lofi", "lo-fi"),
    ("altrock", "alternative rock"),
    ("alternativerock", "alternative rock"),
    ("indierock", "indie rock"),
    ("indiepop", "indie pop"),
    ("postpunk", "post-punk"),
    ("postrock", "post-rock"),
    ("synthpop", "synth-pop"),
    ("neosoul", "neo-soul"),
    ("classicrock", "classic rock"),
    ("hardrock", "hard rock"),
    ("heavymetal", "heavy metal"),
    ("singersongwriter", "singer-songwriter"),
];

/// Mood synonym table, keyed by the lowercased trimmed tag. Values are drawn
/// from the closed canonical mood set.
const MOOD_SYNONYMS: &[(&str, &str)] = &[
    ("chill", "relaxed"),
    ("chilled", "relaxed"),
    ("mellow", "relaxed"),
    ("laid back", "relaxed"),
    ("laid-back", "relaxed"),
    ("peaceful", "calm"),
    ("soothing", "calm"),
    ("serene", "calm"),
    ("ambient", "calm"),
    ("hype", "energetic"),
    ("pumped", "energetic"),
    ("intense", "energetic"),
    ("high energy", "energetic"),
    ("driving", "energetic"),
    ("uplifting", "upbeat"),
    ("positive", "upbeat"),
    ("feelgood", "happy"),
    ("feel good", "happy"),
    ("feel-good", "happy"),
    ("cheerful", "happy"),
    ("joyful", "happy"),
    ("melancholy", "sad"),
    ("melancholic", "sad"),
    ("somber", "sad"),
    ("blue", "sad"),
    ("wistful", "nostalgic"),
    ("retro", "nostalgic"),
    ("throwback", "nostalgic"),
    ("moody", "dark"),
    ("brooding", "dark"),
    ("love", "romantic"),
    ("romance", "romantic"),
    ("concentration", "focus"),
    ("focused", "focus"),
];

/// Activity synonym table, keyed by the lowercased trimmed tag
const ACTIVITY_SYNONYMS: &[(&str, &str)] = &[
    ("gym", "workout"),
    ("exercise", "workout"),
    ("training", "workout"),
    ("lifting", "workout"),
    ("run", "running"),
    ("jogging", "running"),
    ("jog", "running"),
    ("study", "studying"),
    ("reading", "studying"),
    ("work", "studying"),
    ("focus", "studying"),
    ("dance", "party"),
    ("dancing", "party"),
    ("club", "party"),
    ("rave", "party"),
    ("sleeping", "sleep"),
    ("bedtime", "sleep"),
    ("night", "sleep"),
    ("commute", "driving"),
    ("commuting", "driving"),
    ("road trip", "driving"),
    ("roadtrip", "driving"),
    ("relax", "relaxing"),
    ("relaxation", "relaxing"),
    ("lounge", "relaxing"),
    ("unwind", "relaxing"),
];

/// Genre families used for activity inference when a track carries no
/// activity tags
const ELECTRONIC_FAMILY: &[&str] = &[
    "electronic", "house", "techno", "trance", "edm", "dance", "drum and bass",
];
const QUIET_FAMILY: &[&str] = &["ambient", "classical", "jazz", "acoustic", "folk", "lo-fi"];
const ROAD_FAMILY: &[&str] = &["pop", "rock", "indie rock", "indie pop", "country"];

/// Canonicalize a genre tag: case-fold, trim, collapse inner whitespace, then
/// resolve through the synonym table. Unknown tags pass through case-folded.
/// Idempotent: canonical forms map to themselves.
pub fn normalize_genre(raw: &str) -> String {
    let folded = raw
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    // The lookup key strips punctuation and whitespace so "Hip-Hop",
    // "hip hop" and "hiphop" all land on the same row
    let key: String = folded.chars().filter(|c| c.is_alphanumeric()).collect();

    for (synonym, canonical) in GENRE_SYNONYMS {
        if key == *synonym {
            return (*canonical).to_string();
        }
    }
    folded
}

/// Normalize a list of genre tags, deduplicating while preserving order
pub fn normalize_genres(raw: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(raw.len());
    for genre in raw {
        let normalized = normalize_genre(genre);
        if !normalized.is_empty() && !out.contains(&normalized) {
            out.push(normalized);
        }
    }
    out
}

/// Bucket a BPM reading with the fixed thresholds. Absent BPM is `Unknown`.
pub fn tempo_bucket(bpm: Option<u32>) -> TempoBucket {
    match bpm {
        None => TempoBucket::Unknown,
        Some(bpm) if bpm < 90 => TempoBucket::Slow,
        Some(bpm) if bpm < 140 => TempoBucket::Medium,
        Some(_) => TempoBucket::Fast,
    }
}

fn map_through(table: &[(&str, &str)], raw: &str) -> String {
    let folded = raw
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    for (synonym, canonical) in table {
        if folded == *synonym {
            return (*canonical).to_string();
        }
    }
    folded
}

/// Resolve a mood tag to its canonical category. Tags outside the synonym
/// table survive case-folded so exotic moods still match exactly.
pub fn normalize_mood(raw: &str) -> String {
    map_through(MOOD_SYNONYMS, raw)
}

/// Resolve an activity tag to its canonical category
pub fn normalize_activity(raw: &str) -> String {
    map_through(ACTIVITY_SYNONYMS, raw)
}

pub fn normalize_moods(raw: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(raw.len());
    for mood in raw {
        let normalized = normalize_mood(mood);
        if !normalized.is_empty() && !out.contains(&normalized) {
            out.push(normalized);
        }
    }
    out
}

pub fn normalize_activities(raw: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(raw.len());
    for activity in raw {
        let normalized = normalize_activity(activity);
        if !normalized.is_empty() && !out.contains(&normalized) {
            out.push(normalized);
        }
    }
    out
}

fn genre_in_family(genres: &[String], family: &[&str]) -> bool {
    genres.iter().any(|g| family.contains(&g.as_str()))
}

/// Infer activity categories from tempo and genre when a track has no
/// activity tags. Fast electronic reads as workout/party, slow ambient as
/// sleep/studying, and so on.
pub fn infer_activities(bucket: TempoBucket, normalized_genres: &[String]) -> Vec<String> {
    match bucket {
        TempoBucket::Fast => {
            if genre_in_family(normalized_genres, ELECTRONIC_FAMILY) {
                vec!["workout".to_string(), "party".to_string()]
            } else {
                vec!["workout".to_string()]
            }
        }
        TempoBucket::Slow => {
            if genre_in_family(normalized_genres, QUIET_FAMILY) {
                vec!["sleep".to_string(), "studying".to_string()]
            } else {
                vec!["relaxing".to_string()]
            }
        }
        TempoBucket::Medium => {
            if genre_in_family(normalized_genres, ELECTRONIC_FAMILY) {
                vec!["party".to_string()]
            } else if genre_in_family(normalized_genres, ROAD_FAMILY) {
                vec!["driving".to_string()]
            } else {
                Vec::new()
            }
        }
        TempoBucket::Unknown => Vec::new(),
    }
}

const HIGH_ENERGY: &[&str] = &[
    "energetic", "upbeat", "happy", "party", "workout", "running",
];
const LOW_ENERGY: &[&str] = &[
    "calm", "relaxed", "sad", "sleep", "studying", "relaxing",
];

/// Derive a coarse energy level from canonical mood and activity categories:
/// high wins over low when a track carries both kinds of tag
pub fn energy_level(moods: &[String], activities: &[String]) -> EnergyLevel {
    let any_in = |tags: &[String], set: &[&str]| tags.iter().any(|t| set.contains(&t.as_str()));

    if any_in(moods, HIGH_ENERGY) || any_in(activities, HIGH_ENERGY) {
        EnergyLevel::High
    } else if any_in(moods, LOW_ENERGY) || any_in(activities, LOW_ENERGY) {
        EnergyLevel::Low
    } else {
        EnergyLevel::Medium
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genre_synonyms_collapse() {
        assert_eq!(normalize_genre("Hip-Hop"), "hip hop");
        assert_eq!(normalize_genre("hip hop"), "hip hop");
        assert_eq!(normalize_genre("HipHop"), "hip hop");
        assert_eq!(normalize_genre("RnB"), "r&b");
        assert_eq!(normalize_genre("R&B"), "r&b");
        assert_eq!(normalize_genre("Drum'n'Bass"), "drum and bass");
    }

    #[test]
    fn unknown_genres_pass_through_case_folded() {
        assert_eq!(normalize_genre("  Math Rock "), "math rock");
        assert_eq!(normalize_genre("Zeuhl"), "zeuhl");
    }

    #[test]
    fn genre_normalization_is_idempotent() {
        for raw in ["Hip-Hop", "R&B", "Lo-Fi", "Synth-Pop", "Shoegaze", "post-rock"] {
            let once = normalize_genre(raw);
            assert_eq!(normalize_genre(&once), once, "not idempotent for {raw}");
        }
    }

    #[test]
    fn tempo_bucket_thresholds() {
        assert_eq!(tempo_bucket(Some(89)), TempoBucket::Slow);
        assert_eq!(tempo_bucket(Some(90)), TempoBucket::Medium);
        assert_eq!(tempo_bucket(Some(139)), TempoBucket::Medium);
        assert_eq!(tempo_bucket(Some(140)), TempoBucket::Fast);
        assert_eq!(tempo_bucket(None), TempoBucket::Unknown);
    }

    #[test]
    fn mood_synonyms_resolve_to_canonical_categories() {
        assert_eq!(normalize_mood("Chill"), "relaxed");
        assert_eq!(normalize_mood("melancholic"), "sad");
        assert_eq!(normalize_mood("UPLIFTING"), "upbeat");
        // Canonical categories are fixpoints
        assert_eq!(normalize_mood("relaxed"), "relaxed");
        assert_eq!(normalize_mood(&normalize_mood("Chill")), "relaxed");
    }

    #[test]
    fn activity_synonyms_resolve_to_canonical_categories() {
        assert_eq!(normalize_activity("Gym"), "workout");
        assert_eq!(normalize_activity("road trip"), "driving");
        assert_eq!(normalize_activity("workout"), "workout");
    }

    #[test]
    fn activity_inference_from_tempo_and_genre() {
        let electronic = vec!["electronic".to_string()];
        assert_eq!(
            infer_activities(TempoBucket::Fast, &electronic),
            vec!["workout", "party"]
        );
        let classical = vec!["classical".to_string()];
        assert_eq!(
            infer_activities(TempoBucket::Slow, &classical),
            vec!["sleep", "studying"]
        );
        assert!(infer_activities(TempoBucket::Unknown, &electronic).is_empty());
    }

    #[test]
    fn energy_level_prefers_high_over_low() {
        let high = vec!["energetic".to_string()];
        let low = vec!["calm".to_string()];
        assert_eq!(energy_level(&high, &[]), EnergyLevel::High);
        assert_eq!(energy_level(&low, &[]), EnergyLevel::Low);
        assert_eq!(energy_level(&high, &low), EnergyLevel::High);
        assert_eq!(energy_level(&[], &[]), EnergyLevel::Medium);
    }
}
