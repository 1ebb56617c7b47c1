use crate::error::OracleError;
use crate::models::{LibrarySummary, Track};
use crate::playlist::strategy::PlaylistStrategy;
use crate::request::PlaylistRequest;
use serde::Deserialize;

/// External refiner capability (typically an LLM behind a transport the
/// caller owns). Both calls may fail; the engine always recovers by falling
/// back to the heuristic path or the algorithmic scores. Implementations are
/// responsible for timeouts and cancellation.
#[cfg_attr(test, mockall::automock)]
pub trait RefinerOracle {
    /// Returns a JSON string that must deserialize to `PlaylistStrategy`
    fn request_strategy(&self, prompt: &str) -> Result<String, OracleError>;

    /// Returns a JSON string that must deserialize to `RefinementResponse`.
    /// `trackFileId` in the response is the 1-based candidate index from the
    /// prompt; the engine maps it back.
    fn request_track_refinement(&self, prompt: &str) -> Result<String, OracleError>;
}

/// Typed shape of a track-refinement response
#[derive(Debug, Deserialize)]
pub struct RefinementResponse {
    pub tracks: Vec<RefinedTrack>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinedTrack {
    /// 1-based index into the candidate list sent in the prompt
    pub track_file_id: String,
    pub refined_score: f32,
    #[serde(default)]
    pub explanation: String,
    pub semantic_match: SemanticMatch,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticMatch {
    pub mood_match: bool,
    pub activity_match: bool,
    #[serde(default)]
    pub genre_relationship: String,
}

/// Build the prompt for the strategy call from the request and a library
/// summary
pub fn build_strategy_prompt(request: &PlaylistRequest, summary: &LibrarySummary) -> String {
    let request_json = serde_json::to_string_pretty(request).unwrap_or_default();
    let summary_json = serde_json::to_string_pretty(summary).unwrap_or_default();
    format!(
        "You are planning a playlist for a personal music library.\n\
         Produce a single JSON object with the fields: title, description, \
         constraints (optional: minTracks, maxTracks, minDuration, maxDuration, \
         requiredGenres, excludedGenres), scoringWeights (genreMatch, tempoMatch, \
         moodMatch, activityMatch, diversity; each in [0,1]), diversityRules \
         (maxTracksPerArtist, artistSpacing, genreSpacing), orderingPlan.sections \
         (name in warmup|build|peak|cooldown|transition, startPosition, \
         endPosition in [0,1], optional tempoTarget, optional energyLevel), \
         vibeTags, tempoGuidance (targetBucket, bpmRange, allowVariation) and \
         genreMixGuidance (primaryGenres, secondaryGenres, mixRatio).\n\
         Respond with JSON only.\n\n\
         User request:\n{request_json}\n\n\
         Library summary:\n{summary_json}\n"
    )
}

/// Build the prompt for the one-shot track refinement call. Candidates are
/// numbered from 1; the response refers to them by that number.
pub fn build_refinement_prompt(
    request: &PlaylistRequest,
    candidates: &[&Track],
    already_selected: &[&Track],
) -> String {
    let mut prompt = String::from(
        "Rate how well each numbered candidate fits the playlist request. \
         Respond with JSON only: {\"tracks\": [{\"trackFileId\": \"<candidate \
         number>\", \"refinedScore\": <0..1>, \"explanation\": \"...\", \
         \"semanticMatch\": {\"moodMatch\": bool, \"activityMatch\": bool, \
         \"genreRelationship\": \"...\"}}]}\n\n",
    );

    let request_json = serde_json::to_string_pretty(request).unwrap_or_default();
    prompt.push_str(&format!("User request:\n{request_json}\n\n"));

    if !already_selected.is_empty() {
        prompt.push_str("Already selected:\n");
        for track in already_selected {
            prompt.push_str(&format!(
                "- {} by {} [{}]\n",
                track.title,
                track.artist,
                track.all_genres().join(", ")
            ));
        }
        prompt.push('\n');
    }

    prompt.push_str("Candidates:\n");
    for (position, track) in candidates.iter().enumerate() {
        prompt.push_str(&format!(
            "{}. {} by {} [{}]{}\n",
            position + 1,
            track.title,
            track.artist,
            track.all_genres().join(", "),
            track
                .effective_bpm()
                .map(|bpm| format!(" {bpm} BPM"))
                .unwrap_or_default(),
        ));
    }
    prompt
}

/// Parse and sanitize a strategy response
pub fn parse_strategy(json: &str) -> Result<PlaylistStrategy, OracleError> {
    let strategy: PlaylistStrategy =
        serde_json::from_str(json).map_err(|e| OracleError::Schema(e.to_string()))?;
    strategy.sanitized().map_err(OracleError::Schema)
}

/// Parse a refinement response for `candidate_count` candidates into
/// `(0-based index, refined score)` pairs. Any out-of-range score or index
/// fails the whole refinement.
pub fn parse_refinement(
    json: &str,
    candidate_count: usize,
) -> Result<Vec<(usize, f32)>, OracleError> {
    let response: RefinementResponse =
        serde_json::from_str(json).map_err(|e| OracleError::Schema(e.to_string()))?;

    let mut refined = Vec::with_capacity(response.tracks.len());
    for track in &response.tracks {
        let position: usize = track
            .track_file_id
            .trim()
            .parse()
            .map_err(|_| OracleError::Schema(format!("bad candidate index {:?}", track.track_file_id)))?;
        if position == 0 || position > candidate_count {
            return Err(OracleError::Schema(format!(
                "candidate index {position} outside 1..={candidate_count}"
            )));
        }
        if !track.refined_score.is_finite() || !(0.0..=1.0).contains(&track.refined_score) {
            return Err(OracleError::Schema(format!(
                "refined score {} outside [0, 1]",
                track.refined_score
            )));
        }
        refined.push((position - 1, track.refined_score));
    }
    Ok(refined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_refinement() {
        let json = r#"{"tracks": [
            {"trackFileId": "1", "refinedScore": 0.9, "explanation": "fits",
             "semanticMatch": {"moodMatch": true, "activityMatch": false, "genreRelationship": "same"}},
            {"trackFileId": "3", "refinedScore": 0.2, "explanation": "off",
             "semanticMatch": {"moodMatch": false, "activityMatch": false, "genreRelationship": "none"}}
        ]}"#;
        let refined = parse_refinement(json, 5).unwrap();
        assert_eq!(refined, vec![(0, 0.9), (2, 0.2)]);
    }

    #[test]
    fn rejects_out_of_range_index() {
        let json = r#"{"tracks": [
            {"trackFileId": "6", "refinedScore": 0.9, "explanation": "",
             "semanticMatch": {"moodMatch": true, "activityMatch": true, "genreRelationship": ""}}
        ]}"#;
        assert!(matches!(
            parse_refinement(json, 5),
            Err(OracleError::Schema(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_score() {
        let json = r#"{"tracks": [
            {"trackFileId": "1", "refinedScore": 1.4, "explanation": "",
             "semanticMatch": {"moodMatch": true, "activityMatch": true, "genreRelationship": ""}}
        ]}"#;
        assert!(parse_refinement(json, 5).is_err());
    }

    #[test]
    fn rejects_malformed_strategy_json() {
        assert!(matches!(
            parse_strategy("not json"),
            Err(OracleError::Schema(_))
        ));
    }
}
