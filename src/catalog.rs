use crate::error::CatalogError;
use crate::models::{EnhancedMetadata, Track};

/// Read side of the persistent catalog. The engine only ever consumes a
/// snapshot; `bulk_update` exists for BPM backfill and enrichment flows that
/// run outside a generation.
pub trait CatalogReader {
    /// Load all tracks, optionally scoped to a single library root
    fn load_tracks(&self, library_root_id: Option<&str>) -> Result<Vec<Track>, CatalogError>;

    /// Apply metadata updates keyed by composite track identity
    fn bulk_update(&mut self, updates: &[TrackUpdate]) -> Result<(), CatalogError>;
}

/// One metadata update for `bulk_update`
#[derive(Debug, Clone)]
pub struct TrackUpdate {
    pub track_file_id: String,
    pub library_root_id: String,
    pub bpm: Option<u32>,
    pub enhanced: Option<EnhancedMetadata>,
}

/// Catalog backed by an owned `Vec<Track>`; the reference implementation of
/// the read interface and the harness the test suite generates against
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    tracks: Vec<Track>,
}

impl InMemoryCatalog {
    pub fn new(tracks: Vec<Track>) -> Self {
        InMemoryCatalog { tracks }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }
}

impl CatalogReader for InMemoryCatalog {
    fn load_tracks(&self, library_root_id: Option<&str>) -> Result<Vec<Track>, CatalogError> {
        match library_root_id {
            None => Ok(self.tracks.clone()),
            Some(root) => {
                let scoped: Vec<Track> = self
                    .tracks
                    .iter()
                    .filter(|t| t.library_root_id == root)
                    .cloned()
                    .collect();
                Ok(scoped)
            }
        }
    }

    fn bulk_update(&mut self, updates: &[TrackUpdate]) -> Result<(), CatalogError> {
        for update in updates {
            let target = self.tracks.iter_mut().find(|t| {
                t.track_file_id == update.track_file_id
                    && t.library_root_id == update.library_root_id
            });
            let Some(track) = target else {
                continue;
            };
            if let Some(bpm) = update.bpm {
                track.bpm = Some(bpm);
            }
            if let Some(ref enhanced) = update.enhanced {
                // Manually edited fields stay as the user wrote them
                let manual = track
                    .enhanced
                    .as_ref()
                    .map(|e| e.manual_fields.clone())
                    .unwrap_or_default();
                let mut merged = enhanced.clone();
                if let Some(ref existing) = track.enhanced {
                    if manual.contains("mood") {
                        merged.mood = existing.mood.clone();
                    }
                    if manual.contains("activity") {
                        merged.activity = existing.activity.clone();
                    }
                    if manual.contains("genres") {
                        merged.genres = existing.genres.clone();
                    }
                    if manual.contains("tempo") {
                        merged.tempo = existing.tempo;
                    }
                }
                merged.manual_fields = manual;
                track.enhanced = Some(merged);
            }
        }
        Ok(())
    }
}
