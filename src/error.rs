use thiserror::Error;

/// Fatal outcomes of a single generation. Everything else (oracle, discovery,
/// BPM detection) is recovered locally and never reaches the caller.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Candidate pool is empty after all filters
    #[error("No tracks match the playlist criteria")]
    NoCandidates,

    /// Catalog snapshot is empty after applying exclusions
    #[error("No tracks are available in the library")]
    NoTracksAvailable,

    /// Request failed entry validation
    #[error("Invalid playlist request: {0}")]
    InvalidRequest(String),
}

/// Failures of the refiner oracle. Always recovered by falling back to the
/// heuristic strategy or the algorithmic scores.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Oracle transport failed: {0}")]
    Transport(String),

    #[error("Oracle call timed out")]
    Timeout,

    #[error("Oracle response failed schema validation: {0}")]
    Schema(String),
}

/// Failures of the discovery collaborator. Recovered per-track by skipping
/// that discovery slot.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Discovery lookup failed: {0}")]
    Transport(String),

    #[error("Discovery lookup timed out")]
    Timeout,
}

/// Failures of the catalog read interface
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Catalog unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown library root: {0}")]
    UnknownLibraryRoot(String),
}
