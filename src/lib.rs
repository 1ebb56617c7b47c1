//! A deterministic, explainable playlist construction engine for personal
//! music libraries.
//!
//! Given a catalog snapshot and a [`request::PlaylistRequest`], the engine
//! derives a strategy, filters and scores candidates, selects under the
//! length budget, orders the result along a flow arc, and returns a
//! [`playlist::GeneratedPlaylist`] with per-track reasons. External
//! collaborators (the refiner oracle, the discovery source, the catalog) are
//! capability traits; without them every path is deterministic for a given
//! seed.

pub mod catalog;
pub mod discovery;
pub mod error;
pub mod matching;
pub mod models;
pub mod oracle;
pub mod playlist;
pub mod request;


pub use catalog::{CatalogReader, InMemoryCatalog, TrackUpdate};
pub use discovery::{DiscoveryCandidate, DiscoverySource, DiscoveryTrack};
pub use error::{CatalogError, DiscoveryError, EngineError, OracleError};
pub use matching::{MatchingIndex, TrackFacts};
pub use models::{
    BpmRange, EnhancedMetadata, LibrarySummary, TempoBucket, TempoTag, Track,
};
pub use oracle::RefinerOracle;
pub use playlist::{
    GeneratedPlaylist, GenerationOptions, OrderedTrack, PlaylistEngine, PlaylistStrategy,
    PlaylistSummary, ReasonKind, TrackReason, TrackSelection,
};
pub use request::{PlaylistLength, PlaylistRequest, TempoPreference};
