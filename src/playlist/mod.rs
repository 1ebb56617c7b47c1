pub mod filters;
pub mod generator;
pub mod scoring;
pub mod selection;
pub mod strategy;
pub mod summary;
pub mod transitions;
pub mod utils;


pub use generator::{GenerationOptions, PlaylistEngine};
pub use scoring::{ComponentScores, ReasonKind, TrackReason, TrackSelection};
pub use strategy::{PlaylistStrategy, SectionName};
pub use summary::{GeneratedPlaylist, PlaylistSummary};
pub use transitions::OrderedTrack;
