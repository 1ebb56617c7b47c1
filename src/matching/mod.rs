pub mod index;
pub mod normalize;

pub use index::{MatchingIndex, TrackFacts};
pub use normalize::EnergyLevel;
