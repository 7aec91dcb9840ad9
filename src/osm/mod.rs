//! Matching POIs to OpenStreetMap features from a local PBF extract.

mod extract;
mod geometry;
mod index;
mod matcher;
mod projection;

pub use extract::{ExtractError, Feature, OsmExtract};
pub use geometry::{assemble_rings, Shape};
pub use index::{CandidateIndex, Nearby};
pub use matcher::{
    match_missing_osm_ids, MatchConfig, MatchReport, MatchTarget, OsmError, OsmMatch, OsmMatcher,
    NAME_ATTRIBUTES,
};
pub use projection::LocalProjection;
