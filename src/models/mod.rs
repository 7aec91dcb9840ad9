//! Core data models for the city guide database.

pub mod area;
pub mod poi;
pub mod validation;

pub use area::{Area, AreaId};
pub use poi::{Category, GeoPoint, OsmId, OsmType, Poi, PoiId};
pub use validation::ValidationEvent;
