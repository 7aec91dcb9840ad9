//! Citywiki - builds a structured city guide database from Wikivoyage pages
//!
//! This library provides the importer, parser, deduplication, geocoding and
//! OSM matching used by the `import` and `enrich` binaries.

pub mod config;
pub mod dedup;
pub mod fuzzy;
pub mod geocode;
pub mod models;
pub mod osm;
pub mod pipeline;
pub mod store;
pub mod wikivoyage;

pub use models::{Area, AreaId, Category, GeoPoint, OsmId, OsmType, Poi, PoiId};
pub use store::{Store, StoreError};
