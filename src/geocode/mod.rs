//! Forward and reverse geocoding, and the enrichment passes built on them.

mod enrich;
mod nominatim;

use std::future::Future;
use thiserror::Error;

use crate::models::GeoPoint;

pub use enrich::{
    fill_missing_addresses, fill_missing_coordinates, geocode_area_coordinates, EnrichReport,
};
pub use nominatim::{NominatimGeocoder, DEFAULT_NOMINATIM_URL};

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("geocoder returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed geocoder response: {0}")]
    Malformed(String),

    #[error("invalid geocoder url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// A geocoding service
pub trait Geocoder: Send + Sync {
    /// Best match for a free-text query, biased towards `proximity` if given
    fn forward_geocode(
        &self,
        query: &str,
        proximity: Option<GeoPoint>,
    ) -> impl Future<Output = Result<Option<GeoPoint>, GeocodeError>> + Send;

    /// Postal address at a location
    fn reverse_geocode(
        &self,
        lon: f64,
        lat: f64,
    ) -> impl Future<Output = Result<Option<String>, GeocodeError>> + Send;
}
