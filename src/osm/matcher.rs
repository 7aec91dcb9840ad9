//! Geographic and textual matching of POIs against the extract.

use geo::Coord;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::extract::{ExtractError, OsmExtract};
use super::index::Nearby;
use crate::fuzzy;
use crate::models::{AreaId, GeoPoint, OsmId, OsmType, Poi, PoiId};
use crate::store::{Store, StoreError};

/// Candidate attributes compared against the POI name, in order
pub const NAME_ATTRIBUTES: &[&str] = &["name", "name:en", "brand", "addr:housename"];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Search radius for batch matching
    pub batch_radius_m: f64,
    /// Search radius for matching a single POI
    pub single_radius_m: f64,
    /// Minimum token-sort score (0-100) for a name match
    pub name_threshold: f64,
    pub chunk_size: usize,
    pub max_workers: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            batch_radius_m: 20.0,
            single_radius_m: 5.0,
            name_threshold: 60.0,
            chunk_size: 100,
            max_workers: 4,
        }
    }
}

#[derive(Debug, Error)]
pub enum OsmError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("invalid coordinates ({lat}, {lon})")]
    InvalidCoordinates { lat: f64, lon: f64 },
}

/// The feature a POI was matched to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OsmMatch {
    pub osm_id: OsmId,
    pub distance_m: f64,
    pub tags: BTreeMap<String, String>,
}

/// A POI to match
#[derive(Debug, Clone)]
pub struct MatchTarget {
    pub poi_id: PoiId,
    pub name: Option<String>,
    pub point: GeoPoint,
}

impl MatchTarget {
    pub fn from_poi(poi: &Poi) -> Option<Self> {
        Some(Self {
            poi_id: poi.id,
            name: Some(poi.name.clone()).filter(|n| !n.trim().is_empty()),
            point: poi.coordinates?,
        })
    }
}

pub struct OsmMatcher<'a> {
    extract: &'a OsmExtract,
    config: &'a MatchConfig,
}

impl<'a> OsmMatcher<'a> {
    pub fn new(extract: &'a OsmExtract, config: &'a MatchConfig) -> Self {
        Self { extract, config }
    }

    /// Match one POI using the single-POI radius
    pub fn match_one(&self, name: Option<&str>, point: GeoPoint) -> Result<Option<OsmMatch>, OsmError> {
        if !point.is_valid() {
            return Err(OsmError::InvalidCoordinates {
                lat: point.lat,
                lon: point.lon,
            });
        }
        let projected = self.extract.projection().project(point);
        Ok(self.match_projected(name, projected, self.config.single_radius_m))
    }

    /// Match a batch with the batch radius. Target coordinates are projected
    /// together up front; a target that fails is logged and left unmatched.
    pub fn match_batch(&self, targets: &[MatchTarget]) -> Vec<Option<OsmMatch>> {
        let points: Vec<GeoPoint> = targets.iter().map(|t| t.point).collect();
        let projected = self.extract.projection().project_batch(&points);

        targets
            .iter()
            .zip(projected)
            .map(|(target, xy)| {
                if !target.point.is_valid() || !xy.x.is_finite() || !xy.y.is_finite() {
                    warn!(
                        "POI {} has invalid coordinates ({}, {}), skipping",
                        target.poi_id, target.point.lat, target.point.lon
                    );
                    return None;
                }
                self.match_projected(target.name.as_deref(), xy, self.config.batch_radius_m)
            })
            .collect()
    }

    fn match_projected(&self, name: Option<&str>, xy: Coord<f64>, radius: f64) -> Option<OsmMatch> {
        let candidates: Vec<Nearby> = self
            .extract
            .within(xy, radius)
            .into_iter()
            .filter(|n| {
                self.extract
                    .feature(n.index)
                    .is_some_and(|f| f.osm_type != OsmType::Relation)
            })
            .collect();

        let chosen = match (candidates.as_slice(), name) {
            ([], _) => return None,
            ([only], _) => *only,
            ([nearest, ..], None) => *nearest,
            ([nearest, ..], Some(name)) => self.best_by_name(name, &candidates).unwrap_or(*nearest),
        };

        let feature = self.extract.feature(chosen.index)?;
        Some(OsmMatch {
            osm_id: OsmId::new(feature.osm_type, feature.id),
            distance_m: chosen.distance_m,
            tags: feature.tags.clone(),
        })
    }

    /// Highest name score at or above the threshold; nearer candidates win ties
    fn best_by_name(&self, name: &str, candidates: &[Nearby]) -> Option<Nearby> {
        let mut best: Option<(f64, Nearby)> = None;
        for candidate in candidates {
            let Some(feature) = self.extract.feature(candidate.index) else {
                continue;
            };
            let score = NAME_ATTRIBUTES
                .iter()
                .filter_map(|attr| feature.tags.get(*attr))
                .map(|value| fuzzy::token_sort_ratio(name, value))
                .fold(0.0, f64::max);
            if best.map_or(true, |(s, _)| score > s) {
                best = Some((score, *candidate));
            }
        }

        match best {
            Some((score, candidate)) if score >= self.config.name_threshold => {
                debug!("Name match for {} with score {:.0}", name, score);
                Some(candidate)
            }
            _ => None,
        }
    }
}

/// Counts from a matching run
#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchReport {
    pub processed: usize,
    pub matched: usize,
    pub failed: usize,
}

/// Assign OSM ids to every POI of a tree that has coordinates but no id yet.
///
/// POIs are split into chunks matched in parallel on a bounded pool sharing
/// the extract; ids are written once every chunk has finished.
pub fn match_missing_osm_ids(
    store: &Store,
    root: AreaId,
    extract: &OsmExtract,
    config: &MatchConfig,
) -> Result<MatchReport, OsmError> {
    let targets: Vec<MatchTarget> = store
        .pois_for_root(root)?
        .iter()
        .filter(|p| p.osm_id.is_none())
        .filter_map(MatchTarget::from_poi)
        .collect();

    let mut report = MatchReport {
        processed: targets.len(),
        ..MatchReport::default()
    };
    if targets.is_empty() {
        info!("No POIs need OSM matching");
        return Ok(report);
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.max_workers.max(1))
        .build()?;
    let matcher = OsmMatcher::new(extract, config);
    let chunk_size = config.chunk_size.max(1);

    info!(
        "Matching {} POIs in chunks of {} on {} workers",
        targets.len(),
        chunk_size,
        config.max_workers.max(1)
    );

    let results: Vec<Option<OsmMatch>> = pool.install(|| {
        targets
            .par_chunks(chunk_size)
            .map(|chunk| matcher.match_batch(chunk))
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect()
    });

    for (target, result) in targets.iter().zip(results) {
        let Some(found) = result else {
            continue;
        };
        match store.set_osm_id(target.poi_id, found.osm_id) {
            Ok(()) => {
                debug!(
                    "POI {} -> {} at {:.1} m",
                    target.poi_id, found.osm_id, found.distance_m
                );
                report.matched += 1;
            }
            Err(e) => {
                warn!("Failed to store OSM id for POI {}: {}", target.poi_id, e);
                report.failed += 1;
            }
        }
    }

    info!(
        "OSM matching finished: {} processed, {} matched, {} failed",
        report.processed, report.matched, report.failed
    );
    Ok(report)
}
