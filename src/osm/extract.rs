//! Local OSM extract: candidate features for identity matching.

use geo::Coord;
use hashbrown::{HashMap, HashSet};
use osmpbfreader::{OsmObj, OsmPbfReader};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use super::geometry::{assemble_rings, Shape};
use super::index::{CandidateIndex, Nearby};
use super::projection::LocalProjection;
use crate::models::{GeoPoint, OsmType};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("OSM extract not found: {0}")]
    Missing(PathBuf),

    #[error("failed to read OSM extract: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode OSM extract: {0}")]
    Pbf(#[from] osmpbfreader::Error),
}

/// Tags that put a node or way into the point-of-interest layer
const POI_KEYS: &[&str] = &["amenity", "tourism", "shop", "leisure", "historic", "office", "craft"];

fn is_poi(tags: &osmpbfreader::Tags) -> bool {
    POI_KEYS.iter().any(|k| tags.contains_key(*k))
}

fn is_building(tags: &osmpbfreader::Tags) -> bool {
    tags.contains_key("building")
}

fn tag_map(tags: &osmpbfreader::Tags) -> BTreeMap<String, String> {
    tags.iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// A candidate feature in geographic coordinates (x = lon, y = lat)
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub osm_type: OsmType,
    pub id: i64,
    pub tags: BTreeMap<String, String>,
    pub shape: Shape,
}

impl Feature {
    pub fn point(osm_type: OsmType, id: i64, lat: f64, lon: f64, tags: &[(&str, &str)]) -> Self {
        Self {
            osm_type,
            id,
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            shape: Shape::Point(Coord { x: lon, y: lat }),
        }
    }
}

/// Candidate features merged from the point and building layers, projected
/// once and indexed for radius queries. Read-only after construction.
pub struct OsmExtract {
    features: Vec<Feature>,
    projected: Vec<Shape>,
    projection: LocalProjection,
    index: CandidateIndex,
}

impl OsmExtract {
    /// Merge both layers (first occurrence of an id wins), project every
    /// shape around the candidates' mean position and build the index.
    pub fn from_layers(points: Vec<Feature>, buildings: Vec<Feature>) -> Self {
        let mut seen = HashSet::new();
        let features: Vec<Feature> = points
            .into_iter()
            .chain(buildings)
            .filter(|f| seen.insert((f.osm_type, f.id)))
            .collect();

        let anchors: Vec<GeoPoint> = features
            .iter()
            .filter_map(|f| f.shape.representative())
            .map(|c| GeoPoint::new(c.y, c.x))
            .collect();
        let projection = LocalProjection::centered_on(&anchors);

        let projected: Vec<Shape> = features
            .iter()
            .map(|f| f.shape.map_coords(|c| projection.project_coord(c)))
            .collect();
        let index = CandidateIndex::build(&projected);

        info!(
            "Loaded {} candidate features centred on ({:.5}, {:.5})",
            features.len(),
            projection.center().lat,
            projection.center().lon
        );

        Self {
            features,
            projected,
            projection,
            index,
        }
    }

    /// Read an OSM PBF extract.
    ///
    /// The point layer holds nodes and ways tagged as amenities, shops,
    /// attractions and the like; the building layer holds ways and
    /// multipolygon relations tagged `building`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ExtractError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ExtractError::Missing(path.to_path_buf()));
        }

        info!("Reading OSM extract {}", path.display());
        let mut reader = OsmPbfReader::new(BufReader::new(File::open(path)?));
        let (points, buildings) = read_layers(&mut reader)?;
        info!(
            "Read {} point-layer and {} building-layer features",
            points.len(),
            buildings.len()
        );

        Ok(Self::from_layers(points, buildings))
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn projection(&self) -> &LocalProjection {
        &self.projection
    }

    pub fn feature(&self, index: usize) -> Option<&Feature> {
        self.features.get(index)
    }

    /// Candidates within `radius_m` of a projected point, nearest first
    pub fn within(&self, point: Coord<f64>, radius_m: f64) -> Vec<Nearby> {
        self.index.within(&self.projected, point, radius_m)
    }
}

struct TaggedWay {
    id: i64,
    tags: BTreeMap<String, String>,
    nodes: Vec<i64>,
    poi: bool,
}

struct BuildingRelation {
    id: i64,
    tags: BTreeMap<String, String>,
    ways: Vec<i64>,
}

fn read_layers<R: Read + Seek>(
    reader: &mut OsmPbfReader<R>,
) -> Result<(Vec<Feature>, Vec<Feature>), ExtractError> {
    // Pass 1: building relations and their outer member ways
    let mut relations = Vec::new();
    let mut member_ways: HashSet<i64> = HashSet::new();
    reader.rewind()?;
    for obj in reader.iter() {
        if let OsmObj::Relation(rel) = obj? {
            if !is_building(&rel.tags) {
                continue;
            }
            let ways: Vec<i64> = rel
                .refs
                .iter()
                .filter(|m| m.role.is_empty() || m.role == "outer")
                .filter_map(|m| match m.member {
                    osmpbfreader::OsmId::Way(way_id) => Some(way_id.0),
                    _ => None,
                })
                .collect();
            member_ways.extend(ways.iter().copied());
            relations.push(BuildingRelation {
                id: rel.id.0,
                tags: tag_map(&rel.tags),
                ways,
            });
        }
    }

    // Pass 2: tagged ways and relation members
    let mut tagged_ways = Vec::new();
    let mut way_nodes: HashMap<i64, Vec<i64>> = HashMap::new();
    let mut needed_nodes: HashSet<i64> = HashSet::new();
    reader.rewind()?;
    for obj in reader.iter() {
        if let OsmObj::Way(way) = obj? {
            let poi = is_poi(&way.tags);
            let tagged = poi || is_building(&way.tags);
            if !tagged && !member_ways.contains(&way.id.0) {
                continue;
            }
            let nodes: Vec<i64> = way.nodes.iter().map(|n| n.0).collect();
            needed_nodes.extend(nodes.iter().copied());
            if member_ways.contains(&way.id.0) {
                way_nodes.insert(way.id.0, nodes.clone());
            }
            if tagged {
                tagged_ways.push(TaggedWay {
                    id: way.id.0,
                    tags: tag_map(&way.tags),
                    nodes,
                    poi,
                });
            }
        }
    }

    // Pass 3: tagged nodes and the coordinates ways need
    let mut points = Vec::new();
    let mut coords: HashMap<i64, Coord<f64>> = HashMap::new();
    reader.rewind()?;
    for obj in reader.iter() {
        if let OsmObj::Node(node) = obj? {
            let c = Coord {
                x: node.lon(),
                y: node.lat(),
            };
            if needed_nodes.contains(&node.id.0) {
                coords.insert(node.id.0, c);
            }
            if is_poi(&node.tags) {
                points.push(Feature {
                    osm_type: OsmType::Node,
                    id: node.id.0,
                    tags: tag_map(&node.tags),
                    shape: Shape::Point(c),
                });
            }
        }
    }

    let resolve = |nodes: &[i64]| -> Vec<Coord<f64>> {
        nodes.iter().filter_map(|n| coords.get(n).copied()).collect()
    };

    let mut buildings = Vec::new();
    for way in tagged_ways {
        let Some(shape) = Shape::from_way(resolve(way.nodes.as_slice())) else {
            continue;
        };
        let feature = Feature {
            osm_type: OsmType::Way,
            id: way.id,
            tags: way.tags,
            shape,
        };
        if way.poi {
            points.push(feature);
        } else {
            buildings.push(feature);
        }
    }

    for rel in relations {
        let segments: Vec<Vec<Coord<f64>>> = rel
            .ways
            .iter()
            .filter_map(|w| way_nodes.get(w))
            .map(|nodes| resolve(nodes.as_slice()))
            .filter(|seg| seg.len() >= 2)
            .collect();
        let polygons = assemble_rings(segments);
        if polygons.is_empty() {
            continue;
        }
        buildings.push(Feature {
            osm_type: OsmType::Relation,
            id: rel.id,
            tags: rel.tags,
            shape: Shape::Area(geo::MultiPolygon::new(polygons)),
        });
    }

    Ok((points, buildings))
}
