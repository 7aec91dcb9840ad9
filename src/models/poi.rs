//! Point of interest records and the value types they are built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::AreaId;

/// Store-assigned identifier of a point of interest
pub type PoiId = u64;

/// Travel guide category of a point of interest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    See,
    Eat,
    Sleep,
    Shop,
    Drink,
    Play,
}

impl Category {
    /// All categories in display order
    pub fn all() -> &'static [Category] {
        &[
            Category::See,
            Category::Eat,
            Category::Sleep,
            Category::Shop,
            Category::Drink,
            Category::Play,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::See => "see",
            Category::Eat => "eat",
            Category::Sleep => "sleep",
            Category::Shop => "shop",
            Category::Drink => "drink",
            Category::Play => "play",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::all()
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown category: {}", s))
    }
}

/// Geographic point (lat/lon)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Build a point only when both halves are present.
    pub fn from_parts(lat: Option<f64>, lon: Option<f64>) -> Option<Self> {
        match (lat, lon) {
            (Some(lat), Some(lon)) => Some(Self { lat, lon }),
            _ => None,
        }
    }

    /// True when the point lies on the globe
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Type of OSM object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsmType {
    Node,
    Way,
    Relation,
}

impl std::fmt::Display for OsmType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OsmType::Node => write!(f, "node"),
            OsmType::Way => write!(f, "way"),
            OsmType::Relation => write!(f, "relation"),
        }
    }
}

/// Type-qualified OSM identifier, rendered as "{osm_type}/{id}"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OsmId {
    pub osm_type: OsmType,
    pub id: i64,
}

impl OsmId {
    pub fn new(osm_type: OsmType, id: i64) -> Self {
        Self { osm_type, id }
    }
}

impl std::fmt::Display for OsmId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.osm_type, self.id)
    }
}

impl FromStr for OsmId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once('/')
            .ok_or_else(|| format!("invalid OSM id: {}", s))?;
        let osm_type = match kind {
            "node" => OsmType::Node,
            "way" => OsmType::Way,
            "relation" => OsmType::Relation,
            other => return Err(format!("invalid OSM type: {}", other)),
        };
        let id = id
            .parse::<i64>()
            .map_err(|_| format!("invalid OSM id: {}", s))?;
        Ok(Self { osm_type, id })
    }
}

impl Serialize for OsmId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OsmId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A persisted point of interest.
///
/// Every POI belongs to exactly one area: its district when `district_id` is
/// set, otherwise the root area itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poi {
    pub id: PoiId,

    /// Root area (city) of the tree this POI was imported into
    pub root_id: AreaId,

    /// Immediate containing district, `None` for POIs owned by the root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub district_id: Option<AreaId>,

    pub name: String,

    pub category: Category,

    /// Title of the subsection the listing was found under
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_category: Option<String>,

    pub description: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<GeoPoint>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hours: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// 1-based source order within the parse pass that produced this POI
    pub rank: u32,

    /// Matched OSM feature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub osm_id: Option<OsmId>,

    pub updated_at: DateTime<Utc>,
}

impl Poi {
    /// The area that directly owns this POI
    pub fn area_id(&self) -> AreaId {
        self.district_id.unwrap_or(self.root_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_osm_id_round_trips_through_display() {
        let id: OsmId = "way/123".parse().unwrap();
        assert_eq!(id, OsmId::new(OsmType::Way, 123));
        assert_eq!(id.to_string(), "way/123");
    }

    #[test]
    fn test_osm_id_rejects_unknown_type() {
        assert!("area/5".parse::<OsmId>().is_err());
        assert!("node".parse::<OsmId>().is_err());
    }

    #[test]
    fn test_geo_point_requires_both_halves() {
        assert!(GeoPoint::from_parts(Some(1.0), None).is_none());
        assert!(GeoPoint::from_parts(None, Some(1.0)).is_none());
        assert_eq!(
            GeoPoint::from_parts(Some(1.0), Some(2.0)),
            Some(GeoPoint::new(1.0, 2.0))
        );
    }

    #[test]
    fn test_category_parse() {
        assert_eq!("Eat".parse::<Category>().unwrap(), Category::Eat);
        assert!("swim".parse::<Category>().is_err());
    }
}
