//! Cities and their nested districts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::GeoPoint;

/// Store-assigned identifier of an area
pub type AreaId = u64;

/// A named geographic entity: a root city or one of its nested districts.
///
/// Names are unique among siblings under the same parent. A district's
/// ancestor chain always ends at the root identified by `root_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    pub id: AreaId,

    pub name: String,

    /// Parent area, `None` for a root city
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<AreaId>,

    /// Root of this area's tree (equal to `id` for a root city)
    pub root_id: AreaId,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<GeoPoint>,

    /// Lead-section summary of the area's guide page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Area {
    pub fn new_root(id: AreaId, name: &str) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.to_string(),
            parent_id: None,
            root_id: id,
            coordinates: None,
            summary: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn new_district(id: AreaId, name: &str, root_id: AreaId, parent_id: AreaId) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.to_string(),
            parent_id: Some(parent_id),
            root_id,
            coordinates: None,
            summary: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}
