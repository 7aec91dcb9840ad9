//! JSON export of a city tree.

use serde::Serialize;
use std::collections::HashMap;

use crate::models::{Area, AreaId, Poi};
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Serialize)]
pub struct DistrictEntry {
    #[serde(flatten)]
    pub area: Area,
    /// Name of the parent district, absent for districts directly under the city
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_district: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoiEntry {
    #[serde(flatten)]
    pub poi: Poi,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
}

/// Everything stored for one city
#[derive(Debug, Clone, Serialize)]
pub struct DumpDocument {
    pub city: Area,
    pub districts: Vec<DistrictEntry>,
    pub points_of_interest: Vec<PoiEntry>,
}

impl DumpDocument {
    pub fn build(store: &Store, root_id: AreaId) -> Result<Self, StoreError> {
        let mut areas = store.descendants(root_id)?;
        if areas.is_empty() {
            return Err(StoreError::AreaNotFound(root_id));
        }
        let city = areas.remove(0);

        let names: HashMap<AreaId, String> = areas.iter().map(|a| (a.id, a.name.clone())).collect();

        let districts = areas
            .into_iter()
            .map(|area| DistrictEntry {
                parent_district: area.parent_id.and_then(|p| names.get(&p).cloned()),
                area,
            })
            .collect();

        let points_of_interest = store
            .pois_for_root(root_id)?
            .into_iter()
            .map(|poi| PoiEntry {
                district: poi.district_id.and_then(|d| names.get(&d).cloned()),
                poi,
            })
            .collect();

        Ok(Self {
            city,
            districts,
            points_of_interest,
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;

    #[test]
    fn test_dump_names_districts_and_parents() {
        let store = Store::temporary().unwrap();
        let paris = store.get_or_create_root("Paris").unwrap();
        let marais = store.get_or_create_district("Le Marais", paris.id, paris.id).unwrap();
        let archives = store.get_or_create_district("Archives", paris.id, marais.id).unwrap();

        let poi = Poi {
            id: 0,
            root_id: 0,
            district_id: None,
            name: "Hotel Archives".to_string(),
            category: Category::Sleep,
            sub_category: None,
            description: String::new(),
            coordinates: None,
            address: None,
            phone: None,
            website: None,
            hours: None,
            image: None,
            rank: 1,
            osm_id: None,
            updated_at: chrono::Utc::now(),
        };
        store.replace_area_pois(&archives, vec![poi]).unwrap();

        let doc = DumpDocument::build(&store, paris.id).unwrap();
        assert_eq!(doc.city.name, "Paris");
        assert_eq!(doc.districts.len(), 2);
        assert_eq!(doc.districts[0].parent_district, None);
        assert_eq!(doc.districts[1].parent_district.as_deref(), Some("Le Marais"));
        assert_eq!(doc.points_of_interest[0].district.as_deref(), Some("Archives"));

        let json: serde_json::Value = serde_json::from_str(&doc.to_json().unwrap()).unwrap();
        assert_eq!(json["points_of_interest"][0]["name"], "Hotel Archives");
        assert_eq!(json["points_of_interest"][0]["district"], "Archives");
        assert_eq!(json["districts"][1]["parent_district"], "Le Marais");
    }

    #[test]
    fn test_dump_unknown_city() {
        let store = Store::temporary().unwrap();
        assert!(matches!(
            DumpDocument::build(&store, 42),
            Err(StoreError::AreaNotFound(42))
        ));
    }
}
